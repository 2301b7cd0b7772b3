//! Document CRUD service.
//!
//! The domain operations are inherent methods returning
//! [`quartet_core::Result`]; the [`BlogService`] impl only admits the call and
//! picks the handler for its shape.

use crate::server::call::{CallStream, Lifecycle, Method, Shape, server_streaming, unary};
use crate::server::config::ServerConfig;
use crate::server::storage::{DocumentStore, Record};
use futures::{Stream, StreamExt};
use quartet_core::proto::blog::{
    Blog, CreateBlogRequest, CreateBlogResponse, DeleteBlogRequest, DeleteBlogResponse,
    ListBlogRequest, ListBlogResponse, ReadBlogRequest, ReadBlogResponse, UpdateBlogRequest,
    UpdateBlogResponse, blog_service_server::BlogService,
};
use quartet_core::{DocumentId, Error, Result, format_document_id, parse_document_id};
use std::sync::Arc;
use tonic::{Request, Response, Status};

const SERVICE: &str = "blog.BlogService";

static CREATE_BLOG: Method = Method::new(SERVICE, "CreateBlog", Shape::Unary);
static READ_BLOG: Method = Method::new(SERVICE, "ReadBlog", Shape::Unary);
static UPDATE_BLOG: Method = Method::new(SERVICE, "UpdateBlog", Shape::Unary);
static DELETE_BLOG: Method = Method::new(SERVICE, "DeleteBlog", Shape::Unary);
static LIST_BLOG: Method = Method::new(SERVICE, "ListBlog", Shape::ServerStream);

#[derive(Clone)]
pub struct DocumentService {
    store: Arc<dyn DocumentStore>,
    collection: String,
    lifecycle: Arc<Lifecycle>,
    buffer: usize,
}

impl core::fmt::Debug for DocumentService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DocumentService")
            .field("collection", &self.collection)
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}

impl From<Blog> for Record {
    fn from(blog: Blog) -> Self {
        Self {
            author_id: blog.author_id,
            title: blog.title,
            content: blog.content,
        }
    }
}

fn to_blog(id: DocumentId, record: Record) -> Blog {
    Blog {
        id: format_document_id(&id),
        author_id: record.author_id,
        title: record.title,
        content: record.content,
    }
}

fn require_blog(blog: Option<Blog>) -> Result<Blog> {
    blog.ok_or_else(|| Error::invalid_argument("Request carries no blog"))
}

fn no_such_blog(id: &DocumentId) -> Error {
    Error::not_found(format!("No blog with id {}", format_document_id(id)))
}

impl DocumentService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        lifecycle: Arc<Lifecycle>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            store,
            collection: config.blog_collection.clone(),
            lifecycle,
            buffer: config.stream_buffer_size,
        }
    }

    /// Stores a new blog. Any `id` the caller filled in is ignored.
    pub async fn create(&self, blog: Option<Blog>) -> Result<Blog> {
        let record = Record::from(require_blog(blog)?);
        let id = self.store.insert(&self.collection, record.clone()).await?;
        tracing::debug!(id = %format_document_id(&id), "Blog created");
        Ok(to_blog(id, record))
    }

    pub async fn read(&self, blog_id: &str) -> Result<Blog> {
        let id = parse_document_id(blog_id)?;
        let record = self
            .store
            .find_by_id(&self.collection, id)
            .await?
            .ok_or_else(|| no_such_blog(&id))?;
        Ok(to_blog(id, record))
    }

    /// Replaces every field of an existing blog.
    ///
    /// An identical replacement is a success. A record that disappears
    /// between the lookup and the replace is an internal error.
    pub async fn update(&self, blog: Option<Blog>) -> Result<Blog> {
        let blog = require_blog(blog)?;
        let id = parse_document_id(&blog.id)?;

        if self.store.find_by_id(&self.collection, id).await?.is_none() {
            return Err(no_such_blog(&id));
        }

        let record = Record::from(blog);
        let outcome = self
            .store
            .replace_by_id(&self.collection, id, record.clone())
            .await?;
        match (outcome.matched, outcome.modified) {
            (0, _) => {
                return Err(Error::internal(format!(
                    "Blog {} vanished before it could be replaced",
                    format_document_id(&id)
                )));
            }
            (_, 0) => tracing::debug!(id = %format_document_id(&id), "Blog replaced by an identical copy"),
            _ => tracing::debug!(id = %format_document_id(&id), "Blog updated"),
        }
        Ok(to_blog(id, record))
    }

    /// Returns the canonical form of the removed blog's identifier.
    pub async fn delete(&self, blog_id: &str) -> Result<String> {
        let id = parse_document_id(blog_id)?;
        match self.store.delete_by_id(&self.collection, id).await? {
            0 => Err(no_such_blog(&id)),
            _ => Ok(format_document_id(&id)),
        }
    }

    /// Every stored blog, read from the store as the stream is polled.
    pub fn list(&self) -> impl Stream<Item = Result<Blog>> + Send + 'static {
        self.store.scan_all(&self.collection).map(|doc| {
            doc.map(|doc| to_blog(doc.id, doc.record))
                .map_err(Error::from)
        })
    }
}

#[tonic::async_trait]
impl BlogService for DocumentService {
    type ListBlogStream = CallStream<ListBlogResponse>;

    async fn create_blog(
        &self,
        request: Request<CreateBlogRequest>,
    ) -> Result<Response<CreateBlogResponse>, Status> {
        let ctx = self.lifecycle.open(&request)?;
        let blog = request.into_inner().blog;
        unary(ctx, &CREATE_BLOG, async move {
            let blog = self.create(blog).await?;
            Ok(CreateBlogResponse { blog: Some(blog) })
        })
        .await
    }

    async fn read_blog(
        &self,
        request: Request<ReadBlogRequest>,
    ) -> Result<Response<ReadBlogResponse>, Status> {
        let ctx = self.lifecycle.open(&request)?;
        let blog_id = request.into_inner().blog_id;
        unary(ctx, &READ_BLOG, async move {
            let blog = self.read(&blog_id).await?;
            Ok(ReadBlogResponse { blog: Some(blog) })
        })
        .await
    }

    async fn update_blog(
        &self,
        request: Request<UpdateBlogRequest>,
    ) -> Result<Response<UpdateBlogResponse>, Status> {
        let ctx = self.lifecycle.open(&request)?;
        let blog = request.into_inner().blog;
        unary(ctx, &UPDATE_BLOG, async move {
            let blog = self.update(blog).await?;
            Ok(UpdateBlogResponse { blog: Some(blog) })
        })
        .await
    }

    async fn delete_blog(
        &self,
        request: Request<DeleteBlogRequest>,
    ) -> Result<Response<DeleteBlogResponse>, Status> {
        let ctx = self.lifecycle.open(&request)?;
        let blog_id = request.into_inner().blog_id;
        unary(ctx, &DELETE_BLOG, async move {
            let blog_id = self.delete(&blog_id).await?;
            Ok(DeleteBlogResponse { blog_id })
        })
        .await
    }

    async fn list_blog(
        &self,
        request: Request<ListBlogRequest>,
    ) -> Result<Response<Self::ListBlogStream>, Status> {
        let ctx = self.lifecycle.open(&request)?;
        let blogs = self
            .list()
            .map(|blog| blog.map(|blog| ListBlogResponse { blog: Some(blog) }));
        Ok(server_streaming(ctx, &LIST_BLOG, blogs, self.buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::storage::{DocumentStream, MemoryStore, ReplaceOutcome, StoreError};
    use core::time::Duration;
    use futures::{TryStreamExt, stream};
    use quartet_core::ferroid::id::ULID;

    fn service_with(store: Arc<dyn DocumentStore>) -> DocumentService {
        let lifecycle = Arc::new(Lifecycle::new(None, Duration::from_secs(1)));
        DocumentService::new(store, lifecycle, &ServerConfig::default())
    }

    fn service() -> DocumentService {
        service_with(Arc::new(MemoryStore::new()))
    }

    fn draft(title: &str) -> Blog {
        Blog {
            id: String::new(),
            author_id: "alice".to_string(),
            title: title.to_string(),
            content: "body".to_string(),
        }
    }

    fn absent_id() -> String {
        format_document_id(&ULID::from_raw(42))
    }

    /// A store whose every operation fails, or whose replace matches nothing.
    struct FailingStore {
        vanishing: bool,
    }

    #[tonic::async_trait]
    impl DocumentStore for FailingStore {
        async fn insert(&self, _: &str, _: Record) -> Result<DocumentId, StoreError> {
            Err(StoreError::Backend("disk on fire".to_string()))
        }

        async fn find_by_id(&self, _: &str, _: DocumentId) -> Result<Option<Record>, StoreError> {
            if self.vanishing {
                return Ok(Some(Record::default()));
            }
            Err(StoreError::Unavailable {
                collection: "blog".to_string(),
                reason: "offline".to_string(),
            })
        }

        async fn replace_by_id(
            &self,
            _: &str,
            _: DocumentId,
            _: Record,
        ) -> Result<ReplaceOutcome, StoreError> {
            Ok(ReplaceOutcome::default())
        }

        async fn delete_by_id(&self, _: &str, _: DocumentId) -> Result<u64, StoreError> {
            Err(StoreError::Backend("disk on fire".to_string()))
        }

        fn scan_all(&self, _: &str) -> DocumentStream {
            stream::iter([Err(StoreError::Backend("cursor lost".to_string()))]).boxed()
        }
    }

    #[tokio::test]
    async fn read_returns_what_create_stored() {
        let service = service();
        let created = service.create(Some(draft("first"))).await.unwrap();
        assert_eq!(created.id.len(), quartet_core::types::DOCUMENT_ID_LEN);

        let read = service.read(&created.id).await.unwrap();
        assert_eq!(read, Blog { id: created.id.clone(), ..draft("first") });
    }

    #[tokio::test]
    async fn create_ignores_a_caller_supplied_id() {
        let service = service();
        let mut blog = draft("first");
        blog.id = absent_id();
        let created = service.create(Some(blog)).await.unwrap();
        assert_ne!(created.id, absent_id());
    }

    #[tokio::test]
    async fn absent_ids_are_not_found_everywhere() {
        let service = service();
        let id = absent_id();

        assert!(matches!(service.read(&id).await, Err(Error::NotFound { .. })));
        let update = Blog { id: id.clone(), ..draft("x") };
        assert!(matches!(service.update(Some(update)).await, Err(Error::NotFound { .. })));
        assert!(matches!(service.delete(&id).await, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn malformed_ids_are_invalid_arguments_everywhere() {
        let service = service();
        for raw in [
            "",
            "not-an-id",
            "UUUUUUUUUUUUUUUUUUUUUUUUUU",
            "01ARZ3NDEKTSV4RRFFQ69G5FAVU",
            "80000000000000000000000001",
            "ZZZZZZZZZZZZZZZZZZZZZZZZZZ",
        ] {
            assert!(matches!(service.read(raw).await, Err(Error::InvalidArgument { .. })), "{raw:?}");
            let update = Blog { id: raw.to_string(), ..draft("x") };
            assert!(matches!(
                service.update(Some(update)).await,
                Err(Error::InvalidArgument { .. })
            ));
            assert!(matches!(service.delete(raw).await, Err(Error::InvalidArgument { .. })));
        }
    }

    #[tokio::test]
    async fn missing_blog_field_is_an_invalid_argument() {
        let service = service();
        assert!(matches!(service.create(None).await, Err(Error::InvalidArgument { .. })));
        assert!(matches!(service.update(None).await, Err(Error::InvalidArgument { .. })));
    }

    #[tokio::test]
    async fn update_replaces_the_whole_record() {
        let service = service();
        let created = service.create(Some(draft("first"))).await.unwrap();
        let replacement = Blog {
            id: created.id.clone(),
            author_id: "bob".to_string(),
            title: "second".to_string(),
            content: String::new(),
        };

        assert_eq!(service.update(Some(replacement.clone())).await.unwrap(), replacement);
        assert_eq!(service.read(&created.id).await.unwrap(), replacement);
    }

    #[tokio::test]
    async fn identical_update_is_a_success() {
        let service = service();
        let created = service.create(Some(draft("first"))).await.unwrap();
        assert_eq!(service.update(Some(created.clone())).await.unwrap(), created);
    }

    #[tokio::test]
    async fn delete_removes_and_echoes_the_id() {
        let service = service();
        let created = service.create(Some(draft("first"))).await.unwrap();

        assert_eq!(service.delete(&created.id.to_lowercase()).await.unwrap(), created.id);
        assert!(matches!(service.read(&created.id).await, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn list_streams_every_blog() {
        let service = service();
        let mut ids = Vec::new();
        for title in ["a", "b", "c"] {
            ids.push(service.create(Some(draft(title))).await.unwrap().id);
        }
        ids.sort();

        let mut listed: Vec<String> = service
            .list()
            .map_ok(|blog| blog.id)
            .try_collect()
            .await
            .unwrap();
        listed.sort();
        assert_eq!(listed, ids);
    }

    #[tokio::test]
    async fn storage_failures_are_internal() {
        let service = service_with(Arc::new(FailingStore { vanishing: false }));

        assert!(matches!(service.create(Some(draft("x"))).await, Err(Error::Internal { .. })));
        assert!(matches!(service.read(&absent_id()).await, Err(Error::Internal { .. })));
        assert!(matches!(service.delete(&absent_id()).await, Err(Error::Internal { .. })));

        let listed: Vec<_> = service.list().collect().await;
        assert!(matches!(listed.as_slice(), [Err(Error::Internal { .. })]));
    }

    #[tokio::test]
    async fn replace_matching_nothing_after_lookup_is_internal() {
        let service = service_with(Arc::new(FailingStore { vanishing: true }));
        let update = Blog { id: absent_id(), ..draft("x") };
        assert!(matches!(service.update(Some(update)).await, Err(Error::Internal { .. })));
    }
}
