use super::{DocumentStore, DocumentStream, Record, ReplaceOutcome, StoreError, StoredDocument};
use core::ops::Bound;
use futures::{StreamExt, stream};
use parking_lot::RwLock;
use quartet_core::DocumentId;
use quartet_core::ferroid::id::ULID;
use std::collections::{BTreeMap, HashMap, btree_map::Entry};
use std::sync::Arc;

type Collection = BTreeMap<DocumentId, Record>;

// Two ULIDs minted in the same millisecond only collide if 80 random bits
// match; a handful of retries is plenty.
const MAX_INSERT_ATTEMPTS: usize = 4;

/// In-process document engine.
///
/// Collections are created on first insert and keep their documents ordered
/// by identifier, which for ULIDs is creation order. Every operation takes the
/// lock for the duration of a single map access and never across an await.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    collections: Arc<RwLock<HashMap<String, Collection>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently held by `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.collections.read().get(collection).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// The document stored right after `cursor` (or the first one).
    fn next_after(&self, collection: &str, cursor: Option<DocumentId>) -> Option<StoredDocument> {
        let collections = self.collections.read();
        let docs = collections.get(collection)?;
        let lower = cursor.map_or(Bound::Unbounded, Bound::Excluded);
        docs.range((lower, Bound::Unbounded))
            .next()
            .map(|(id, record)| StoredDocument {
                id: *id,
                record: record.clone(),
            })
    }
}

#[tonic::async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(&self, collection: &str, record: Record) -> Result<DocumentId, StoreError> {
        let mut collections = self.collections.write();
        let docs = collections.entry(collection.to_string()).or_default();

        for _ in 0..MAX_INSERT_ATTEMPTS {
            if let Entry::Vacant(slot) = docs.entry(ULID::now()) {
                let id = *slot.key();
                slot.insert(record);
                return Ok(id);
            }
        }
        Err(StoreError::Backend(format!(
            "No free identifier in {collection:?} after {MAX_INSERT_ATTEMPTS} attempts"
        )))
    }

    async fn find_by_id(
        &self,
        collection: &str,
        id: DocumentId,
    ) -> Result<Option<Record>, StoreError> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(&id))
            .cloned())
    }

    async fn replace_by_id(
        &self,
        collection: &str,
        id: DocumentId,
        record: Record,
    ) -> Result<ReplaceOutcome, StoreError> {
        let mut collections = self.collections.write();
        let Some(current) = collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(&id))
        else {
            return Ok(ReplaceOutcome::default());
        };

        let modified = u64::from(*current != record);
        *current = record;
        Ok(ReplaceOutcome {
            matched: 1,
            modified,
        })
    }

    async fn delete_by_id(&self, collection: &str, id: DocumentId) -> Result<u64, StoreError> {
        let removed = self
            .collections
            .write()
            .get_mut(collection)
            .and_then(|docs| docs.remove(&id));
        Ok(u64::from(removed.is_some()))
    }

    fn scan_all(&self, collection: &str) -> DocumentStream {
        let store = self.clone();
        let collection = collection.to_string();

        stream::unfold(None, move |cursor| {
            let store = store.clone();
            let collection = collection.clone();
            async move {
                let doc = store.next_after(&collection, cursor)?;
                let id = doc.id;
                Some((Ok(doc), Some(id)))
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn record(title: &str) -> Record {
        Record {
            author_id: "author".to_string(),
            title: title.to_string(),
            content: "content".to_string(),
        }
    }

    #[tokio::test]
    async fn insert_then_find() {
        let store = MemoryStore::new();
        assert!(store.is_empty("blog"));
        let id = store.insert("blog", record("a")).await.unwrap();

        assert_eq!(store.find_by_id("blog", id).await.unwrap(), Some(record("a")));
        assert_eq!(store.find_by_id("other", id).await.unwrap(), None);
        assert_eq!(store.len("blog"), 1);
        assert!(!store.is_empty("blog"));
        assert!(store.is_empty("other"));
    }

    #[tokio::test]
    async fn replace_reports_matched_and_modified() {
        let store = MemoryStore::new();
        let id = store.insert("blog", record("a")).await.unwrap();

        let changed = store.replace_by_id("blog", id, record("b")).await.unwrap();
        assert_eq!(changed, ReplaceOutcome { matched: 1, modified: 1 });

        let identical = store.replace_by_id("blog", id, record("b")).await.unwrap();
        assert_eq!(identical, ReplaceOutcome { matched: 1, modified: 0 });

        let missing = store
            .replace_by_id("blog", ULID::from_raw(1), record("c"))
            .await
            .unwrap();
        assert_eq!(missing, ReplaceOutcome::default());
    }

    #[tokio::test]
    async fn delete_counts_removed_records() {
        let store = MemoryStore::new();
        let id = store.insert("blog", record("a")).await.unwrap();

        assert_eq!(store.delete_by_id("blog", id).await.unwrap(), 1);
        assert_eq!(store.delete_by_id("blog", id).await.unwrap(), 0);
        assert_eq!(store.delete_by_id("nowhere", id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn scan_visits_every_document_in_id_order() {
        let store = MemoryStore::new();
        let mut ids = Vec::new();
        for title in ["a", "b", "c"] {
            ids.push(store.insert("blog", record(title)).await.unwrap());
        }
        ids.sort();

        let scanned: Vec<_> = store.scan_all("blog").try_collect().await.unwrap();
        let scanned_ids: Vec<_> = scanned.iter().map(|doc| doc.id).collect();
        assert_eq!(scanned_ids, ids);
        assert!(store.scan_all("empty").try_collect::<Vec<_>>().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scan_is_lazy_and_sees_later_inserts() {
        let store = MemoryStore::new();
        let first = store.insert("blog", record("a")).await.unwrap();
        let mut scan = store.scan_all("blog");

        assert_eq!(scan.try_next().await.unwrap().unwrap().id, first);

        // Inserted after the cursor, so the running scan still reaches it
        // unless it sorts before `first`.
        let second = store.insert("blog", record("b")).await.unwrap();
        let rest: Vec<_> = scan.try_collect().await.unwrap();
        if second > first {
            assert_eq!(rest.len(), 1);
            assert_eq!(rest[0].id, second);
        } else {
            assert!(rest.is_empty());
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_inserts_get_distinct_ids() {
        let store = MemoryStore::new();
        let tasks: Vec<_> = (0..64)
            .map(|n| {
                let store = store.clone();
                tokio::spawn(async move { store.insert("blog", record(&n.to_string())).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(store.len("blog"), 64);
    }
}
