//! The quartet gRPC server.
//!
//! [`Services`] wires the three domain services to one shared [`Lifecycle`]
//! and storage handle; [`serve`] mounts them on a tonic server next to the
//! health and reflection services and drains them on shutdown.

pub mod call;
pub mod config;
pub mod service;
pub mod storage;
pub mod telemetry;

use call::Lifecycle;
use config::ServerConfig;
use core::future::Future;
use futures::Stream;
use quartet_core::proto::{
    FILE_DESCRIPTOR_SET, blog::blog_service_server::BlogServiceServer,
    calculator::calculator_service_server::CalculatorServiceServer,
    greet::greet_service_server::GreetServiceServer,
};
use service::{ArithmeticService, DocumentService, GreetingService};
use std::sync::Arc;
use storage::{DocumentStore, MemoryStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tonic::codec::CompressionEncoding;
use tonic::transport::{Server, server::Connected};
use tonic_health::server::HealthReporter;
use tonic_reflection::server::Builder;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

/// The domain services sharing one call lifecycle.
#[derive(Clone, Debug)]
pub struct Services {
    pub lifecycle: Arc<Lifecycle>,
    pub greet: GreetingService,
    pub calculator: ArithmeticService,
    pub blog: DocumentService,
}

impl Services {
    pub fn new(config: &ServerConfig, store: Arc<dyn DocumentStore>) -> Self {
        let lifecycle = Arc::new(Lifecycle::from_config(config));
        Self {
            greet: GreetingService::new(Arc::clone(&lifecycle), config),
            calculator: ArithmeticService::new(Arc::clone(&lifecycle), config),
            blog: DocumentService::new(store, Arc::clone(&lifecycle), config),
            lifecycle,
        }
    }

    /// Services backed by a fresh [`MemoryStore`].
    pub fn in_memory(config: &ServerConfig) -> Self {
        Self::new(config, Arc::new(MemoryStore::new()))
    }
}

// Every generated server type has the same compression knobs but no common
// trait exposing them.
macro_rules! compressed {
    ($server:expr) => {
        $server
            .send_compressed(CompressionEncoding::Zstd)
            .send_compressed(CompressionEncoding::Gzip)
            .send_compressed(CompressionEncoding::Deflate)
            .accept_compressed(CompressionEncoding::Zstd)
            .accept_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Deflate)
    };
}

/// Serves `services` on `incoming` until `shutdown_signal` resolves, then
/// drains in-flight calls.
///
/// # Errors
///
/// The reflection service could not be built or the transport failed.
pub async fn serve<I, IO, IE, F>(
    services: Services,
    incoming: I,
    shutdown_signal: F,
) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
    F: Future<Output = ()>,
{
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    set_serving(&health_reporter, true).await;

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let lifecycle = Arc::clone(&services.lifecycle);
    let shutdown = async move {
        shutdown_signal.await;
        tracing::info!("Shutdown signal received, terminating gracefully...");

        // 1. Publish the status
        set_serving(&health_reporter, false).await;

        // 2. Drain and cancel in-flight calls
        lifecycle.shutdown().await;
    };

    Server::builder()
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(GrpcWebLayer::new()),
        )
        .add_service(health_service)
        .add_service(reflection)
        .add_service(compressed!(GreetServiceServer::new(services.greet)))
        .add_service(compressed!(CalculatorServiceServer::new(services.calculator)))
        .add_service(compressed!(BlogServiceServer::new(services.blog)))
        .serve_with_incoming_shutdown(incoming, shutdown)
        .await?;

    tracing::info!("Service shut down successfully");
    Ok(())
}

async fn set_serving(reporter: &HealthReporter, serving: bool) {
    if serving {
        reporter.set_serving::<GreetServiceServer<GreetingService>>().await;
        reporter.set_serving::<CalculatorServiceServer<ArithmeticService>>().await;
        reporter.set_serving::<BlogServiceServer<DocumentService>>().await;
    } else {
        reporter.set_not_serving::<GreetServiceServer<GreetingService>>().await;
        reporter.set_not_serving::<CalculatorServiceServer<ArithmeticService>>().await;
        reporter.set_not_serving::<BlogServiceServer<DocumentService>>().await;
    }
}
