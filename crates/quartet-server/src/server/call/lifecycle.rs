//! Call admission, in-flight accounting and graceful shutdown.
//!
//! Every handler obtains its [`CallContext`] from [`Lifecycle::open`]. The
//! context carries an [`InflightGuard`], so a call counts as in flight until
//! the last task working on it has let go of its context, not merely until the
//! handler returned a response stream.

use super::context::{CallContext, parse_grpc_timeout};
use crate::server::config::ServerConfig;
use core::time::Duration;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use quartet_core::{Error, Result};
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tonic::Request;

/// Standard gRPC header carrying the caller's deadline.
pub const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

#[derive(Debug)]
pub struct Lifecycle {
    root: CancellationToken,
    accepting: AtomicBool,
    inflight: Arc<AtomicUsize>,
    default_timeout: Option<Duration>,
    shutdown_timeout: Duration,
}

impl Lifecycle {
    pub fn new(default_timeout: Option<Duration>, shutdown_timeout: Duration) -> Self {
        Self {
            root: CancellationToken::new(),
            accepting: AtomicBool::new(true),
            inflight: Arc::new(AtomicUsize::new(0)),
            default_timeout,
            shutdown_timeout,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.default_timeout, config.shutdown_timeout)
    }

    /// Admits a call and builds its context.
    ///
    /// The deadline comes from the `grpc-timeout` header, falling back to the
    /// configured default.
    ///
    /// # Errors
    ///
    /// - [`Error::ServiceShutdown`] once [`Lifecycle::shutdown`] has started.
    /// - [`Error::InvalidArgument`] if the `grpc-timeout` header is malformed.
    pub fn open<T>(&self, request: &Request<T>) -> Result<CallContext> {
        if !self.accepting.load(Ordering::Acquire) {
            tracing::debug!("Rejecting call during shutdown");
            return Err(Error::ServiceShutdown);
        }

        let timeout = match request.metadata().get(GRPC_TIMEOUT_HEADER) {
            Some(value) => {
                let raw = value
                    .to_str()
                    .map_err(|_| Error::invalid_argument("Malformed grpc-timeout header"))?;
                Some(parse_grpc_timeout(raw)?)
            }
            None => self.default_timeout,
        };

        let ctx = CallContext::new(self.root.child_token())
            .with_admission(InflightGuard::new(Arc::clone(&self.inflight)));
        Ok(match timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        })
    }

    /// Number of admitted calls that have not finished yet.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Gracefully drains the service.
    ///
    /// - Stops admitting calls.
    /// - Waits up to the shutdown timeout for in-flight calls to finish.
    /// - Cancels whatever is still running; those calls end with a
    ///   cancellation status at their next suspension point.
    pub async fn shutdown(&self) {
        // === Phase 0: Stop accepting new calls ===
        tracing::info!("Refusing new calls");
        self.accepting.store(false, Ordering::Release);

        // === Phase 1: Wait for in-flight calls to drain ===
        tracing::info!("Draining in-flight calls ({} active)", self.inflight());
        let drain_result = timeout(self.shutdown_timeout, async {
            while self.inflight() > 0 {
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        match drain_result {
            Ok(()) => tracing::debug!("All in-flight calls drained"),
            Err(_) => tracing::warn!(
                "Graceful drain timed out ({} calls still active)",
                self.inflight()
            ),
        }

        // === Phase 2: Cancel any remaining work ===
        tracing::debug!("Cancelling remaining calls");
        self.root.cancel();
    }
}

/// Counts one admitted call for as long as it is alive.
#[derive(Debug)]
pub(crate) struct InflightGuard(Arc<AtomicUsize>);

impl InflightGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::metadata::MetadataValue;

    fn lifecycle() -> Lifecycle {
        Lifecycle::new(None, Duration::from_millis(200))
    }

    #[test]
    fn contexts_are_counted_until_the_last_clone_drops() {
        let lifecycle = lifecycle();
        let ctx = lifecycle.open(&Request::new(())).unwrap();
        let clone = ctx.clone();
        assert_eq!(lifecycle.inflight(), 1);
        drop(ctx);
        assert_eq!(lifecycle.inflight(), 1);
        drop(clone);
        assert_eq!(lifecycle.inflight(), 0);
    }

    #[test]
    fn deadline_header_sets_the_context_deadline() {
        let lifecycle = lifecycle();
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert(GRPC_TIMEOUT_HEADER, MetadataValue::from_static("50m"));
        let ctx = lifecycle.open(&request).unwrap();
        assert!(ctx.deadline().is_some());
    }

    #[test]
    fn default_timeout_applies_without_header() {
        let lifecycle = Lifecycle::new(Some(Duration::from_secs(1)), Duration::from_secs(1));
        assert!(lifecycle.open(&Request::new(())).unwrap().deadline().is_some());
        assert!(self::lifecycle().open(&Request::new(())).unwrap().deadline().is_none());
    }

    #[test]
    fn malformed_deadline_header_is_rejected() {
        let lifecycle = lifecycle();
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert(GRPC_TIMEOUT_HEADER, MetadataValue::from_static("-1S"));
        assert!(matches!(
            lifecycle.open(&request),
            Err(Error::InvalidArgument { .. })
        ));
        assert_eq!(lifecycle.inflight(), 0);
    }

    #[tokio::test]
    async fn shutdown_refuses_new_calls_and_cancels_stragglers() {
        let lifecycle = lifecycle();
        let straggler = lifecycle.open(&Request::new(())).unwrap();

        lifecycle.shutdown().await;

        assert!(!lifecycle.is_accepting());
        assert!(straggler.is_cancelled());
        assert_eq!(
            lifecycle.open(&Request::new(())).unwrap_err(),
            Error::ServiceShutdown
        );
    }

    #[tokio::test]
    async fn shutdown_waits_for_calls_that_finish_in_time() {
        let lifecycle = Arc::new(lifecycle());
        let ctx = lifecycle.open(&Request::new(())).unwrap();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            drop(ctx);
        });

        lifecycle.shutdown().await;
        assert_eq!(lifecycle.inflight(), 0);
    }
}
