use super::lifecycle::InflightGuard;
use core::future::Future;
use core::time::Duration;
use quartet_core::{Error, Result};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-call cancellation and deadline signals.
///
/// Cloned into every task working on behalf of the call. The token is a child
/// of the service-wide shutdown token, so draining the service cancels every
/// call; the transport cancels it too when the caller drops a response stream
/// (see [`CallStream`](super::CallStream)).
#[derive(Clone, Debug)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
    // Keeps the call counted as in flight until the last clone is dropped.
    _admission: Option<Arc<InflightGuard>>,
}

impl CallContext {
    /// A context with no deadline, cancelled only through `token`.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
            _admission: None,
        }
    }

    /// Sets the deadline to `timeout` from now.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    #[must_use]
    pub(crate) fn with_admission(mut self, guard: InflightGuard) -> Self {
        self._admission = Some(Arc::new(guard));
        self
    }

    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Non-blocking check of both signals. Cancellation takes precedence.
    ///
    /// # Errors
    ///
    /// [`Error::RequestCancelled`] or [`Error::DeadlineExceeded`].
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::RequestCancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Error::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Resolves once the call is cancelled or its deadline passes, with the
    /// matching error.
    pub async fn done(&self) -> Error {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    () = self.token.cancelled() => Error::RequestCancelled,
                    () = tokio::time::sleep_until(deadline) => Error::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                Error::RequestCancelled
            }
        }
    }

    /// Runs one suspension point of the call.
    ///
    /// `fut` is abandoned as soon as the call is cancelled or times out. When
    /// both are ready in the same poll the signal wins, so no further work is
    /// produced after cancellation.
    ///
    /// # Errors
    ///
    /// The error of `fut`, or the error returned by [`CallContext::done`].
    pub async fn guard<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            res = fut => res,
        }
    }

    /// Sleeps for `duration` unless the call ends first.
    ///
    /// # Errors
    ///
    /// See [`CallContext::guard`].
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.guard(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}

/// Parses a `grpc-timeout` header value: at most 8 ASCII digits followed by a
/// unit (`H`, `M`, `S`, `m`, `u` or `n`).
///
/// # Errors
///
/// [`Error::InvalidArgument`] for anything else, including signed values.
pub fn parse_grpc_timeout(raw: &str) -> Result<Duration> {
    let invalid = || Error::invalid_argument(format!("Malformed grpc-timeout {raw:?}"));

    if !raw.is_ascii() || raw.len() < 2 {
        return Err(invalid());
    }
    let (digits, unit) = raw.split_at(raw.len() - 1);
    if digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let value: u64 = digits.parse().map_err(|_| invalid())?;

    match unit {
        "H" => Ok(Duration::from_secs(value * 3600)),
        "M" => Ok(Duration::from_secs(value * 60)),
        "S" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_millis(value)),
        "u" => Ok(Duration::from_micros(value)),
        "n" => Ok(Duration::from_nanos(value)),
        _ => Err(invalid()),
    }
}
