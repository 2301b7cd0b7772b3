//! The call handler set.
//!
//! Every RPC is driven by exactly one of four handlers, selected by the
//! method's [`Shape`]:
//!
//! - [`unary`] - one request, one response.
//! - [`server_streaming`] - one request, a lazily produced response stream.
//! - [`client_streaming`] - a request stream folded into one response.
//! - [`bidi_streaming`] - independent inbound and outbound loops joined at
//!   completion.
//!
//! Services only supply domain logic (a future, a stream, a [`Fold`] or a
//! [`Scan`]). Deadline and cancellation checks at suspension points, stream
//! session bookkeeping, error mapping and per-call logging/metrics live here
//! and are shared by every service.

mod bidi;
mod client_stream;
mod context;
mod lifecycle;
mod server_stream;
mod session;
mod stream;
mod unary;

pub use bidi::bidi_streaming;
pub use client_stream::client_streaming;
pub use context::{CallContext, parse_grpc_timeout};
pub use lifecycle::Lifecycle;
pub use server_stream::server_streaming;
pub use session::{DirectionState, Fold, Scan, StreamSession};
pub use stream::CallStream;
pub use unary::unary;

use crate::server::telemetry::{record_call_finished, record_call_started};
use core::fmt;
use quartet_core::Error;
use std::time::Instant;

/// The four interaction shapes a method can have.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Shape {
    Unary,
    ServerStream,
    ClientStream,
    BidiStream,
}

impl Shape {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unary => "unary",
            Self::ServerStream => "server-stream",
            Self::ClientStream => "client-stream",
            Self::BidiStream => "bidi-stream",
        }
    }

    /// Whether calls of this shape carry a [`StreamSession`].
    pub const fn has_session(self) -> bool {
        !matches!(self, Self::Unary)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of one RPC method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Method {
    /// Fully qualified service name, e.g. `calculator.CalculatorService`.
    pub service: &'static str,
    /// Method name as written in the `.proto` file.
    pub name: &'static str,
    pub shape: Shape,
}

impl Method {
    pub const fn new(service: &'static str, name: &'static str, shape: Shape) -> Self {
        Self {
            service,
            name,
            shape,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.service, self.name)
    }
}

/// Accounting for one call from admission to its terminal status.
///
/// Handlers create it when the call starts and consume it with
/// [`CallRecord::finish`] exactly once, which logs and records the outcome.
pub(crate) struct CallRecord {
    method: &'static Method,
    started: Instant,
}

impl CallRecord {
    pub(crate) fn begin(method: &'static Method) -> Self {
        record_call_started(method);
        tracing::debug!(method = %method, shape = %method.shape, "call started");
        Self {
            method,
            started: Instant::now(),
        }
    }

    pub(crate) fn finish<T>(self, outcome: &Result<T, Error>) {
        let elapsed = self.started.elapsed();
        let code = match outcome {
            Ok(_) => {
                tracing::debug!(method = %self.method, ?elapsed, "call completed");
                tonic::Code::Ok
            }
            Err(e) => {
                tracing::warn!(method = %self.method, ?elapsed, code = ?e.code(), "call failed: {e}");
                e.code()
            }
        };
        record_call_finished(self.method, elapsed.as_secs_f64() * 1000.0, code);
    }
}

/// Span wrapping the whole execution of a call, including spawned tasks.
pub(crate) fn call_span(method: &'static Method) -> tracing::Span {
    tracing::info_span!(
        "call",
        service = method.service,
        method = method.name,
        shape = method.shape.as_str()
    )
}
