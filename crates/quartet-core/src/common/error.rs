//! Error types for the quartet services.
//!
//! This module defines the central `Error` enum, the single taxonomy every
//! domain and storage failure is funneled into before it reaches a caller. It
//! implements `From<Error>` for `tonic::Status`, which is the only place a
//! failure is turned into a wire status, so every call shape reports errors the
//! same way.
//!
//! ## Error Cases
//! - `InvalidArgument`: malformed identifiers, negative square-root input,
//!   non-positive factorization input, malformed call deadlines.
//! - `NotFound`: no document matches the identifier.
//! - `DeadlineExceeded`: the call deadline passed at a suspension point.
//! - `RequestCancelled`: the call was cancelled (caller went away or the
//!   service is draining).
//! - `Internal`: storage failures and accumulators finalized on an undefined
//!   state (e.g. the average of nothing).
//! - `ChannelError`: an internal hand-off between call tasks broke.
//! - `ServiceShutdown`: a call arrived after shutdown began.

use tonic::{Code, Status};

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for the quartet services.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The request (or its call metadata) is malformed.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// The referenced record does not exist.
    #[error("Not found: {context}")]
    NotFound { context: String },

    /// The call deadline expired before the call completed.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// The call was cancelled before it completed.
    #[error("Request cancelled")]
    RequestCancelled,

    /// A dependency failed or the call reached an undefined state.
    #[error("Internal error: {context}")]
    Internal { context: String },

    /// Internal channel send/receive failure between the tasks of one call.
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub fn not_found(context: impl Into<String>) -> Self {
        Self::NotFound {
            context: context.into(),
        }
    }

    pub fn internal(context: impl Into<String>) -> Self {
        Self::Internal {
            context: context.into(),
        }
    }

    /// The status code this error is reported with.
    pub const fn code(&self) -> Code {
        match self {
            Self::InvalidArgument { .. } => Code::InvalidArgument,
            Self::NotFound { .. } => Code::NotFound,
            Self::DeadlineExceeded => Code::DeadlineExceeded,
            Self::RequestCancelled => Code::Cancelled,
            Self::Internal { .. } | Self::ChannelError { .. } => Code::Internal,
            Self::ServiceShutdown => Code::Unavailable,
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidArgument { reason } => Status::invalid_argument(reason),
            Error::NotFound { context } => Status::not_found(context),
            Error::DeadlineExceeded => Status::deadline_exceeded("Deadline exceeded"),
            Error::RequestCancelled => Status::cancelled("Request was cancelled"),
            Error::Internal { context } => Status::internal(context),
            Error::ChannelError { context } => {
                Status::internal(format!("Channel error: {context}"))
            }
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
        }
    }
}

/// Maps a failure reported by the transport on an inbound stream back into the
/// taxonomy. Cancellation and deadlines keep their meaning; anything else is a
/// broken channel.
impl From<Status> for Error {
    fn from(status: Status) -> Self {
        match status.code() {
            Code::Cancelled => Self::RequestCancelled,
            Code::DeadlineExceeded => Self::DeadlineExceeded,
            _ => Self::ChannelError {
                context: status.message().to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_maps_to_its_status_code() {
        let cases = [
            (Error::invalid_argument("bad"), Code::InvalidArgument),
            (Error::not_found("gone"), Code::NotFound),
            (Error::DeadlineExceeded, Code::DeadlineExceeded),
            (Error::RequestCancelled, Code::Cancelled),
            (Error::internal("boom"), Code::Internal),
            (
                Error::ChannelError {
                    context: "closed".into(),
                },
                Code::Internal,
            ),
            (Error::ServiceShutdown, Code::Unavailable),
        ];

        for (err, code) in cases {
            assert_eq!(err.code(), code);
            assert_eq!(Status::from(err).code(), code);
        }
    }

    #[test]
    fn status_message_carries_the_reason() {
        let status = Status::from(Error::invalid_argument("Received negative number : -23"));
        assert_eq!(status.message(), "Received negative number : -23");
    }

    #[test]
    fn inbound_status_keeps_cancellation_and_deadline() {
        assert_eq!(
            Error::from(Status::cancelled("gone")),
            Error::RequestCancelled
        );
        assert_eq!(
            Error::from(Status::deadline_exceeded("late")),
            Error::DeadlineExceeded
        );
        assert_eq!(
            Error::from(Status::unknown("h2 reset")),
            Error::ChannelError {
                context: "h2 reset".into()
            }
        );
    }
}
