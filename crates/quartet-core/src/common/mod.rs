//! Types shared by the server and any client of the quartet services.
//!
//! - [`error`] - the call error taxonomy and its `tonic::Status` mapping.
//! - [`types`] - document identifiers.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{DocumentId, format_document_id, parse_document_id};
