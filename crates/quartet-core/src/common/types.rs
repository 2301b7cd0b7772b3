//! # Document Identifier Types
//!
//! Documents are keyed by 128-bit ULIDs generated by the storage engine when a
//! record is inserted. On the wire an identifier is its 26-character Crockford
//! Base32 rendering, which sorts lexicographically in creation order.
//!
//! - [`DocumentId`] - the identifier type (backed by [`ULID`])
//! - [`DOCUMENT_ID_LEN`] - length of the Base32 rendering
//! - [`parse_document_id`] / [`format_document_id`] - wire conversions
//!
//! A string that does not decode is an [`Error::InvalidArgument`], never a
//! "not found": the caller sent something that cannot name a document at all.

use crate::{Error, Result};
use ferroid::base32::Base32UlidExt;
use ferroid::id::ULID;

/// The identifier assigned to every stored document.
pub type DocumentId = ULID;

/// Number of characters in the Base32 form of a [`DocumentId`].
pub const DOCUMENT_ID_LEN: usize = 26;

/// Parses the wire form of a document identifier.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] when `raw` is not exactly
/// [`DOCUMENT_ID_LEN`] Crockford Base32 characters, or when it encodes a value
/// wider than 128 bits.
pub fn parse_document_id(raw: &str) -> Result<DocumentId> {
    // 26 characters carry 130 bits; the decoder drops the top two instead of
    // failing, which would alias a different id.
    if raw.bytes().next().is_some_and(|first| first > b'7') {
        return Err(Error::invalid_argument(format!(
            "Cannot parse id {raw:?}: value exceeds 128 bits"
        )));
    }
    DocumentId::decode(raw)
        .map_err(|e| Error::invalid_argument(format!("Cannot parse id {raw:?}: {e}")))
}

/// Renders a document identifier in its wire form.
pub fn format_document_id(id: &DocumentId) -> String {
    id.encode().to_string()
}
