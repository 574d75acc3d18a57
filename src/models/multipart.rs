//! Multipart parts as reported by the object store and as sent back for completion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A part that has landed durably under a multipart upload.
///
/// Parts are never stored by the client; they are always re-queried from the
/// store, which is the only authority on what has been uploaded.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Part number (1-based).
    pub part_number: u32,

    /// ETag the store assigned to this part.
    pub etag: String,

    /// Size in bytes.
    pub size: u64,

    /// When the store last accepted bytes for this part number.
    pub last_modified: Option<DateTime<Utc>>,
}

/// The `{partNumber, etag}` pair the store needs to stitch an object together.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

impl From<&Part> for CompletedPart {
    fn from(part: &Part) -> Self {
        Self {
            part_number: part.part_number,
            etag: part.etag.clone(),
        }
    }
}

/// One page of a list-parts call.
#[derive(Clone, Debug, Default)]
pub struct PartsPage {
    pub parts: Vec<Part>,
    pub is_truncated: bool,
    /// Marker to pass on the next call when `is_truncated` is set.
    pub next_part_number_marker: Option<u32>,
}
