//! Client-local bookkeeping for an in-flight multipart upload.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Resume hint persisted per upload target.
///
/// Only ever a hint: what has actually landed is always re-read from the
/// store before anything is uploaded or completed. `part_size_bytes` is fixed
/// for the lifetime of the session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub key: String,
    pub upload_id: String,
    pub part_size_bytes: u64,
    pub size_bytes: u64,
    pub file_name: String,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

impl UploadSession {
    /// A session belongs to a file only while name, type and size all match.
    pub fn matches(&self, file_name: &str, content_type: &str, size_bytes: u64) -> bool {
        self.file_name == file_name
            && self.content_type == content_type
            && self.size_bytes == size_bytes
    }

    pub fn is_older_than(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.created_at) > max_age
    }

    pub fn total_parts(&self) -> u32 {
        self.size_bytes.div_ceil(self.part_size_bytes) as u32
    }

    /// Byte range `[start, end)` of a 1-based part number.
    pub fn part_range(&self, part_number: u32) -> (u64, u64) {
        let start = (part_number as u64 - 1) * self.part_size_bytes;
        let end = (start + self.part_size_bytes).min(self.size_bytes);
        (start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn session(size_bytes: u64) -> UploadSession {
        UploadSession {
            key: "uploads/0xabc/export-1/video/u-clip.mp4".into(),
            upload_id: "upload-1".into(),
            part_size_bytes: 10 * MIB,
            size_bytes,
            file_name: "clip.mp4".into(),
            content_type: "video/mp4".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn last_part_is_short() {
        let s = session(52 * MIB);
        assert_eq!(s.total_parts(), 6);
        assert_eq!(s.part_range(1), (0, 10 * MIB));
        assert_eq!(s.part_range(6), (50 * MIB, 52 * MIB));
    }

    #[test]
    fn any_field_mismatch_invalidates() {
        let s = session(52 * MIB);
        assert!(s.matches("clip.mp4", "video/mp4", 52 * MIB));
        assert!(!s.matches("clip.mp4", "video/mp4", 53 * MIB));
        assert!(!s.matches("other.mp4", "video/mp4", 52 * MIB));
        assert!(!s.matches("clip.mp4", "video/webm", 52 * MIB));
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let value = serde_json::to_value(session(6 * MIB)).unwrap();
        for field in [
            "key",
            "uploadId",
            "partSizeBytes",
            "sizeBytes",
            "fileName",
            "contentType",
            "createdAt",
        ] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
    }
}
