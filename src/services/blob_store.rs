//! The object-store seam.
//!
//! Everything the upload endpoints need from an S3-compatible store: presign,
//! initiate, list, complete and abort. The store owns all concurrency control
//! for a `(key, upload_id)`; implementations hold no per-upload state of
//! their own beyond what the store itself keeps.

use crate::models::multipart::{CompletedPart, PartsPage};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("multipart upload `{upload_id}` for `{key}` does not exist")]
    NoSuchUpload { key: String, upload_id: String },
    #[error("{operation} failed for `{key}`{}: {message}", upload_suffix(.upload_id))]
    Operation {
        operation: &'static str,
        key: String,
        upload_id: Option<String>,
        message: String,
    },
}

fn upload_suffix(upload_id: &Option<String>) -> String {
    upload_id
        .as_deref()
        .map(|id| format!(" (upload `{}`)", id))
        .unwrap_or_default()
}

impl BlobStoreError {
    pub fn operation(
        operation: &'static str,
        key: &str,
        upload_id: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        BlobStoreError::Operation {
            operation,
            key: key.to_string(),
            upload_id: upload_id.map(str::to_string),
            message: message.into(),
        }
    }
}

pub type BlobStoreResult<T> = Result<T, BlobStoreError>;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Presign a single-shot PUT of the whole object. The caller must send
    /// `Content-Type: {content_type}` with the upload.
    async fn presign_put_object(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> BlobStoreResult<String>;

    /// Start a multipart upload and return its upload id.
    async fn create_multipart_upload(&self, key: &str, content_type: &str)
    -> BlobStoreResult<String>;

    /// Presign a PUT for one part slot of an existing multipart upload.
    async fn presign_upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        expires_in: Duration,
    ) -> BlobStoreResult<String>;

    /// One page of committed parts, starting after `part_number_marker`.
    async fn list_parts_page(
        &self,
        key: &str,
        upload_id: &str,
        part_number_marker: Option<u32>,
    ) -> BlobStoreResult<PartsPage>;

    /// Stitch the object together from `parts`, which are already sorted.
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> BlobStoreResult<()>;

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> BlobStoreResult<()>;

    /// Cheap reachability probe used by `/readyz`.
    async fn check(&self) -> BlobStoreResult<()>;

    /// Public URL an object will be served from once it exists.
    fn public_url(&self, key: &str) -> String;
}

/// Join a base URL and an object key without doubling slashes.
pub fn join_url(base: &str, key: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        key.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_normalizes_slashes() {
        assert_eq!(join_url("https://cdn.example/", "/a/b"), "https://cdn.example/a/b");
        assert_eq!(join_url("https://cdn.example", "a/b"), "https://cdn.example/a/b");
    }

    #[test]
    fn errors_carry_upload_context() {
        let err = BlobStoreError::operation("ListParts", "k", Some("up-1"), "boom");
        assert_eq!(err.to_string(), "ListParts failed for `k` (upload `up-1`): boom");
        let err = BlobStoreError::operation("PutObject presign", "k", None, "boom");
        assert_eq!(err.to_string(), "PutObject presign failed for `k`: boom");
    }
}
