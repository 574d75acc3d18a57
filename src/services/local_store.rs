//! In-process `BlobStore` for local development and tests.
//!
//! Objects and pending multipart uploads live in memory. Presigned URLs point
//! back at this service (`PUT /local/{*key}`) and carry an expiry plus an
//! HMAC-SHA256 signature over the key, upload id, part number and content
//! type. Part ETags are the quoted hex MD5 of the part body, and a
//! completed object's ETag follows the S3 `md5(part md5s)-N` convention.

use crate::{
    models::multipart::{CompletedPart, Part, PartsPage},
    services::{
        blob_store::{BlobStore, BlobStoreError, BlobStoreResult, join_url},
        part_size::{MAX_PARTS, MIN_PART_SIZE},
    },
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Route prefix the local store's presigned URLs and public URLs live under.
pub const LOCAL_ROUTE_PREFIX: &str = "local";
const DEFAULT_PAGE_SIZE: usize = 1000;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocalStoreError {
    #[error("signature does not match")]
    SignatureMismatch,
    #[error("presigned URL expired")]
    Expired,
    #[error("multipart upload `{upload_id}` for `{key}` does not exist")]
    NoSuchUpload { key: String, upload_id: String },
    #[error("object `{0}` not found")]
    NoSuchKey(String),
    #[error("part {part_number}: {reason}")]
    InvalidPart { part_number: u32, reason: String },
    #[error("not a local store URL: {0}")]
    InvalidUrl(String),
    #[error("signing key rejected: {0}")]
    SigningKey(String),
}

/// Query string of a local presigned URL.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalPutQuery {
    pub upload_id: Option<String>,
    pub part_number: Option<u32>,
    pub expires: i64,
    pub signature: String,
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: String,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StoredPart {
    bytes: Bytes,
    etag: String,
    last_modified: DateTime<Utc>,
}

#[derive(Debug)]
struct PendingUpload {
    key: String,
    content_type: String,
    parts: BTreeMap<u32, StoredPart>,
}

#[derive(Debug, Default)]
struct LocalState {
    objects: HashMap<String, StoredObject>,
    uploads: HashMap<String, PendingUpload>,
}

#[derive(Clone)]
pub struct LocalBlobStore {
    state: Arc<Mutex<LocalState>>,
    base_url: String,
    secret: Vec<u8>,
    page_size: usize,
}

impl LocalBlobStore {
    /// `base_url` is the externally reachable address of this service.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(LocalState::default())),
            base_url: base_url.into(),
            secret: [Uuid::new_v4().into_bytes(), Uuid::new_v4().into_bytes()].concat(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Limit list-parts pages, to exercise pagination.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Keyed MAC over everything a presigned URL binds.
    fn mac(
        &self,
        key: &str,
        upload_id: Option<&str>,
        part_number: Option<u32>,
        content_type: &str,
        expires: i64,
    ) -> Result<HmacSha256, LocalStoreError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|err| LocalStoreError::SigningKey(err.to_string()))?;
        let part = part_number.map(|n| n.to_string()).unwrap_or_default();
        let to_sign = format!(
            "PUT\n{key}\n{}\n{part}\n{content_type}\n{expires}",
            upload_id.unwrap_or("")
        );
        mac.update(to_sign.as_bytes());
        Ok(mac)
    }

    fn sign(
        &self,
        key: &str,
        upload_id: Option<&str>,
        part_number: Option<u32>,
        content_type: &str,
        expires: i64,
    ) -> Result<String, LocalStoreError> {
        let tag = self
            .mac(key, upload_id, part_number, content_type, expires)?
            .finalize()
            .into_bytes();
        Ok(general_purpose::URL_SAFE_NO_PAD.encode(tag))
    }

    fn verify(
        &self,
        key: &str,
        upload_id: Option<&str>,
        part_number: Option<u32>,
        content_type: &str,
        query: &LocalPutQuery,
    ) -> Result<(), LocalStoreError> {
        let tag = general_purpose::URL_SAFE_NO_PAD
            .decode(&query.signature)
            .map_err(|_| LocalStoreError::SignatureMismatch)?;
        self.mac(key, upload_id, part_number, content_type, query.expires)?
            .verify_slice(&tag)
            .map_err(|_| LocalStoreError::SignatureMismatch)
    }

    fn presigned_url(
        &self,
        key: &str,
        upload_id: Option<&str>,
        part_number: Option<u32>,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String, LocalStoreError> {
        let expires = Utc::now().timestamp() + expires_in.as_secs() as i64;
        let signature = self.sign(key, upload_id, part_number, content_type, expires)?;
        let mut url = format!(
            "{}?expires={}&signature={}",
            self.object_url(key),
            expires,
            signature
        );
        if let (Some(upload_id), Some(part_number)) = (upload_id, part_number) {
            url.push_str(&format!("&uploadId={}&partNumber={}", upload_id, part_number));
        }
        Ok(url)
    }

    fn object_url(&self, key: &str) -> String {
        join_url(&self.base_url, &format!("{}/{}", LOCAL_ROUTE_PREFIX, key))
    }

    /// Accept bytes PUT to a presigned URL. Returns the quoted ETag.
    ///
    /// Re-putting the same part number overwrites that slot.
    pub async fn accept_put(
        &self,
        key: &str,
        query: &LocalPutQuery,
        content_type: Option<&str>,
        body: Bytes,
    ) -> Result<String, LocalStoreError> {
        if query.expires < Utc::now().timestamp() {
            return Err(LocalStoreError::Expired);
        }

        let etag = format!("\"{:x}\"", md5::compute(&body));
        let now = Utc::now();
        let mut state = self.state.lock().await;

        match (query.upload_id.as_deref(), query.part_number) {
            (Some(upload_id), Some(part_number)) => {
                self.verify(key, Some(upload_id), Some(part_number), "", query)?;
                if part_number == 0 || part_number as u64 > MAX_PARTS {
                    return Err(LocalStoreError::InvalidPart {
                        part_number,
                        reason: "part number out of range".into(),
                    });
                }
                let upload = state
                    .uploads
                    .get_mut(upload_id)
                    .filter(|u| u.key == key)
                    .ok_or_else(|| LocalStoreError::NoSuchUpload {
                        key: key.to_string(),
                        upload_id: upload_id.to_string(),
                    })?;
                debug!(key = %key, upload_id = %upload_id, part_number, size_bytes = body.len(), "part stored");
                upload.parts.insert(
                    part_number,
                    StoredPart {
                        bytes: body,
                        etag: etag.clone(),
                        last_modified: now,
                    },
                );
            }
            (None, None) => {
                let actual = content_type.unwrap_or_default();
                self.verify(key, None, None, actual, query)?;
                debug!(key = %key, size_bytes = body.len(), "object stored");
                state.objects.insert(
                    key.to_string(),
                    StoredObject {
                        bytes: body,
                        content_type: actual.to_string(),
                        etag: etag.clone(),
                        last_modified: now,
                    },
                );
            }
            _ => {
                return Err(LocalStoreError::InvalidUrl(
                    "uploadId and partNumber must be given together".into(),
                ));
            }
        }

        Ok(etag)
    }

    /// Accept a PUT addressed by full URL, for in-process clients that skip HTTP.
    pub async fn put_presigned(
        &self,
        url: &str,
        content_type: Option<&str>,
        body: Bytes,
    ) -> Result<String, LocalStoreError> {
        let parsed =
            reqwest::Url::parse(url).map_err(|e| LocalStoreError::InvalidUrl(e.to_string()))?;
        let marker = format!("/{}/", LOCAL_ROUTE_PREFIX);
        let key = parsed
            .path()
            .split_once(&marker)
            .map(|(_, key)| key.to_string())
            .ok_or_else(|| LocalStoreError::InvalidUrl(url.to_string()))?;

        let mut upload_id = None;
        let mut part_number = None;
        let mut expires = None;
        let mut signature = None;
        for (name, value) in parsed.query_pairs() {
            match name.as_ref() {
                "uploadId" => upload_id = Some(value.into_owned()),
                "partNumber" => part_number = value.parse().ok(),
                "expires" => expires = value.parse().ok(),
                "signature" => signature = Some(value.into_owned()),
                _ => {}
            }
        }
        let query = LocalPutQuery {
            upload_id,
            part_number,
            expires: expires.ok_or_else(|| LocalStoreError::InvalidUrl(url.to_string()))?,
            signature: signature.ok_or_else(|| LocalStoreError::InvalidUrl(url.to_string()))?,
        };

        self.accept_put(&key, &query, content_type, body).await
    }

    pub async fn get_object(&self, key: &str) -> Result<StoredObject, LocalStoreError> {
        self.state
            .lock()
            .await
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| LocalStoreError::NoSuchKey(key.to_string()))
    }

    /// Number of multipart uploads still open.
    pub async fn pending_uploads(&self) -> usize {
        self.state.lock().await.uploads.len()
    }
}

fn into_blob_error(
    err: LocalStoreError,
    operation: &'static str,
    key: &str,
    upload_id: &str,
) -> BlobStoreError {
    match err {
        LocalStoreError::NoSuchUpload { key, upload_id } => {
            BlobStoreError::NoSuchUpload { key, upload_id }
        }
        other => BlobStoreError::operation(operation, key, Some(upload_id), other.to_string()),
    }
}

fn unquote(etag: &str) -> &str {
    etag.trim().trim_matches('"')
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn presign_put_object(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> BlobStoreResult<String> {
        self.presigned_url(key, None, None, content_type, expires_in)
            .map_err(|err| BlobStoreError::operation("PutObject", key, None, err.to_string()))
    }

    async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> BlobStoreResult<String> {
        let upload_id = Uuid::new_v4().to_string();
        self.state.lock().await.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                content_type: content_type.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn presign_upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        expires_in: Duration,
    ) -> BlobStoreResult<String> {
        self.presigned_url(key, Some(upload_id), Some(part_number), "", expires_in)
            .map_err(|err| into_blob_error(err, "UploadPart", key, upload_id))
    }

    async fn list_parts_page(
        &self,
        key: &str,
        upload_id: &str,
        part_number_marker: Option<u32>,
    ) -> BlobStoreResult<PartsPage> {
        let state = self.state.lock().await;
        let upload = state
            .uploads
            .get(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| BlobStoreError::NoSuchUpload {
                key: key.to_string(),
                upload_id: upload_id.to_string(),
            })?;

        let after = part_number_marker.unwrap_or(0);
        let mut remaining = upload.parts.range(after + 1..).peekable();
        let mut parts = Vec::new();
        while parts.len() < self.page_size {
            let Some((number, part)) = remaining.next() else {
                break;
            };
            parts.push(Part {
                part_number: *number,
                etag: part.etag.clone(),
                size: part.bytes.len() as u64,
                last_modified: Some(part.last_modified),
            });
        }
        let is_truncated = remaining.peek().is_some();

        Ok(PartsPage {
            next_part_number_marker: if is_truncated {
                parts.last().map(|p| p.part_number)
            } else {
                None
            },
            is_truncated,
            parts,
        })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> BlobStoreResult<()> {
        let mut state = self.state.lock().await;
        let upload = state
            .uploads
            .get(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| BlobStoreError::NoSuchUpload {
                key: key.to_string(),
                upload_id: upload_id.to_string(),
            })?;

        let mut body = BytesMut::new();
        let mut digests = Vec::with_capacity(parts.len() * 16);
        let mut previous = 0;
        for (idx, requested) in parts.iter().enumerate() {
            let fail = |reason: &str| {
                into_blob_error(
                    LocalStoreError::InvalidPart {
                        part_number: requested.part_number,
                        reason: reason.to_string(),
                    },
                    "CompleteMultipartUpload",
                    key,
                    upload_id,
                )
            };
            if requested.part_number <= previous {
                return Err(fail("parts must be in ascending order"));
            }
            previous = requested.part_number;

            let stored = upload
                .parts
                .get(&requested.part_number)
                .ok_or_else(|| fail("part was never uploaded"))?;
            if unquote(&stored.etag) != unquote(&requested.etag) {
                return Err(fail("etag does not match"));
            }
            let is_last = idx + 1 == parts.len();
            if !is_last && (stored.bytes.len() as u64) < MIN_PART_SIZE {
                return Err(fail("entity too small"));
            }
            body.extend_from_slice(&stored.bytes);
            digests.extend_from_slice(&md5::compute(&stored.bytes).0);
        }

        let object = StoredObject {
            bytes: body.freeze(),
            content_type: upload.content_type.clone(),
            etag: format!("\"{:x}-{}\"", md5::compute(&digests), parts.len()),
            last_modified: Utc::now(),
        };
        state.uploads.remove(upload_id);
        state.objects.insert(key.to_string(), object);
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> BlobStoreResult<()> {
        let mut state = self.state.lock().await;
        match state.uploads.get(upload_id) {
            Some(upload) if upload.key == key => {
                state.uploads.remove(upload_id);
                Ok(())
            }
            _ => Err(BlobStoreError::NoSuchUpload {
                key: key.to_string(),
                upload_id: upload_id.to_string(),
            }),
        }
    }

    async fn check(&self) -> BlobStoreResult<()> {
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        self.object_url(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::part_size::MIB;

    fn store() -> LocalBlobStore {
        LocalBlobStore::new("http://localhost:3000")
    }

    fn part_bytes(fill: u8, len: u64) -> Bytes {
        Bytes::from(vec![fill; len as usize])
    }

    #[tokio::test]
    async fn single_put_round_trips() {
        let store = store();
        let url = store
            .presign_put_object("k/a.mp4", "video/mp4", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.starts_with("http://localhost:3000/local/k/a.mp4?"));

        let etag = store
            .put_presigned(&url, Some("video/mp4"), Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(etag, format!("\"{:x}\"", md5::compute(b"hello")));

        let object = store.get_object("k/a.mp4").await.unwrap();
        assert_eq!(&object.bytes[..], b"hello");
        assert_eq!(object.content_type, "video/mp4");
    }

    #[tokio::test]
    async fn single_put_rejects_other_content_type() {
        let store = store();
        let url = store
            .presign_put_object("k/a.mp4", "video/mp4", Duration::from_secs(60))
            .await
            .unwrap();
        let err = store
            .put_presigned(&url, Some("image/png"), Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert_eq!(err, LocalStoreError::SignatureMismatch);
    }

    #[tokio::test]
    async fn tampered_part_number_is_rejected() {
        let store = store();
        let upload_id = store.create_multipart_upload("k", "video/mp4").await.unwrap();
        let url = store
            .presign_upload_part("k", &upload_id, 1, Duration::from_secs(60))
            .await
            .unwrap();
        let forged = url.replace("partNumber=1", "partNumber=2");
        let err = store
            .put_presigned(&forged, None, Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert_eq!(err, LocalStoreError::SignatureMismatch);
    }

    #[tokio::test]
    async fn urls_from_another_store_are_rejected() {
        let issuer = store();
        let url = issuer
            .presign_put_object("k/a.mp4", "video/mp4", Duration::from_secs(60))
            .await
            .unwrap();
        let err = store()
            .put_presigned(&url, Some("video/mp4"), Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert_eq!(err, LocalStoreError::SignatureMismatch);

        let signature = url.split("signature=").nth(1).unwrap();
        let garbled = url.replace(signature, "not*base64");
        let err = issuer
            .put_presigned(&garbled, Some("video/mp4"), Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert_eq!(err, LocalStoreError::SignatureMismatch);
    }

    #[tokio::test]
    async fn expired_urls_are_rejected() {
        let store = store();
        let query = LocalPutQuery {
            upload_id: None,
            part_number: None,
            expires: Utc::now().timestamp() - 1,
            signature: String::new(),
        };
        let err = store
            .accept_put("k", &query, Some("video/mp4"), Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err, LocalStoreError::Expired);
    }

    #[tokio::test]
    async fn list_parts_paginates() {
        let store = store().with_page_size(2);
        let upload_id = store.create_multipart_upload("k", "video/mp4").await.unwrap();
        for n in 1..=5u32 {
            let url = store
                .presign_upload_part("k", &upload_id, n, Duration::from_secs(60))
                .await
                .unwrap();
            store
                .put_presigned(&url, None, part_bytes(n as u8, 10))
                .await
                .unwrap();
        }

        let first = store.list_parts_page("k", &upload_id, None).await.unwrap();
        assert_eq!(first.parts.len(), 2);
        assert!(first.is_truncated);
        assert_eq!(first.next_part_number_marker, Some(2));

        let last = store.list_parts_page("k", &upload_id, Some(4)).await.unwrap();
        assert_eq!(last.parts.len(), 1);
        assert!(!last.is_truncated);
        assert_eq!(last.next_part_number_marker, None);
    }

    #[tokio::test]
    async fn completion_checks_etags_and_sizes() {
        let store = store();
        let upload_id = store.create_multipart_upload("k", "video/mp4").await.unwrap();
        let mut completed = Vec::new();
        for (n, len) in [(1u32, 5 * MIB), (2, 3)] {
            let url = store
                .presign_upload_part("k", &upload_id, n, Duration::from_secs(60))
                .await
                .unwrap();
            let etag = store
                .put_presigned(&url, None, part_bytes(n as u8, len))
                .await
                .unwrap();
            completed.push(CompletedPart {
                part_number: n,
                etag,
            });
        }

        let mut wrong = completed.clone();
        wrong[1].etag = "\"deadbeef\"".into();
        assert!(
            store
                .complete_multipart_upload("k", &upload_id, &wrong)
                .await
                .is_err()
        );

        store
            .complete_multipart_upload("k", &upload_id, &completed)
            .await
            .unwrap();
        let object = store.get_object("k").await.unwrap();
        assert_eq!(object.bytes.len() as u64, 5 * MIB + 3);
        assert!(object.etag.ends_with("-2\""));
        assert_eq!(store.pending_uploads().await, 0);
    }

    #[tokio::test]
    async fn small_leading_parts_are_rejected() {
        let store = store();
        let upload_id = store.create_multipart_upload("k", "video/mp4").await.unwrap();
        let mut completed = Vec::new();
        for n in 1..=2u32 {
            let url = store
                .presign_upload_part("k", &upload_id, n, Duration::from_secs(60))
                .await
                .unwrap();
            let etag = store.put_presigned(&url, None, part_bytes(1, 10)).await.unwrap();
            completed.push(CompletedPart {
                part_number: n,
                etag,
            });
        }
        let err = store
            .complete_multipart_upload("k", &upload_id, &completed)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("entity too small"));
    }

    #[tokio::test]
    async fn abort_discards_parts() {
        let store = store();
        let upload_id = store.create_multipart_upload("k", "video/mp4").await.unwrap();
        store.abort_multipart_upload("k", &upload_id).await.unwrap();
        assert!(matches!(
            store.list_parts_page("k", &upload_id, None).await,
            Err(BlobStoreError::NoSuchUpload { .. })
        ));
        assert!(matches!(
            store.abort_multipart_upload("k", &upload_id).await,
            Err(BlobStoreError::NoSuchUpload { .. })
        ));
    }
}
