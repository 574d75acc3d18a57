//! UploadService: the stateless half of the resumable upload protocol.
//!
//! Validates requests, derives object keys, sizes parts and issues presigned
//! URLs. Nothing is remembered between calls: the object store is the only
//! durable record of an upload's progress.

use crate::{
    models::{
        multipart::{CompletedPart, Part},
        upload::{
            AbortRequest, AbortResponse, CompleteRequest, CompleteResponse, ListPartsResponse,
            PresignRequest, PresignResponse, SignPartRequest, SignPartResponse,
        },
    },
    services::{
        blob_store::{BlobStore, BlobStoreError},
        keys,
        part_size::{self, MAX_PARTS, MULTIPART_THRESHOLD, PartCountExceeded},
    },
};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_PRESIGN_EXPIRY: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error(transparent)]
    PartCount(#[from] PartCountExceeded),
    #[error("file too large: {size_bytes} bytes exceeds the {max_bytes} byte limit")]
    TooLarge { size_bytes: u64, max_bytes: u64 },
    #[error("incomplete part list for upload `{upload_id}` of `{key}`: {reason}")]
    Integrity {
        key: String,
        upload_id: String,
        reason: String,
    },
    #[error(transparent)]
    Store(#[from] BlobStoreError),
}

pub type UploadResult<T> = Result<T, UploadError>;

/// Server-side knobs; see `config::ServerConfig`.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    /// First key segment, e.g. `uploads`.
    pub key_domain: String,
    pub max_upload_bytes: u64,
    pub presign_expiry: Duration,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            key_domain: "uploads".into(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            presign_expiry: DEFAULT_PRESIGN_EXPIRY,
        }
    }
}

#[derive(Clone)]
pub struct UploadService {
    store: Arc<dyn BlobStore>,
    policy: UploadPolicy,
}

/// Owners are `0x`-prefixed 20-byte hex addresses.
pub fn is_valid_owner(owner: &str) -> bool {
    owner.len() == 42
        && (owner.starts_with("0x") || owner.starts_with("0X"))
        && owner[2..].bytes().all(|b| b.is_ascii_hexdigit())
}

impl UploadService {
    pub fn new(store: Arc<dyn BlobStore>, policy: UploadPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    fn expires_in_seconds(&self) -> u64 {
        self.policy.presign_expiry.as_secs()
    }

    fn validate_presign(&self, req: &PresignRequest) -> UploadResult<Vec<String>> {
        if !is_valid_owner(&req.owner) {
            return Err(UploadError::Validation(format!(
                "owner `{}` is not a 0x-prefixed 40-hex-digit address",
                req.owner
            )));
        }
        let context = keys::context_path(&req.context_id).ok_or_else(|| {
            UploadError::Validation(format!("contextId `{}` is empty or invalid", req.context_id))
        })?;
        if req.size_bytes == 0 {
            return Err(UploadError::Validation("sizeBytes must be positive".into()));
        }
        if !req.kind.accepts(&req.content_type) {
            return Err(UploadError::Validation(format!(
                "content type `{}` is not allowed for kind `{}` (expected {}*)",
                req.content_type,
                req.kind,
                req.kind.content_type_family()
            )));
        }
        if req.size_bytes > self.policy.max_upload_bytes {
            return Err(UploadError::TooLarge {
                size_bytes: req.size_bytes,
                max_bytes: self.policy.max_upload_bytes,
            });
        }
        Ok(context)
    }

    /// Keys handed back by clients must be ones this service could have issued.
    fn validate_upload_ref(&self, key: &str, upload_id: &str) -> UploadResult<()> {
        let mut segments = key.split('/');
        let in_domain = segments.next() == Some(self.policy.key_domain.as_str());
        let mut rest = segments.peekable();
        let well_formed =
            rest.peek().is_some() && rest.all(|s| !matches!(s, "" | "." | ".."));
        if !in_domain || !well_formed {
            return Err(UploadError::Validation(format!("key `{}` is not an upload key", key)));
        }
        if upload_id.trim().is_empty() {
            return Err(UploadError::Validation("uploadId is required".into()));
        }
        Ok(())
    }

    /// Plan an upload: one presigned PUT below the multipart threshold, a
    /// fresh multipart upload otherwise. Every check runs before the store is
    /// contacted.
    pub async fn presign(&self, req: &PresignRequest) -> UploadResult<PresignResponse> {
        let context = self.validate_presign(req)?;

        if req.size_bytes < MULTIPART_THRESHOLD {
            let key = keys::build_key(
                &self.policy.key_domain,
                &req.owner,
                &context,
                req.kind,
                &req.file_name,
                Uuid::new_v4(),
            );
            let upload_url = self
                .store
                .presign_put_object(&key, &req.content_type, self.policy.presign_expiry)
                .await?;
            info!(key = %key, size_bytes = req.size_bytes, "issued single-PUT upload");
            return Ok(PresignResponse::Single {
                public_url: self.store.public_url(&key),
                upload_url,
                required_headers: BTreeMap::from([(
                    "Content-Type".to_string(),
                    req.content_type.clone(),
                )]),
                expires_in_seconds: self.expires_in_seconds(),
                key,
            });
        }

        let plan = part_size::compute_part_size(req.size_bytes)?;
        let key = keys::build_key(
            &self.policy.key_domain,
            &req.owner,
            &context,
            req.kind,
            &req.file_name,
            Uuid::new_v4(),
        );
        let upload_id = self
            .store
            .create_multipart_upload(&key, &req.content_type)
            .await?;
        info!(
            key = %key,
            upload_id = %upload_id,
            size_bytes = req.size_bytes,
            part_size_bytes = plan.part_size_bytes,
            total_parts = plan.total_parts,
            "initiated multipart upload"
        );

        Ok(PresignResponse::Multipart {
            public_url: self.store.public_url(&key),
            upload_id,
            part_size_bytes: plan.part_size_bytes,
            expires_in_seconds: self.expires_in_seconds(),
            key,
        })
    }

    /// Presign one part slot. Side-effect free; re-signing an uploaded part is harmless.
    pub async fn sign_part(&self, req: &SignPartRequest) -> UploadResult<SignPartResponse> {
        self.validate_upload_ref(&req.key, &req.upload_id)?;
        if req.part_number == 0 || req.part_number as u64 > MAX_PARTS {
            return Err(UploadError::Validation(format!(
                "partNumber {} outside 1..={}",
                req.part_number, MAX_PARTS
            )));
        }

        let upload_url = self
            .store
            .presign_upload_part(
                &req.key,
                &req.upload_id,
                req.part_number,
                self.policy.presign_expiry,
            )
            .await?;
        debug!(key = %req.key, upload_id = %req.upload_id, part_number = req.part_number, "signed part");

        Ok(SignPartResponse {
            upload_url,
            expires_in_seconds: self.expires_in_seconds(),
        })
    }

    /// Every part committed under `upload_id`, following pagination to the end.
    pub async fn list_parts(&self, key: &str, upload_id: &str) -> UploadResult<ListPartsResponse> {
        self.validate_upload_ref(key, upload_id)?;

        let mut parts: Vec<Part> = Vec::new();
        let mut marker = None;
        loop {
            let page = self.store.list_parts_page(key, upload_id, marker).await?;
            parts.extend(page.parts);
            if !page.is_truncated {
                break;
            }
            // Markers must advance, or a misbehaving store pages forever.
            match page.next_part_number_marker {
                Some(next) if marker.is_none_or(|previous| next > previous) => {
                    marker = Some(next)
                }
                next => {
                    warn!(key = %key, upload_id = %upload_id, ?marker, ?next, "list-parts truncated without a usable marker");
                    return Err(UploadError::Store(BlobStoreError::operation(
                        "ListParts",
                        key,
                        Some(upload_id),
                        format!("truncated page after marker {:?} did not advance", marker),
                    )));
                }
            }
        }

        parts.sort_by_key(|p| p.part_number);
        debug!(key = %key, upload_id = %upload_id, parts = parts.len(), "listed parts");
        Ok(ListPartsResponse { parts })
    }

    /// Finalize the upload. Caller order is not trusted: parts are sorted by
    /// number and must form the unbroken run `1..=N`, each with an ETag.
    pub async fn complete(&self, req: &CompleteRequest) -> UploadResult<CompleteResponse> {
        self.validate_upload_ref(&req.key, &req.upload_id)?;

        let mut parts: Vec<CompletedPart> = req.parts.clone();
        parts.sort_by_key(|p| p.part_number);
        let integrity = |reason: String| UploadError::Integrity {
            key: req.key.clone(),
            upload_id: req.upload_id.clone(),
            reason,
        };
        if parts.is_empty() {
            return Err(integrity("no parts given".into()));
        }
        for (idx, part) in parts.iter().enumerate() {
            let expected = idx as u32 + 1;
            if part.part_number != expected {
                return Err(integrity(format!(
                    "expected part {} but found {}",
                    expected, part.part_number
                )));
            }
            if part.etag.trim().is_empty() {
                return Err(integrity(format!("part {} has no ETag", part.part_number)));
            }
        }

        self.store
            .complete_multipart_upload(&req.key, &req.upload_id, &parts)
            .await?;

        Ok(CompleteResponse {
            key: req.key.clone(),
            public_url: self.store.public_url(&req.key),
        })
    }

    /// Cancel a multipart upload and release its parts. Only ever called on
    /// explicit user request.
    pub async fn abort(&self, req: &AbortRequest) -> UploadResult<AbortResponse> {
        self.validate_upload_ref(&req.key, &req.upload_id)?;
        self.store
            .abort_multipart_upload(&req.key, &req.upload_id)
            .await?;
        info!(key = %req.key, upload_id = %req.upload_id, "multipart upload aborted by caller");
        Ok(AbortResponse { ok: true })
    }
}
