//! UploadOrchestrator: drives one file to a completed object.
//!
//! Plans the upload once, persists a session for multipart uploads, then
//! uploads the parts the store does not already hold, one at a time. The
//! store's part list is the only authority on progress: it is read before
//! the first part and again before completing, and completion never runs
//! with a gap. Cancellation is checked between parts and aborts the PUT in
//! flight; the session survives so a later call resumes where this one
//! stopped.

use crate::{
    client::{
        ClientError, ClientResult,
        api::UploadApi,
        session_store::SessionStore,
        source::UploadSource,
        transport::BlobTransport,
    },
    models::{
        multipart::{CompletedPart, Part},
        session::UploadSession,
        upload::{
            AbortRequest, CompleteRequest, PresignRequest, PresignResponse, SignPartRequest,
            UploadTarget,
        },
    },
};
use bytes::Bytes;
use chrono::Utc;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Stores drop unfinished multipart uploads after about a week; older
/// sessions are not worth resuming.
pub const DEFAULT_MAX_SESSION_AGE_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub key: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
}

impl UploadProgress {
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        self.uploaded_bytes as f64 * 100.0 / self.total_bytes as f64
    }
}

enum Plan {
    Single {
        key: String,
        public_url: String,
        upload_url: String,
        required_headers: BTreeMap<String, String>,
    },
    Multipart(UploadSession),
}

#[derive(Clone)]
pub struct UploadOrchestrator {
    api: Arc<dyn UploadApi>,
    transport: Arc<dyn BlobTransport>,
    sessions: Arc<dyn SessionStore>,
    max_session_age: chrono::Duration,
}

impl UploadOrchestrator {
    pub fn new(
        api: Arc<dyn UploadApi>,
        transport: Arc<dyn BlobTransport>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            api,
            transport,
            sessions,
            max_session_age: chrono::Duration::days(DEFAULT_MAX_SESSION_AGE_DAYS),
        }
    }

    /// Stored sessions older than this are discarded instead of resumed.
    pub fn with_max_session_age(mut self, max_session_age: chrono::Duration) -> Self {
        self.max_session_age = max_session_age;
        self
    }

    /// Upload `source` to `target`, resuming a stored session when it still
    /// describes the same file.
    pub async fn upload_file(
        &self,
        target: &UploadTarget,
        source: &dyn UploadSource,
        mut on_progress: impl FnMut(UploadProgress) + Send,
        cancel: &CancellationToken,
    ) -> ClientResult<UploadOutcome> {
        let total_bytes = source.size();
        if total_bytes == 0 {
            return Err(ClientError::EmptyFile);
        }

        let mut resumed = self.resumable_session(target, source).await?;
        loop {
            let was_resumed = resumed.is_some();
            let session = match resumed.take() {
                Some(session) => session,
                None => match self.plan(target, source).await? {
                    Plan::Single {
                        key,
                        public_url,
                        upload_url,
                        required_headers,
                    } => {
                        return self
                            .put_single(
                                source,
                                key,
                                public_url,
                                &upload_url,
                                &required_headers,
                                &mut on_progress,
                                cancel,
                            )
                            .await;
                    }
                    Plan::Multipart(session) => {
                        self.sessions.save(target, &session).await?;
                        session
                    }
                },
            };

            let listed = match self.api.list_parts(&session.key, &session.upload_id).await {
                Ok(listed) => listed.parts,
                Err(err) if was_resumed && err.is_not_found() => {
                    warn!(
                        key = %session.key,
                        upload_id = %session.upload_id,
                        "stored upload no longer exists; starting over"
                    );
                    self.sessions.clear(target).await?;
                    continue;
                }
                Err(err) => return Err(err),
            };

            let outcome = self
                .upload_parts(&session, listed, source, &mut on_progress, cancel)
                .await?;
            self.sessions.clear(target).await?;
            return Ok(outcome);
        }
    }

    /// Abort the stored multipart upload for `target`, if any. Returns
    /// whether there was one.
    pub async fn abort(&self, target: &UploadTarget) -> ClientResult<bool> {
        let Some(session) = self.sessions.load(target).await? else {
            return Ok(false);
        };

        let req = AbortRequest {
            key: session.key.clone(),
            upload_id: session.upload_id.clone(),
        };
        match self.api.abort(&req).await {
            Ok(_) => {
                info!(key = %session.key, upload_id = %session.upload_id, "upload aborted");
            }
            Err(err) if err.is_not_found() => {
                debug!(key = %session.key, upload_id = %session.upload_id, "upload already gone");
            }
            Err(err) => return Err(err),
        }
        self.sessions.clear(target).await?;
        Ok(true)
    }

    async fn resumable_session(
        &self,
        target: &UploadTarget,
        source: &dyn UploadSource,
    ) -> ClientResult<Option<UploadSession>> {
        let Some(session) = self.sessions.load(target).await? else {
            return Ok(None);
        };

        let reason = if !session.matches(source.file_name(), source.content_type(), source.size())
        {
            Some("file changed")
        } else if session.is_older_than(self.max_session_age, Utc::now()) {
            Some("session expired")
        } else if session.part_size_bytes == 0 {
            Some("invalid part size")
        } else {
            None
        };

        match reason {
            Some(reason) => {
                info!(key = %session.key, upload_id = %session.upload_id, reason, "discarding stored session");
                self.sessions.clear(target).await?;
                Ok(None)
            }
            None => {
                info!(key = %session.key, upload_id = %session.upload_id, "resuming upload");
                Ok(Some(session))
            }
        }
    }

    async fn plan(&self, target: &UploadTarget, source: &dyn UploadSource) -> ClientResult<Plan> {
        let req = PresignRequest {
            owner: target.owner.clone(),
            context_id: target.context_id.clone(),
            kind: target.kind,
            file_name: source.file_name().to_string(),
            content_type: source.content_type().to_string(),
            size_bytes: source.size(),
        };

        let presigned = self.api.presign(&req).await?;
        debug!(key = %presigned.key(), size_bytes = req.size_bytes, "upload planned");
        Ok(match presigned {
            PresignResponse::Single {
                key,
                public_url,
                upload_url,
                required_headers,
                ..
            } => Plan::Single {
                key,
                public_url,
                upload_url,
                required_headers,
            },
            PresignResponse::Multipart {
                key,
                upload_id,
                part_size_bytes,
                ..
            } => Plan::Multipart(UploadSession {
                key,
                upload_id,
                part_size_bytes,
                size_bytes: req.size_bytes,
                file_name: req.file_name,
                content_type: req.content_type,
                created_at: Utc::now(),
            }),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn put_single(
        &self,
        source: &dyn UploadSource,
        key: String,
        public_url: String,
        upload_url: &str,
        headers: &BTreeMap<String, String>,
        on_progress: &mut (impl FnMut(UploadProgress) + Send),
        cancel: &CancellationToken,
    ) -> ClientResult<UploadOutcome> {
        let total_bytes = source.size();
        on_progress(UploadProgress {
            uploaded_bytes: 0,
            total_bytes,
        });

        let body = source.read_range(0, total_bytes).await?;
        self.put(&key, None, None, upload_url, headers, body, cancel)
            .await?;

        on_progress(UploadProgress {
            uploaded_bytes: total_bytes,
            total_bytes,
        });
        info!(key = %key, size_bytes = total_bytes, "single upload finished");
        Ok(UploadOutcome {
            key,
            url: public_url,
        })
    }

    async fn upload_parts(
        &self,
        session: &UploadSession,
        listed: Vec<Part>,
        source: &dyn UploadSource,
        on_progress: &mut (impl FnMut(UploadProgress) + Send),
        cancel: &CancellationToken,
    ) -> ClientResult<UploadOutcome> {
        let start = Instant::now();
        let total_parts = session.total_parts();
        let total_bytes = session.size_bytes;

        // A listed part only counts if it has the size this session expects
        // for its slot; anything else is overwritten.
        let present: HashMap<u32, Part> = listed
            .into_iter()
            .filter(|p| p.part_number >= 1 && p.part_number <= total_parts)
            .filter(|p| {
                let (from, to) = session.part_range(p.part_number);
                p.size == to - from && !p.etag.trim().is_empty()
            })
            .map(|p| (p.part_number, p))
            .collect();

        let mut uploaded_bytes: u64 = present.values().map(|p| p.size).sum();
        on_progress(UploadProgress {
            uploaded_bytes,
            total_bytes,
        });
        if !present.is_empty() {
            info!(
                key = %session.key,
                upload_id = %session.upload_id,
                parts_present = present.len(),
                total_parts,
                "skipping parts already in the store"
            );
        }

        for part_number in 1..=total_parts {
            if present.contains_key(&part_number) {
                continue;
            }
            if cancel.is_cancelled() {
                return Err(self.cancelled(session));
            }

            let (from, to) = session.part_range(part_number);
            let body = source.read_range(from, to).await?;
            let expected_etag = format!("{:x}", md5::compute(&body));

            let signed = self
                .api
                .sign_part(&SignPartRequest {
                    key: session.key.clone(),
                    upload_id: session.upload_id.clone(),
                    part_number,
                })
                .await?;

            let etag = self
                .put(
                    &session.key,
                    Some(&session.upload_id),
                    Some(part_number),
                    &signed.upload_url,
                    &BTreeMap::new(),
                    body,
                    cancel,
                )
                .await?;

            if let Some(actual) = etag.as_deref().map(unquote) {
                if is_md5_hex(actual) && !actual.eq_ignore_ascii_case(&expected_etag) {
                    return Err(ClientError::EtagMismatch {
                        key: session.key.clone(),
                        upload_id: session.upload_id.clone(),
                        part_number,
                        expected: expected_etag,
                        actual: actual.to_string(),
                    });
                }
            }

            uploaded_bytes += to - from;
            on_progress(UploadProgress {
                uploaded_bytes,
                total_bytes,
            });
            debug!(
                key = %session.key,
                upload_id = %session.upload_id,
                part_number,
                size_bytes = to - from,
                "part uploaded"
            );
        }

        if cancel.is_cancelled() {
            return Err(self.cancelled(session));
        }

        let parts = self.final_parts(session, total_parts).await?;
        let completed = self
            .api
            .complete(&CompleteRequest {
                key: session.key.clone(),
                upload_id: session.upload_id.clone(),
                parts,
            })
            .await?;

        info!(
            key = %session.key,
            upload_id = %session.upload_id,
            size_bytes = total_bytes,
            total_parts,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "multipart upload finished"
        );
        Ok(UploadOutcome {
            key: completed.key,
            url: completed.public_url,
        })
    }

    /// Re-read the part list and build the completion list for `1..=total_parts`.
    async fn final_parts(
        &self,
        session: &UploadSession,
        total_parts: u32,
    ) -> ClientResult<Vec<CompletedPart>> {
        let listed = self
            .api
            .list_parts(&session.key, &session.upload_id)
            .await?
            .parts;
        let committed: HashMap<u32, Part> = listed
            .into_iter()
            .filter(|p| !p.etag.trim().is_empty())
            .map(|p| (p.part_number, p))
            .collect();

        let missing: Vec<u32> = (1..=total_parts)
            .filter(|n| !committed.contains_key(n))
            .collect();
        if !missing.is_empty() {
            return Err(ClientError::Integrity {
                key: session.key.clone(),
                upload_id: session.upload_id.clone(),
                missing,
            });
        }

        Ok((1..=total_parts)
            .filter_map(|n| committed.get(&n).map(CompletedPart::from))
            .collect())
    }

    /// PUT one body, racing it against cancellation.
    #[allow(clippy::too_many_arguments)]
    async fn put(
        &self,
        key: &str,
        upload_id: Option<&str>,
        part_number: Option<u32>,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> ClientResult<Option<String>> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ClientError::Cancelled {
                    key: key.to_string(),
                    upload_id: upload_id.map(str::to_string),
                });
            }
            result = self.transport.put(url, headers, body) => result,
        };

        result
            .map(|response| response.etag)
            .map_err(|err| ClientError::Transport {
                key: key.to_string(),
                upload_id: upload_id.map(str::to_string),
                part_number,
                status: err.status,
                message: err.to_string(),
            })
    }

    fn cancelled(&self, session: &UploadSession) -> ClientError {
        info!(key = %session.key, upload_id = %session.upload_id, "upload cancelled; session kept");
        ClientError::Cancelled {
            key: session.key.clone(),
            upload_id: Some(session.upload_id.clone()),
        }
    }
}

fn unquote(etag: &str) -> &str {
    etag.trim().trim_matches('"')
}

fn is_md5_hex(etag: &str) -> bool {
    etag.len() == 32 && etag.bytes().all(|b| b.is_ascii_hexdigit())
}
