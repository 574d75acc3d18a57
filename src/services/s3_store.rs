//! `BlobStore` backed by an S3-compatible API (Backblaze B2, MinIO, AWS).

use crate::{
    config::S3Config,
    models::multipart::{CompletedPart, Part, PartsPage},
    services::blob_store::{BlobStore, BlobStoreError, BlobStoreResult, join_url},
};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{Credentials, Region, RequestChecksumCalculation, SharedCredentialsProvider},
    error::{DisplayErrorContext, ProvideErrorMetadata},
    presigning::PresigningConfig,
    types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart},
};
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
    public_base_url: String,
}

impl S3BlobStore {
    /// Build a client from explicit settings, falling back to the ambient AWS
    /// credential chain when no static keys are configured.
    pub async fn connect(cfg: &S3Config) -> anyhow::Result<Self> {
        if cfg.bucket.is_empty() {
            anyhow::bail!("S3 bucket not configured");
        }

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()));

        match (cfg.access_key.as_deref(), cfg.secret_key.as_deref()) {
            (Some(ak), Some(sk)) => {
                let creds = Credentials::new(ak, sk, None, None, "static");
                loader = loader.credentials_provider(SharedCredentialsProvider::new(creds));
            }
            (None, None) => {}
            _ => anyhow::bail!("S3 credentials incomplete: both access key and secret key are required"),
        }

        let sdk_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            // Presigned URLs must not carry checksum parameters the browser cannot satisfy.
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired);
        if let Some(endpoint) = cfg.endpoint.as_deref() {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        let client = Client::from_conf(builder.build());

        let public_base_url = match (&cfg.public_base_url, &cfg.endpoint) {
            (Some(base), _) => base.clone(),
            (None, Some(endpoint)) => join_url(endpoint, &cfg.bucket),
            (None, None) => format!("https://{}.s3.{}.amazonaws.com", cfg.bucket, cfg.region),
        };

        info!(bucket = %cfg.bucket, region = %cfg.region, endpoint = ?cfg.endpoint, "S3 blob store configured");

        Ok(Self {
            client,
            bucket: cfg.bucket.clone(),
            public_base_url,
        })
    }

    fn presigning(
        expires_in: Duration,
        key: &str,
        upload_id: Option<&str>,
    ) -> BlobStoreResult<PresigningConfig> {
        PresigningConfig::expires_in(expires_in)
            .map_err(|e| BlobStoreError::operation("presign", key, upload_id, e.to_string()))
    }
}

/// Render an SDK error with its full source chain.
fn sdk_message<E: std::error::Error>(err: &E) -> String {
    DisplayErrorContext(err).to_string()
}

fn to_chrono(ts: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts.secs(), ts.subsec_nanos())
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn presign_put_object(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> BlobStoreResult<String> {
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(Self::presigning(expires_in, key, None)?)
            .await
            .map_err(|e| BlobStoreError::operation("PutObject presign", key, None, sdk_message(&e)))?;

        debug!(key = %key, expires_in_seconds = expires_in.as_secs(), "presigned PutObject");
        Ok(request.uri().to_string())
    }

    async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> BlobStoreResult<String> {
        let start = Instant::now();
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                error!(error = %sdk_message(&e), bucket = %self.bucket, key = %key, "CreateMultipartUpload failed");
                BlobStoreError::operation("CreateMultipartUpload", key, None, sdk_message(&e))
            })?;

        let upload_id = output.upload_id().map(str::to_string).ok_or_else(|| {
            BlobStoreError::operation("CreateMultipartUpload", key, None, "store returned no upload id")
        })?;

        info!(
            key = %key,
            upload_id = %upload_id,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "multipart upload created"
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
        let request = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .presigned(Self::presigning(expires_in, key, Some(upload_id))?)
            .await
            .map_err(|e| {
                BlobStoreError::operation("UploadPart presign", key, Some(upload_id), sdk_message(&e))
            })?;

        Ok(request.uri().to_string())
    }

    async fn list_parts_page(
        &self,
        key: &str,
        upload_id: &str,
        part_number_marker: Option<u32>,
    ) -> BlobStoreResult<PartsPage> {
        let output = self
            .client
            .list_parts()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .set_part_number_marker(part_number_marker.map(|m| m.to_string()))
            .send()
            .await
            .map_err(|e| {
                if e.code() == Some("NoSuchUpload") {
                    BlobStoreError::NoSuchUpload {
                        key: key.to_string(),
                        upload_id: upload_id.to_string(),
                    }
                } else {
                    BlobStoreError::operation("ListParts", key, Some(upload_id), sdk_message(&e))
                }
            })?;

        let parts = output
            .parts()
            .iter()
            .filter_map(|p| {
                let part_number = u32::try_from(p.part_number()?).ok()?;
                Some(Part {
                    part_number,
                    etag: p.e_tag().unwrap_or_default().to_string(),
                    size: p.size().unwrap_or(0).max(0) as u64,
                    last_modified: p.last_modified().and_then(to_chrono),
                })
            })
            .collect();

        Ok(PartsPage {
            parts,
            is_truncated: output.is_truncated().unwrap_or(false),
            next_part_number_marker: output
                .next_part_number_marker()
                .and_then(|m| m.parse().ok()),
        })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> BlobStoreResult<()> {
        let start = Instant::now();
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|p| {
                        S3CompletedPart::builder()
                            .part_number(p.part_number as i32)
                            .e_tag(&p.etag)
                            .build()
                    })
                    .collect(),
            ))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| {
                error!(error = %sdk_message(&e), key = %key, upload_id = %upload_id, "CompleteMultipartUpload failed");
                if e.code() == Some("NoSuchUpload") {
                    BlobStoreError::NoSuchUpload {
                        key: key.to_string(),
                        upload_id: upload_id.to_string(),
                    }
                } else {
                    BlobStoreError::operation(
                        "CompleteMultipartUpload",
                        key,
                        Some(upload_id),
                        sdk_message(&e),
                    )
                }
            })?;

        info!(
            key = %key,
            upload_id = %upload_id,
            parts = parts.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "multipart upload completed"
        );
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> BlobStoreResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| {
                if e.code() == Some("NoSuchUpload") {
                    BlobStoreError::NoSuchUpload {
                        key: key.to_string(),
                        upload_id: upload_id.to_string(),
                    }
                } else {
                    BlobStoreError::operation(
                        "AbortMultipartUpload",
                        key,
                        Some(upload_id),
                        sdk_message(&e),
                    )
                }
            })?;

        info!(key = %key, upload_id = %upload_id, "multipart upload aborted");
        Ok(())
    }

    async fn check(&self) -> BlobStoreResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| BlobStoreError::operation("HeadBucket", &self.bucket, None, sdk_message(&e)))
    }

    fn public_url(&self, key: &str) -> String {
        join_url(&self.public_base_url, key)
    }
}
