//! Raw byte transfer to presigned URLs.

use crate::{errors::AppError, services::local_store::LocalBlobStore};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Default)]
pub struct PutResponse {
    /// `None` when the store's CORS rules hide the header from the caller.
    pub etag: Option<String>,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportError {
    /// HTTP status of a rejected PUT; `None` when no answer arrived.
    pub status: Option<u16>,
    pub message: String,
}

#[async_trait]
pub trait BlobTransport: Send + Sync {
    async fn put(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: Bytes,
    ) -> Result<PutResponse, TransportError>;
}

#[derive(Clone, Default)]
pub struct HttpBlobTransport {
    client: reqwest::Client,
}

impl HttpBlobTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BlobTransport for HttpBlobTransport {
    async fn put(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: Bytes,
    ) -> Result<PutResponse, TransportError> {
        let mut request = self.client.put(url).body(body);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| TransportError {
            status: None,
            message: format!("network error: {}", e),
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TransportError {
                status: Some(status.as_u16()),
                message: format!("store answered {}: {}", status, text.trim()),
            });
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(PutResponse { etag })
    }
}

/// Writes straight into an in-process store, skipping HTTP.
#[async_trait]
impl BlobTransport for LocalBlobStore {
    async fn put(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: Bytes,
    ) -> Result<PutResponse, TransportError> {
        let content_type = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.as_str());

        let etag = self
            .put_presigned(url, content_type, body)
            .await
            .map_err(|e| {
                let message = e.to_string();
                TransportError {
                    status: Some(AppError::from(e).status.as_u16()),
                    message,
                }
            })?;
        Ok(PutResponse { etag: Some(etag) })
    }
}
