//! The control-plane calls the orchestrator makes: presign, sign, list,
//! complete and abort. Reachable over HTTP or, in-process, straight through
//! `UploadService`.

use crate::{
    client::{ClientError, ClientResult},
    errors::AppError,
    models::upload::{
        AbortRequest, AbortResponse, CompleteRequest, CompleteResponse, ListPartsQuery,
        ListPartsResponse, PresignRequest, PresignResponse, SignPartRequest, SignPartResponse,
    },
    services::upload_service::{UploadError, UploadService},
};
use async_trait::async_trait;
use serde::{Deserialize, de::DeserializeOwned};

#[async_trait]
pub trait UploadApi: Send + Sync {
    async fn presign(&self, req: &PresignRequest) -> ClientResult<PresignResponse>;
    async fn sign_part(&self, req: &SignPartRequest) -> ClientResult<SignPartResponse>;
    async fn list_parts(&self, key: &str, upload_id: &str) -> ClientResult<ListPartsResponse>;
    async fn complete(&self, req: &CompleteRequest) -> ClientResult<CompleteResponse>;
    async fn abort(&self, req: &AbortRequest) -> ClientResult<AbortResponse>;
}

/// Talks to a running `serve` instance.
#[derive(Clone)]
pub struct HttpUploadApi {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpUploadApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> ClientResult<T> {
        let response = request
            .send()
            .await
            .map_err(|e| ClientError::api(operation, None, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let fallback = status.canonical_reason().unwrap_or("request failed").to_string();
            let message = response
                .json::<ErrorBody>()
                .await
                .map(|body| body.error)
                .unwrap_or(fallback);
            return Err(ClientError::api(operation, Some(status.as_u16()), message));
        }

        response.json::<T>().await.map_err(|e| {
            ClientError::api(
                operation,
                Some(status.as_u16()),
                format!("decoding response: {}", e),
            )
        })
    }
}

#[async_trait]
impl UploadApi for HttpUploadApi {
    async fn presign(&self, req: &PresignRequest) -> ClientResult<PresignResponse> {
        self.send("presign", self.client.post(self.url("/presign")).json(req))
            .await
    }

    async fn sign_part(&self, req: &SignPartRequest) -> ClientResult<SignPartResponse> {
        self.send(
            "sign-part",
            self.client.post(self.url("/multipart/sign-part")).json(req),
        )
        .await
    }

    async fn list_parts(&self, key: &str, upload_id: &str) -> ClientResult<ListPartsResponse> {
        let query = ListPartsQuery {
            key: key.to_string(),
            upload_id: upload_id.to_string(),
        };
        self.send(
            "list-parts",
            self.client.get(self.url("/multipart/list-parts")).query(&query),
        )
        .await
    }

    async fn complete(&self, req: &CompleteRequest) -> ClientResult<CompleteResponse> {
        self.send(
            "complete",
            self.client.post(self.url("/multipart/complete")).json(req),
        )
        .await
    }

    async fn abort(&self, req: &AbortRequest) -> ClientResult<AbortResponse> {
        self.send(
            "abort",
            self.client.post(self.url("/multipart/abort")).json(req),
        )
        .await
    }
}

/// Same status the HTTP surface would have answered with.
fn service_error(operation: &'static str, err: UploadError) -> ClientError {
    let message = err.to_string();
    let status = AppError::from(err).status.as_u16();
    ClientError::api(operation, Some(status), message)
}

#[async_trait]
impl UploadApi for UploadService {
    async fn presign(&self, req: &PresignRequest) -> ClientResult<PresignResponse> {
        UploadService::presign(self, req)
            .await
            .map_err(|e| service_error("presign", e))
    }

    async fn sign_part(&self, req: &SignPartRequest) -> ClientResult<SignPartResponse> {
        UploadService::sign_part(self, req)
            .await
            .map_err(|e| service_error("sign-part", e))
    }

    async fn list_parts(&self, key: &str, upload_id: &str) -> ClientResult<ListPartsResponse> {
        UploadService::list_parts(self, key, upload_id)
            .await
            .map_err(|e| service_error("list-parts", e))
    }

    async fn complete(&self, req: &CompleteRequest) -> ClientResult<CompleteResponse> {
        UploadService::complete(self, req)
            .await
            .map_err(|e| service_error("complete", e))
    }

    async fn abort(&self, req: &AbortRequest) -> ClientResult<AbortResponse> {
        UploadService::abort(self, req)
            .await
            .map_err(|e| service_error("abort", e))
    }
}
