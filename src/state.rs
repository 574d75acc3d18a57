use crate::services::{local_store::LocalBlobStore, upload_service::UploadService};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub uploads: UploadService,
    /// Present only when running against the in-process store; backs the
    /// `/local/{*key}` routes its presigned URLs point at.
    pub local: Option<LocalBlobStore>,
    /// Origins browsers may call from; `*` allows any.
    pub cors_origins: Vec<String>,
}

impl AppState {
    pub fn new(uploads: UploadService) -> Self {
        Self {
            uploads,
            local: None,
            cors_origins: vec!["*".to_string()],
        }
    }

    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }

    pub fn with_local_store(mut self, local: LocalBlobStore) -> Self {
        self.local = Some(local);
        self
    }
}
