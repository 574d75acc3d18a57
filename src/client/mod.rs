//! Client side of the protocol: drives an upload from a local file to a
//! completed object, resuming across runs.

pub mod api;
pub mod orchestrator;
pub mod session_store;
pub mod source;
pub mod transport;

use thiserror::Error;

pub use api::{HttpUploadApi, UploadApi};
pub use orchestrator::{UploadOrchestrator, UploadOutcome, UploadProgress};
pub use session_store::{MemorySessionStore, SessionStore, SqliteSessionStore};
pub use source::{BytesSource, FileSource, UploadSource};
pub use transport::{BlobTransport, HttpBlobTransport, PutResponse, TransportError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("file is empty")]
    EmptyFile,

    #[error("{operation} failed{}: {message}", status_suffix(.status))]
    Api {
        operation: &'static str,
        status: Option<u16>,
        message: String,
    },

    #[error(
        "upload of `{key}`{} failed: {message}. Check that the bucket's CORS rules allow this \
         origin and expose the ETag header, and that the upload URL is HTTPS",
        part_suffix(.upload_id, .part_number)
    )]
    Transport {
        key: String,
        upload_id: Option<String>,
        part_number: Option<u32>,
        /// HTTP status from the store, `None` for network-level failures.
        status: Option<u16>,
        message: String,
    },

    #[error("upload `{upload_id}` of `{key}` has no ETag for parts {missing:?}; not completing")]
    Integrity {
        key: String,
        upload_id: String,
        missing: Vec<u32>,
    },

    #[error(
        "part {part_number} of upload `{upload_id}` for `{key}`: store returned ETag {actual}, \
         expected {expected}"
    )]
    EtagMismatch {
        key: String,
        upload_id: String,
        part_number: u32,
        expected: String,
        actual: String,
    },

    #[error("upload of `{key}` cancelled{}", upload_suffix(.upload_id))]
    Cancelled {
        key: String,
        upload_id: Option<String>,
    },

    #[error("session store: {0}")]
    Session(#[from] sqlx::Error),

    #[error("session encoding: {0}")]
    SessionFormat(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

fn part_suffix(upload_id: &Option<String>, part_number: &Option<u32>) -> String {
    match (upload_id, part_number) {
        (Some(id), Some(n)) => format!(" (upload `{}`, part {})", id, n),
        (Some(id), None) => format!(" (upload `{}`)", id),
        _ => String::new(),
    }
}

fn upload_suffix(upload_id: &Option<String>) -> String {
    upload_id
        .as_deref()
        .map(|id| format!("; upload `{}` kept for resume or abort", id))
        .unwrap_or_default()
}

impl ClientError {
    pub fn api(operation: &'static str, status: Option<u16>, message: impl Into<String>) -> Self {
        ClientError::Api {
            operation,
            status,
            message: message.into(),
        }
    }

    /// The API answered 404: the upload id is unknown to the store.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Api { status: Some(404), .. })
    }
}
