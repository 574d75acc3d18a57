//! Shared fixtures: an in-process upload service over the local store and a
//! transport that records every PUT it forwards.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use resumable_upload::{
    client::{
        BlobTransport, MemorySessionStore, PutResponse, TransportError, UploadOrchestrator,
    },
    models::upload::{UploadKind, UploadTarget},
    services::{
        local_store::LocalBlobStore,
        upload_service::{UploadPolicy, UploadService},
    },
};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

pub const OWNER: &str = "0x52908400098527886E0F7030069857D2E4169EE7";
pub const MIB: usize = 1024 * 1024;

pub fn target() -> UploadTarget {
    UploadTarget::new(OWNER, "export-42", UploadKind::Video)
}

/// Deterministic, non-repeating-per-part payload.
pub fn payload(len: usize) -> Bytes {
    Bytes::from(
        (0..len)
            .map(|i| (i % 251) as u8 ^ (i / MIB) as u8)
            .collect::<Vec<u8>>(),
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    None,
    /// Fail the nth PUT (1-based) at the network level.
    FailOnPut(usize),
    /// Report success for this part number without storing it.
    DropPart(u32),
    /// Store the part but report a different MD5 ETag.
    WrongEtag(u32),
}

/// Forwards PUTs to a `LocalBlobStore`, recording the part number of each
/// (`0` for single-object PUTs).
pub struct RecordingTransport {
    store: LocalBlobStore,
    fault: Fault,
    puts: Mutex<Vec<u32>>,
}

impl RecordingTransport {
    pub fn new(store: LocalBlobStore, fault: Fault) -> Arc<Self> {
        Arc::new(Self {
            store,
            fault,
            puts: Mutex::new(Vec::new()),
        })
    }

    pub fn parts_put(&self) -> Vec<u32> {
        self.puts.lock().unwrap().clone()
    }
}

fn part_number(url: &str) -> u32 {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == "partNumber")
                .and_then(|(_, v)| v.parse().ok())
        })
        .unwrap_or(0)
}

#[async_trait]
impl BlobTransport for RecordingTransport {
    async fn put(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: Bytes,
    ) -> Result<PutResponse, TransportError> {
        let part = part_number(url);
        let attempt = {
            let mut puts = self.puts.lock().unwrap();
            puts.push(part);
            puts.len()
        };

        match self.fault {
            Fault::FailOnPut(n) if n == attempt => {
                return Err(TransportError {
                    status: None,
                    message: "connection reset by peer".into(),
                });
            }
            Fault::DropPart(n) if n == part => {
                return Ok(PutResponse { etag: None });
            }
            _ => {}
        }

        let mut response = self.store.put(url, headers, body).await?;
        if matches!(self.fault, Fault::WrongEtag(n) if n == part) {
            response.etag = Some("\"00000000000000000000000000000000\"".into());
        }
        Ok(response)
    }
}

pub struct Harness {
    pub store: LocalBlobStore,
    pub service: UploadService,
    pub sessions: Arc<MemorySessionStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::over(LocalBlobStore::new("http://localhost:3000"))
    }

    /// A store that lists at most `page_size` parts per page.
    pub fn with_page_size(page_size: usize) -> Self {
        Self::over(LocalBlobStore::new("http://localhost:3000").with_page_size(page_size))
    }

    fn over(store: LocalBlobStore) -> Self {
        let service = UploadService::new(Arc::new(store.clone()), UploadPolicy::default());
        Self {
            store,
            service,
            sessions: Arc::new(MemorySessionStore::new()),
        }
    }

    pub fn transport(&self, fault: Fault) -> Arc<RecordingTransport> {
        RecordingTransport::new(self.store.clone(), fault)
    }

    pub fn orchestrator(&self, transport: Arc<RecordingTransport>) -> UploadOrchestrator {
        UploadOrchestrator::new(
            Arc::new(self.service.clone()),
            transport,
            self.sessions.clone(),
        )
    }
}
