//! Client-local persistence of in-flight multipart sessions, one per upload
//! target. Entries are resume hints only; the store's part list always wins.

use crate::{
    client::ClientResult,
    models::{session::UploadSession, upload::UploadTarget},
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{
    Pool, Sqlite,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{collections::HashMap, path::Path, str::FromStr, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const MIGRATION: &str = include_str!("../../migrations/0001_upload_sessions.sql");

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, target: &UploadTarget) -> ClientResult<Option<UploadSession>>;
    async fn save(&self, target: &UploadTarget, session: &UploadSession) -> ClientResult<()>;
    async fn clear(&self, target: &UploadTarget) -> ClientResult<()>;
}

#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<Mutex<HashMap<String, UploadSession>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, target: &UploadTarget) -> ClientResult<Option<UploadSession>> {
        Ok(self.sessions.lock().await.get(&target.storage_id()).cloned())
    }

    async fn save(&self, target: &UploadTarget, session: &UploadSession) -> ClientResult<()> {
        self.sessions
            .lock()
            .await
            .insert(target.storage_id(), session.clone());
        Ok(())
    }

    async fn clear(&self, target: &UploadTarget) -> ClientResult<()> {
        self.sessions.lock().await.remove(&target.storage_id());
        Ok(())
    }
}

/// Sessions as JSON blobs in a SQLite table, keyed by `UploadTarget::storage_id`.
#[derive(Clone)]
pub struct SqliteSessionStore {
    db: Arc<Pool<Sqlite>>,
}

impl SqliteSessionStore {
    /// Open (creating if needed) the database at `url` and apply the schema.
    pub async fn connect(url: &str) -> ClientResult<Self> {
        let path = url.trim_start_matches("sqlite://").trim_start_matches("file:");
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                info!("Created missing directory {:?}", parent);
            }
        }

        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { db: Arc::new(db) };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> ClientResult<()> {
        let statements = MIGRATION
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("Running {} migration statements...", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn load(&self, target: &UploadTarget) -> ClientResult<Option<UploadSession>> {
        let target_id = target.storage_id();
        let row: Option<String> =
            sqlx::query_scalar("SELECT session FROM upload_sessions WHERE target_id = ?")
                .bind(&target_id)
                .fetch_optional(&*self.db)
                .await?;

        let Some(json) = row else {
            return Ok(None);
        };
        match serde_json::from_str::<UploadSession>(&json) {
            Ok(session) => Ok(Some(session)),
            Err(err) => {
                warn!(target_id = %target_id, error = %err, "discarding unreadable upload session");
                self.clear(target).await?;
                Ok(None)
            }
        }
    }

    async fn save(&self, target: &UploadTarget, session: &UploadSession) -> ClientResult<()> {
        let json = serde_json::to_string(session)?;
        sqlx::query(
            "INSERT INTO upload_sessions (target_id, session, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(target_id) DO UPDATE SET
                session = excluded.session,
                updated_at = excluded.updated_at",
        )
        .bind(target.storage_id())
        .bind(json)
        .bind(Utc::now().to_rfc3339())
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn clear(&self, target: &UploadTarget) -> ClientResult<()> {
        sqlx::query("DELETE FROM upload_sessions WHERE target_id = ?")
            .bind(target.storage_id())
            .execute(&*self.db)
            .await?;
        Ok(())
    }
}
