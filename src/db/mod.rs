pub mod operations;
pub mod schema;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serializes mutations per subject while letting different subjects run concurrently.
#[derive(Default)]
struct SubjectLocks {
    inner: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SubjectLocks {
    fn handle(&self, subject: &str) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock();
        Arc::clone(map.entry(subject.to_string()).or_default())
    }
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    locks: Arc<SubjectLocks>,
}

impl Store {
    pub async fn connect(path: &Path) -> Result<Self, DbInitError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DbInitError::Io(e.to_string()))?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Single-connection in-memory database; the connection is never recycled
    /// because closing it would drop the data.
    pub async fn in_memory() -> Result<Self, DbInitError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self, DbInitError> {
        schema::run_migrations(&pool).await?;
        Ok(Self {
            pool,
            locks: Arc::new(SubjectLocks::default()),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Held for the duration of one read-recompute-persist step on `subject`.
    pub async fn subject_lock(&self, subject: &str) -> OwnedMutexGuard<()> {
        self.locks.handle(subject).lock_owned().await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("studyhub")
        .join("engine.db")
}

#[derive(Debug, Error)]
pub enum DbInitError {
    #[error("IO error: {0}")]
    Io(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Wraps a JSON column decode failure as a sqlx decode error.
pub(crate) fn decode_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, sqlx::Error> {
    serde_json::from_str(raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

/// sqlx 0.7 has no encode variant; a value that cannot become JSON is reported as a protocol error.
pub(crate) fn encode_json<T: serde::Serialize>(value: &T) -> Result<String, sqlx::Error> {
    serde_json::to_string(value).map_err(|e| sqlx::Error::Protocol(format!("JSON encode failed: {e}")))
}
