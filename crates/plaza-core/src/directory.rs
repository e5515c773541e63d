//! Writer identity directory
//!
//! Maps presented credentials onto writer records. Raw keys are never
//! stored; a writer record lives under the SHA-256 hex digest of its key,
//! so a directory dump leaks no credentials.
//!
//! Who gets to be a writer is decided elsewhere (operator tooling, an
//! external auth layer); this module only stores and resolves records.

use crate::error::{Error, Result};
use crate::store::KeySchema;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// A registered canvas writer (API-key identity).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterRecord {
    /// Stable writer id, used for cooldowns and attribution.
    pub id: String,
    /// Display name attached to published updates.
    pub name: String,
    /// Inactive writers still authenticate but may not place pixels.
    pub active: bool,
}

/// A browser session (session-token identity).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Stable user id, used for cooldowns and attribution.
    pub user_id: String,
    /// Display name.
    pub username: String,
    /// Spectators may watch but not place pixels.
    #[serde(default)]
    pub spectator: bool,
    /// Per-session cooldown override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_seconds: Option<u64>,
}

/// Credential resolution for both identity modes.
#[async_trait]
pub trait WriterDirectory: Send + Sync {
    /// Look up a writer by the SHA-256 hex digest of its key.
    async fn find_by_key_hash(&self, key_hash: &str) -> Result<Option<WriterRecord>>;

    /// Look up a session by its token.
    async fn find_session(&self, token: &str) -> Result<Option<SessionRecord>>;

    /// Store a writer record under `key_hash`, replacing any existing one.
    async fn insert_writer(&self, key_hash: &str, record: &WriterRecord) -> Result<()>;

    /// Store a session record under `token`, replacing any existing one.
    async fn insert_session(&self, token: &str, record: &SessionRecord) -> Result<()>;
}

/// Hex SHA-256 digest of a presented credential.
#[must_use]
pub fn hash_credential(credential: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(credential.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Issue a fresh key and store an active writer record for it.
///
/// Returns the raw key. It is shown exactly once; only its digest is
/// stored, so it cannot be recovered later.
pub async fn register_writer(
    directory: &dyn WriterDirectory,
    id: impl Into<String>,
    name: impl Into<String>,
) -> Result<String> {
    let raw_key = format!("plaza_{}", Uuid::new_v4().as_simple());
    let record = WriterRecord {
        id: id.into(),
        name: name.into(),
        active: true,
    };
    directory
        .insert_writer(&hash_credential(&raw_key), &record)
        .await?;
    debug!(writer_id = %record.id, "writer registered");
    Ok(raw_key)
}

/// In-memory [`WriterDirectory`] for tests and single-process dev.
#[derive(Default)]
pub struct MemoryDirectory {
    writers: RwLock<HashMap<String, WriterRecord>>,
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WriterDirectory for MemoryDirectory {
    async fn find_by_key_hash(&self, key_hash: &str) -> Result<Option<WriterRecord>> {
        let writers = self.writers.read().await;
        Ok(writers.get(key_hash).cloned())
    }

    async fn find_session(&self, token: &str) -> Result<Option<SessionRecord>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(token).cloned())
    }

    async fn insert_writer(&self, key_hash: &str, record: &WriterRecord) -> Result<()> {
        let mut writers = self.writers.write().await;
        writers.insert(key_hash.to_string(), record.clone());
        Ok(())
    }

    async fn insert_session(&self, token: &str, record: &SessionRecord) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(token.to_string(), record.clone());
        Ok(())
    }
}

/// Redis-backed [`WriterDirectory`], sharing the deployment's key schema.
///
/// Records are stored as JSON so operator tooling in any language can
/// provision writers.
pub struct RedisDirectory {
    client: redis::Client,
    keys: KeySchema,
}

impl RedisDirectory {
    /// Create a directory over an existing Redis deployment.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn new(redis_url: &str, keys: KeySchema) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::persistence(format!("invalid Redis URL: {e}")))?;
        Ok(Self { client, keys })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::persistence(format!("Redis connection failed: {e}")))
    }
}

#[async_trait]
impl WriterDirectory for RedisDirectory {
    async fn find_by_key_hash(&self, key_hash: &str) -> Result<Option<WriterRecord>> {
        let mut conn = self.get_connection().await?;
        let key = self.keys.writer(key_hash);

        let data: Option<String> = redis::cmd("GET")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::persistence(format!("Redis GET failed: {e}")))?;

        match data {
            Some(json) => {
                let record: WriterRecord = serde_json::from_str(&json)
                    .map_err(|e| Error::persistence(format!("bad writer record: {e}")))?;
                debug!(writer_id = %record.id, "writer record loaded");
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn find_session(&self, token: &str) -> Result<Option<SessionRecord>> {
        let mut conn = self.get_connection().await?;
        let key = self.keys.session(token);

        let data: Option<String> = redis::cmd("GET")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::persistence(format!("Redis GET failed: {e}")))?;

        match data {
            Some(json) => {
                let record: SessionRecord = serde_json::from_str(&json)
                    .map_err(|e| Error::persistence(format!("bad session record: {e}")))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn insert_writer(&self, key_hash: &str, record: &WriterRecord) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let key = self.keys.writer(key_hash);

        let json = serde_json::to_string(record)
            .map_err(|e| Error::persistence(format!("serialize writer record failed: {e}")))?;

        redis::cmd("SET")
            .arg(&key)
            .arg(&json)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| Error::persistence(format!("Redis SET failed: {e}")))?;
        Ok(())
    }

    async fn insert_session(&self, token: &str, record: &SessionRecord) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let key = self.keys.session(token);

        let json = serde_json::to_string(record)
            .map_err(|e| Error::persistence(format!("serialize session record failed: {e}")))?;

        redis::cmd("SET")
            .arg(&key)
            .arg(&json)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| Error::persistence(format!("Redis SET failed: {e}")))?;
        Ok(())
    }
}
