//! Storage collaborator contract
//!
//! The relay core never talks to a database directly. Agent records go
//! through [`DirectoryStorage`] and channel entries through
//! [`ChannelStorage`]; every method is atomic at single-record or
//! single-entry granularity, so callers need no locking of their own.
//!
//! Two backends ship with the crate:
//! - [`MemoryStorage`]: in-process maps, lost on restart
//! - [`SqliteStorage`]: a single SQLite file via rusqlite

mod memory;
mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

use crate::config::{StorageBackend, StorageConfig};
use crate::directory::{AgentRecord, AgentStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid key pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Predicate over agent records, evaluated inside the backend
pub type RecordPredicate<'a> = &'a (dyn Fn(&AgentRecord) -> bool + Send + Sync);

/// A single mutable field of an [`AgentRecord`]
#[derive(Debug, Clone, PartialEq)]
pub enum AgentField {
    ContextSummary(String),
    LastHeartbeat(DateTime<Utc>),
    Status(AgentStatus),
}

impl AgentField {
    /// Apply this field to a record in place
    pub fn apply(&self, record: &mut AgentRecord) {
        match self {
            AgentField::ContextSummary(summary) => record.context_summary = summary.clone(),
            AgentField::LastHeartbeat(at) => record.last_heartbeat = *at,
            AgentField::Status(status) => record.status = *status,
        }
    }
}

/// Outcome of a conditional field update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldUpdate {
    /// Fields were written
    Applied,
    /// No record with that id
    Missing,
    /// Record exists but the guard predicate rejected it
    Skipped,
}

/// Agent record storage
#[async_trait]
pub trait DirectoryStorage: Send + Sync {
    /// Insert a record unless the id is already taken
    ///
    /// Returns `false` (and writes nothing) on collision.
    async fn put(&self, record: &AgentRecord) -> StorageResult<bool>;

    async fn get(&self, agent_id: &str) -> StorageResult<Option<AgentRecord>>;

    async fn exists(&self, agent_id: &str) -> StorageResult<bool>;

    /// All records matching `predicate`, in agent id order
    async fn scan(&self, predicate: RecordPredicate<'_>) -> StorageResult<Vec<AgentRecord>>;

    /// Write `fields` to one record
    ///
    /// When `guard` is given it is re-evaluated against the current record
    /// inside the same critical section as the write.
    async fn update_fields(
        &self,
        agent_id: &str,
        fields: &[AgentField],
        guard: Option<RecordPredicate<'_>>,
    ) -> StorageResult<FieldUpdate>;

    /// Delete one record, optionally guarded like `update_fields`
    async fn remove(
        &self,
        agent_id: &str,
        guard: Option<RecordPredicate<'_>>,
    ) -> StorageResult<FieldUpdate>;
}

/// Bounded append-only channel storage
///
/// Payloads are opaque strings to the backend. Each channel also keeps an
/// append counter that trimming never decrements.
#[async_trait]
pub trait ChannelStorage: Send + Sync {
    /// Append one entry and bump the channel's historical counter
    async fn append(&self, key: &str, payload: &str) -> StorageResult<()>;

    /// Drop the oldest entries beyond `max_len`, returning how many went
    async fn trim(&self, key: &str, max_len: usize) -> StorageResult<usize>;

    /// Up to `count` entries starting `offset` from the newest, most recent first
    async fn range(&self, key: &str, offset: usize, count: usize) -> StorageResult<Vec<String>>;

    /// Channel keys matching a glob pattern such as `dm:*`
    async fn scan_keys(&self, pattern: &str) -> StorageResult<Vec<String>>;

    /// Entries ever appended to `key`, including trimmed ones
    async fn appended_total(&self, key: &str) -> StorageResult<u64>;

    /// Cheap reachability check for health reporting
    async fn ping(&self) -> StorageResult<()>;
}

/// Both halves of an opened backend
#[derive(Clone)]
pub struct Backends {
    pub directory: Arc<dyn DirectoryStorage>,
    pub channels: Arc<dyn ChannelStorage>,
}

impl Backends {
    /// Share one backend value for both roles
    pub fn shared<S>(storage: S) -> Self
    where
        S: DirectoryStorage + ChannelStorage + 'static,
    {
        let storage = Arc::new(storage);
        Self {
            directory: storage.clone(),
            channels: storage,
        }
    }

    /// Fresh in-memory backend
    pub fn memory() -> Self {
        Self::shared(MemoryStorage::new())
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}

/// Open the backend selected by configuration
pub fn open(config: &StorageConfig) -> StorageResult<Backends> {
    match config.backend {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory storage");
            Ok(Backends::memory())
        }
        StorageBackend::Sqlite => {
            let storage = SqliteStorage::open(&config.path, config.wal_mode)?;
            tracing::info!(path = %config.path.display(), "Using SQLite storage");
            Ok(Backends::shared(storage))
        }
    }
}

/// Match channel keys against a glob pattern
pub(crate) fn filter_keys<I>(keys: I, pattern: &str) -> StorageResult<Vec<String>>
where
    I: IntoIterator<Item = String>,
{
    let pattern = glob::Pattern::new(pattern)?;
    let mut matched: Vec<String> = keys.into_iter().filter(|k| pattern.matches(k)).collect();
    matched.sort();
    Ok(matched)
}
