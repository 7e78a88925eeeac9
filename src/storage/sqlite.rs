//! SQLite storage backend
//!
//! One database file holds the agent directory and every channel. Channel
//! entries live in a single table ordered by an autoincrement sequence, which
//! is what gives each channel its insertion order.
//!
//! rusqlite is synchronous, so every statement runs on the blocking pool via
//! `tokio::task::spawn_blocking` and runtime workers never wait on disk.
//! Guarded writes read a snapshot, evaluate the guard on the async side and
//! then commit only if the row still matches that snapshot.

use super::{
    filter_keys, AgentField, ChannelStorage, DirectoryStorage, FieldUpdate, RecordPredicate,
    StorageError, StorageResult,
};
use crate::directory::{AgentRecord, AgentStatus};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

const AGENT_COLUMNS: &str =
    "agent_id, context_summary, registered_at, last_heartbeat, status, endpoint";

/// Attempts at a guarded write before giving up on a contended row
const MAX_WRITE_ATTEMPTS: usize = 8;

/// SQLite-backed directory and channel storage
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage").finish_non_exhaustive()
    }
}

impl SqliteStorage {
    /// Open or create a database file
    pub fn open(path: &Path, wal_mode: bool) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::debug!(path = %path.display(), "Opening relay database");
        let conn = Connection::open(path)?;

        if wal_mode {
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }

        Self::with_connection(conn)
    }

    /// Private in-memory database, mostly for tests
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `op` against the connection on the blocking pool
    async fn blocking<T, F>(&self, op: F) -> StorageResult<T>
    where
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| StorageError::Backend("database connection lock poisoned".into()))?;
            op(&mut conn)
        })
        .await
        .map_err(|e| StorageError::Backend(format!("database task failed: {e}")))?
    }

    /// Guarded write loop shared by `update_fields` and `remove`
    ///
    /// `change` maps the current record to what should be stored, `None`
    /// meaning delete.
    async fn write_guarded<F>(
        &self,
        agent_id: &str,
        guard: Option<RecordPredicate<'_>>,
        change: F,
    ) -> StorageResult<FieldUpdate>
    where
        F: Fn(&AgentRecord) -> Option<AgentRecord>,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let Some(snapshot) = self.get(agent_id).await? else {
                return Ok(FieldUpdate::Missing);
            };
            if let Some(guard) = guard {
                if !guard(&snapshot) {
                    return Ok(FieldUpdate::Skipped);
                }
            }

            let replacement = change(&snapshot);
            let outcome = self
                .blocking(move |conn| store_if_unchanged(conn, &snapshot, replacement.as_ref()))
                .await?;
            match outcome {
                Some(outcome) => return Ok(outcome),
                None => tracing::trace!(agent_id, attempt, "Agent row changed, retrying write"),
            }
        }

        Err(StorageError::Backend(format!(
            "agent '{agent_id}' changed on every one of {MAX_WRITE_ATTEMPTS} write attempts"
        )))
    }
}

fn init_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS agents (
            agent_id TEXT PRIMARY KEY,
            context_summary TEXT NOT NULL,
            registered_at TEXT NOT NULL,
            last_heartbeat TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            endpoint TEXT
        );

        CREATE TABLE IF NOT EXISTS channel_entries (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            channel_key TEXT NOT NULL,
            payload TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS channel_counters (
            channel_key TEXT PRIMARY KEY,
            appended INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_agents_status ON agents(status);
        CREATE INDEX IF NOT EXISTS idx_channel_entries_key ON channel_entries(channel_key, seq);
        "#,
    )?;
    Ok(())
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<AgentRecord> {
    let registered_at: String = row.get(2)?;
    let last_heartbeat: String = row.get(3)?;
    let status: String = row.get(4)?;

    Ok(AgentRecord {
        agent_id: row.get(0)?,
        context_summary: row.get(1)?,
        registered_at: parse_ts(2, &registered_at)?,
        last_heartbeat: parse_ts(3, &last_heartbeat)?,
        status: status
            .parse::<AgentStatus>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, e.into()))?,
        endpoint: row.get(5)?,
    })
}

fn load_record(conn: &Connection, agent_id: &str) -> rusqlite::Result<Option<AgentRecord>> {
    conn.query_row(
        &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE agent_id = ?1"),
        params![agent_id],
        row_to_record,
    )
    .optional()
}

/// Replace (or delete, for `None`) the row `snapshot` was read from
///
/// Returns `Ok(None)` without writing when the stored row no longer equals
/// `snapshot`.
fn store_if_unchanged(
    conn: &mut Connection,
    snapshot: &AgentRecord,
    replacement: Option<&AgentRecord>,
) -> StorageResult<Option<FieldUpdate>> {
    let tx = conn.transaction()?;

    match load_record(&tx, &snapshot.agent_id)? {
        None => return Ok(Some(FieldUpdate::Missing)),
        Some(current) if current != *snapshot => return Ok(None),
        Some(_) => {}
    }

    match replacement {
        Some(record) => {
            tx.execute(
                "UPDATE agents
                 SET context_summary = ?2, last_heartbeat = ?3, status = ?4
                 WHERE agent_id = ?1",
                params![
                    record.agent_id,
                    record.context_summary,
                    format_ts(&record.last_heartbeat),
                    record.status.as_str(),
                ],
            )?;
        }
        None => {
            tx.execute(
                "DELETE FROM agents WHERE agent_id = ?1",
                params![snapshot.agent_id],
            )?;
        }
    }
    tx.commit()?;
    Ok(Some(FieldUpdate::Applied))
}

#[async_trait]
impl DirectoryStorage for SqliteStorage {
    async fn put(&self, record: &AgentRecord) -> StorageResult<bool> {
        let record = record.clone();
        self.blocking(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO agents
                    (agent_id, context_summary, registered_at, last_heartbeat, status, endpoint)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.agent_id,
                    record.context_summary,
                    format_ts(&record.registered_at),
                    format_ts(&record.last_heartbeat),
                    record.status.as_str(),
                    record.endpoint,
                ],
            )?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn get(&self, agent_id: &str) -> StorageResult<Option<AgentRecord>> {
        let agent_id = agent_id.to_string();
        self.blocking(move |conn| Ok(load_record(conn, &agent_id)?))
            .await
    }

    async fn exists(&self, agent_id: &str) -> StorageResult<bool> {
        let agent_id = agent_id.to_string();
        self.blocking(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM agents WHERE agent_id = ?1",
                    params![agent_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn scan(&self, predicate: RecordPredicate<'_>) -> StorageResult<Vec<AgentRecord>> {
        let records = self
            .blocking(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {AGENT_COLUMNS} FROM agents ORDER BY agent_id"
                ))?;
                let records = stmt
                    .query_map([], row_to_record)?
                    .collect::<rusqlite::Result<Vec<AgentRecord>>>()?;
                Ok(records)
            })
            .await?;
        Ok(records.into_iter().filter(|r| predicate(r)).collect())
    }

    async fn update_fields(
        &self,
        agent_id: &str,
        fields: &[AgentField],
        guard: Option<RecordPredicate<'_>>,
    ) -> StorageResult<FieldUpdate> {
        self.write_guarded(agent_id, guard, |snapshot| {
            let mut record = snapshot.clone();
            for field in fields {
                field.apply(&mut record);
            }
            Some(record)
        })
        .await
    }

    async fn remove(
        &self,
        agent_id: &str,
        guard: Option<RecordPredicate<'_>>,
    ) -> StorageResult<FieldUpdate> {
        self.write_guarded(agent_id, guard, |_| None).await
    }
}

#[async_trait]
impl ChannelStorage for SqliteStorage {
    async fn append(&self, key: &str, payload: &str) -> StorageResult<()> {
        let key = key.to_string();
        let payload = payload.to_string();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO channel_entries (channel_key, payload) VALUES (?1, ?2)",
                params![key, payload],
            )?;
            tx.execute(
                "INSERT INTO channel_counters (channel_key, appended) VALUES (?1, 1)
                 ON CONFLICT(channel_key) DO UPDATE SET appended = appended + 1",
                params![key],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn trim(&self, key: &str, max_len: usize) -> StorageResult<usize> {
        let key = key.to_string();
        self.blocking(move |conn| {
            let removed = conn.execute(
                "DELETE FROM channel_entries
                 WHERE channel_key = ?1
                   AND seq NOT IN (
                       SELECT seq FROM channel_entries
                       WHERE channel_key = ?1
                       ORDER BY seq DESC
                       LIMIT ?2
                   )",
                params![key, max_len as i64],
            )?;
            if removed > 0 {
                tracing::trace!(channel = %key, removed, "Trimmed channel");
            }
            Ok(removed)
        })
        .await
    }

    async fn range(&self, key: &str, offset: usize, count: usize) -> StorageResult<Vec<String>> {
        let key = key.to_string();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT payload FROM channel_entries
                 WHERE channel_key = ?1
                 ORDER BY seq DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let payloads = stmt
                .query_map(params![key, count as i64, offset as i64], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(payloads)
        })
        .await
    }

    async fn scan_keys(&self, pattern: &str) -> StorageResult<Vec<String>> {
        let keys = self
            .blocking(|conn| {
                let mut stmt = conn.prepare("SELECT channel_key FROM channel_counters")?;
                let keys = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                Ok(keys)
            })
            .await?;
        filter_keys(keys, pattern)
    }

    async fn appended_total(&self, key: &str) -> StorageResult<u64> {
        let key = key.to_string();
        self.blocking(move |conn| {
            let appended: Option<i64> = conn
                .query_row(
                    "SELECT appended FROM channel_counters WHERE channel_key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(appended.unwrap_or(0).max(0) as u64)
        })
        .await
    }

    async fn ping(&self) -> StorageResult<()> {
        self.blocking(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }
}
