//! SQLite persistence backend using rusqlite.
//!
//! This is the default backend. It uses WAL mode by default so readers are
//! not blocked while a merge-on-put commits.
//!
//! # Example
//!
//! ```no_run
//! use engram_store::{SqliteStore, StateStore};
//!
//! let store = SqliteStore::open("memories.db").unwrap();
//! store.put("memories", "m1", b"payload").unwrap();
//!
//! let data = store.get("memories", "m1").unwrap().unwrap();
//! assert_eq!(data, b"payload");
//! ```

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use crate::traits::{
    now_micros, BackendError, BatchOps, EventStore, StateStore, StoredEvent, WriteOp,
};

/// SQLite configuration options.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// SQLite journal mode. Defaults to WAL.
    pub journal_mode: JournalMode,
    /// Busy timeout in milliseconds. Defaults to 5000.
    pub busy_timeout_ms: u32,
    /// SQLite page size. Defaults to 4096.
    pub page_size: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            journal_mode: JournalMode::Wal,
            busy_timeout_ms: 5000,
            page_size: 4096,
        }
    }
}

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    /// Write-Ahead Logging, allows concurrent reads during writes.
    Wal,
    /// Traditional rollback journal.
    Delete,
    /// In-memory journal (fastest, no crash recovery).
    Memory,
}

impl JournalMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
            Self::Memory => "MEMORY",
        }
    }
}

/// Error type for the SQLite backend.
#[derive(Debug, thiserror::Error)]
pub enum SqliteError {
    /// An error from rusqlite.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Lock poisoned.
    #[error("sqlite lock poisoned")]
    LockPoisoned,
}

impl BackendError for SqliteError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// SQLite persistence backend.
///
/// Wraps a `rusqlite::Connection` behind a `Mutex` for safe shared access.
/// Creates the schema automatically on first open.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at the given path with default config.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SqliteError> {
        Self::open_with_config(path, SqliteConfig::default())
    }

    /// Open with custom configuration.
    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: SqliteConfig,
    ) -> Result<Self, SqliteError> {
        let conn = Connection::open(path)?;
        Self::init_connection(&conn, &config)?;
        Self::create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, SqliteError> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(&conn, &SqliteConfig::default())?;
        Self::create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_connection(conn: &Connection, config: &SqliteConfig) -> Result<(), SqliteError> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = {};
             PRAGMA busy_timeout = {};
             PRAGMA page_size = {};
             PRAGMA synchronous = NORMAL;",
            config.journal_mode.as_str(),
            config.busy_timeout_ms,
            config.page_size,
        ))?;
        Ok(())
    }

    fn create_schema(conn: &Connection) -> Result<(), SqliteError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS engram_state (
                namespace   TEXT NOT NULL,
                key         TEXT NOT NULL,
                data        BLOB NOT NULL,
                updated_at  INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (namespace, key)
            );

            CREATE TABLE IF NOT EXISTS engram_events (
                sequence    INTEGER PRIMARY KEY AUTOINCREMENT,
                log         TEXT NOT NULL,
                entity_id   TEXT NOT NULL,
                data        BLOB NOT NULL,
                timestamp   INTEGER NOT NULL,
                node_id     TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_log
                ON engram_events(log, sequence);",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SqliteError> {
        self.conn.lock().map_err(|_| SqliteError::LockPoisoned)
    }

    /// Get the database file size in bytes (0 for in-memory).
    pub fn file_size(&self) -> Result<u64, SqliteError> {
        let conn = self.lock()?;
        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok((page_count * page_size) as u64)
    }

    /// Get the current journal mode.
    pub fn journal_mode(&self) -> Result<String, SqliteError> {
        let conn = self.lock()?;
        let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        Ok(mode)
    }
}

const UPSERT_STATE: &str = "INSERT INTO engram_state (namespace, key, data, updated_at)
     VALUES (?1, ?2, ?3, ?4)
     ON CONFLICT(namespace, key)
     DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at";

const DELETE_STATE: &str = "DELETE FROM engram_state WHERE namespace = ?1 AND key = ?2";

const INSERT_EVENT: &str = "INSERT INTO engram_events (log, entity_id, data, timestamp, node_id)
     VALUES (?1, ?2, ?3, ?4, ?5)";

impl StateStore for SqliteStore {
    type Error = SqliteError;

    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), Self::Error> {
        let conn = self.lock()?;
        conn.execute(
            UPSERT_STATE,
            params![namespace, key, value, now_micros() as i64],
        )?;
        Ok(())
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, Self::Error> {
        let conn = self.lock()?;
        let result = conn
            .query_row(
                "SELECT data FROM engram_state WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(result)
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<(), Self::Error> {
        let conn = self.lock()?;
        conn.execute(DELETE_STATE, params![namespace, key])?;
        Ok(())
    }

    fn list_keys(&self, namespace: &str) -> Result<Vec<String>, Self::Error> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT key FROM engram_state WHERE namespace = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map(params![namespace], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    fn exists(&self, namespace: &str, key: &str) -> Result<bool, Self::Error> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM engram_state WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn flush(&self) -> Result<(), Self::Error> {
        let conn = self.lock()?;
        // Returns a status row even outside WAL mode.
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        Ok(())
    }
}

impl EventStore for SqliteStore {
    fn append_event(
        &self,
        log: &str,
        entity_id: &str,
        data: &[u8],
        timestamp: u64,
        node_id: &str,
    ) -> Result<u64, Self::Error> {
        let conn = self.lock()?;
        conn.execute(
            INSERT_EVENT,
            params![log, entity_id, data, timestamp as i64, node_id],
        )?;
        Ok(conn.last_insert_rowid() as u64)
    }

    fn events_since(
        &self,
        log: &str,
        since_sequence: u64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, Self::Error> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT sequence, log, entity_id, data, timestamp, node_id
             FROM engram_events
             WHERE log = ?1 AND sequence > ?2
             ORDER BY sequence
             LIMIT ?3",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let events = stmt
            .query_map(params![log, since_sequence as i64, limit], |row| {
                Ok(StoredEvent {
                    sequence: row.get::<_, i64>(0)? as u64,
                    log: row.get(1)?,
                    entity_id: row.get(2)?,
                    data: row.get(3)?,
                    timestamp: row.get::<_, i64>(4)? as u64,
                    node_id: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    fn event_count(&self, log: &str) -> Result<u64, Self::Error> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM engram_events WHERE log = ?1",
            params![log],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn truncate_events_through(
        &self,
        log: &str,
        through_sequence: u64,
    ) -> Result<u64, Self::Error> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM engram_events WHERE log = ?1 AND sequence <= ?2",
            params![log, through_sequence as i64],
        )?;
        Ok(deleted as u64)
    }
}

impl BatchOps for SqliteStore {
    fn apply_batch(&self, ops: &[WriteOp<'_>]) -> Result<(), Self::Error> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        {
            let now = now_micros() as i64;
            for op in ops {
                match *op {
                    WriteOp::Put {
                        namespace,
                        key,
                        value,
                    } => {
                        tx.prepare_cached(UPSERT_STATE)?
                            .execute(params![namespace, key, value, now])?;
                    }
                    WriteOp::Delete { namespace, key } => {
                        tx.prepare_cached(DELETE_STATE)?
                            .execute(params![namespace, key])?;
                    }
                    WriteOp::Append {
                        log,
                        entity_id,
                        data,
                        timestamp,
                        node_id,
                    } => {
                        tx.prepare_cached(INSERT_EVENT)?.execute(params![
                            log,
                            entity_id,
                            data,
                            timestamp as i64,
                            node_id
                        ])?;
                    }
                }
            }
        }
        // Dropping an uncommitted transaction rolls it back.
        tx.commit()?;
        Ok(())
    }
}
