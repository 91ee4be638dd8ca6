//! Cache connection management.
//!
//! The [`Cache`] struct owns a [`rusqlite::Connection`] behind a mutex so it
//! can be shared across async tasks, and guarantees that migrations are run
//! before any other operation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use directories::ProjectDirs;
use rusqlite::{params, Connection};

use crate::error::{Result, StoreError};
use crate::migrations;

/// A single mutation in an atomic batch, applied via [`Cache::apply`].
#[derive(Debug, Clone)]
pub enum CacheOp {
    Put { key: String, value: String },
    Remove { key: String },
}

impl CacheOp {
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn remove(key: impl Into<String>) -> Self {
        Self::Remove { key: key.into() }
    }
}

/// Persisted key-value store over SQLite.
pub struct Cache {
    conn: Mutex<Connection>,
}

impl Cache {
    /// Open (or create) the default application cache.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/aegis/aegis.db`
    /// - macOS:   `~/Library/Application Support/com.aegis.aegis/aegis.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\aegis\aegis\data\aegis.db`
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("com", "aegis", "aegis").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("aegis.db");

        tracing::info!(path = %db_path.display(), "opening cache database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a cache at an explicit path.
    ///
    /// This is useful for tests and for embedding the store inside custom
    /// directory layouts.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open a transient in-memory cache.  Used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // Recommended SQLite settings.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        // Run schema migrations.
        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.lock().path().map(PathBuf::from)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means a panic mid-statement; the connection itself
        // is still usable for subsequent statements.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------
    // Raw key-value surface
    // ------------------------------------------------------------------

    /// Read the serialized value stored under `key`.
    pub fn get_item(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Write `value` under `key`, replacing any previous value.
    pub fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.lock().execute(
            "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Remove the value stored under `key`.  Removing an absent key is not
    /// an error.
    pub fn remove_item(&self, key: &str) -> Result<()> {
        self.lock()
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Apply a batch of mutations in a single transaction.
    ///
    /// Either every operation in the batch lands or none of them does;
    /// callers rely on this for multi-key invariants such as contact
    /// deletion removing the contact, its recent entry, and its chat thread
    /// together.
    pub fn apply(&self, batch: &[CacheOp]) -> Result<()> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        for op in batch {
            match op {
                CacheOp::Put { key, value } => {
                    tx.execute(
                        "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)",
                        params![key, value, chrono::Utc::now().to_rfc3339()],
                    )?;
                }
                CacheOp::Remove { key } => {
                    tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// List all stored keys.  Diagnostic helper.
    pub fn keys(&self) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY key ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}
