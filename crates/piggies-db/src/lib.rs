pub mod migrations;
pub mod models;
pub mod queries;

use anyhow::Result;
use piggies_core::PiggiesError;
use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// SQLite-backed store. One connection behind a mutex: every call is a
/// short, serialized unit, and multi-row operations run in a transaction.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent readers from other processes (backups, sqlite3 shell)
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let db = Self::init(conn)?;

        info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Fresh private database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }

    /// Runs `f` inside a transaction. Commits on `Ok`, rolls back on `Err`
    /// (dropping an uncommitted `Transaction` rolls it back).
    pub fn with_tx<F, T>(&self, f: F) -> std::result::Result<T, PiggiesError>
    where
        F: FnOnce(&Transaction) -> std::result::Result<T, PiggiesError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        let tx = conn.transaction().map_err(anyhow::Error::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(anyhow::Error::from)?;
        Ok(value)
    }
}
