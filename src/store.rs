//! Persistent dedup store
//!
//! A small sqlite table of already-uploaded activity identifiers, keyed by
//! (activity, user). Rows are only ever inserted, never updated or deleted;
//! each insert is its own durability point.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::debug;

use crate::{Error, Result};

pub struct DedupStore {
    conn: Mutex<Connection>,
}

impl DedupStore {
    /// Open (or create) the store at `path`.
    ///
    /// Failure to open the store is fatal to the caller: running without the
    /// dedup table would re-upload every activity on every session.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store, used by tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.lock().unwrap().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS imported_activities (
                activity TEXT NOT NULL,
                user TEXT NOT NULL,
                PRIMARY KEY (activity, user)
            );
            "#,
        )?;
        Ok(())
    }

    /// Activity identifiers already recorded for `user`, ordered by identifier
    pub fn get_imported(&self, user: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT activity FROM imported_activities WHERE user = ?1 ORDER BY activity",
        )?;
        let rows = stmt.query_map([user], |row| row.get::<_, String>(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Record an uploaded activity for `user`.
    ///
    /// Idempotent: inserting an existing (activity, user) pair is a no-op.
    /// The connection is in autocommit mode, so the row is durable as soon as
    /// this returns.
    pub fn insert(&self, activity: &str, user: &str) -> Result<()> {
        let inserted = self.conn.lock().unwrap().execute(
            "INSERT OR IGNORE INTO imported_activities (activity, user) VALUES (?1, ?2)",
            [activity, user],
        )?;
        if inserted > 0 {
            debug!("Recorded uploaded activity {} for {}", activity, user);
        }
        Ok(())
    }
}
