//! Async wrapper around a blocking `rusqlite::Connection`, following a
//! single-writer-per-database policy: one connection per folder,
//! guarded by a mutex, all access routed through `spawn_blocking` so
//! the driver loop never stalls on file I/O.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::schema;

#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Db {
    /// `loadOrInitialize`: opens the database, creating the schema if
    /// absent. Never wipes existing data.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Integrity(format!("cannot create store directory: {e}"))
            })?;
        }
        let conn = Connection::open(path).map_err(StoreError::from_sqlite)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(StoreError::from_sqlite)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(StoreError::from_sqlite)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(StoreError::from_sqlite)?;
        schema::init_schema(&conn).map_err(StoreError::from_sqlite)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` against the connection on a blocking thread. A poisoned
    /// mutex (a prior panic mid-transaction) is recovered from by
    /// checking whether the connection is mid-transaction and rolling
    /// back before continuing, matching the recovery the retrieval
    /// store in the wider corpus performs.
    pub async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|poisoned| {
                log::warn!("database mutex poisoned; recovering");
                let guard = poisoned.into_inner();
                if !guard.is_autocommit() {
                    match guard.execute_batch("ROLLBACK") {
                        Ok(()) => log::warn!("rolled back dangling transaction after poison"),
                        Err(e) => log::error!("rollback after poison failed: {e}"),
                    }
                }
                guard
            });
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Integrity(format!("worker task panicked: {e}")))?
    }

    /// Runs `f` inside a `BEGIN IMMEDIATE ... COMMIT` transaction,
    /// rolling back on error so no partial write is ever observed
    /// (invariant 3).
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.run(move |conn| {
            conn.execute_batch("BEGIN IMMEDIATE")
                .map_err(StoreError::from_sqlite)?;
            match f(conn) {
                Ok(value) => {
                    conn.execute_batch("COMMIT").map_err(StoreError::from_sqlite)?;
                    Ok(value)
                }
                Err(e) => {
                    if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                        log::error!("rollback failed after transaction error: {rollback_err}");
                    }
                    Err(e)
                }
            }
        })
        .await
    }
}
