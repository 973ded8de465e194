//! Embedded ledger store
//!
//! - One SQLite connection held in memory
//! - Scoped transactions with rollback-and-reraise
//! - Whole-database snapshots to a file after every committed batch

mod codec;
mod schema;

pub use codec::{BinaryColumn, Encoding, PRIVATE_KEY, PUBKEY_HASH, PUBLIC_KEY, REDEEM_SCRIPT};
pub use schema::{REQUIRED_TABLES, SCHEMA};

use rusqlite::backup::Progress;
use rusqlite::{Connection, DatabaseName, Transaction};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{LedgerError, StorageError};

pub struct LedgerStore {
    conn: Mutex<Connection>,
    snapshot_lock: Mutex<()>,
    snapshot_path: Option<PathBuf>,
}

impl LedgerStore {
    /// Open the store, restoring `snapshot_path` if it exists, otherwise
    /// creating a fresh schema. A snapshot that cannot be loaded is fatal.
    pub fn open(snapshot_path: Option<PathBuf>) -> Result<Self, StorageError> {
        let mut conn = Connection::open_in_memory()?;

        match snapshot_path.as_deref() {
            Some(path) if path.exists() => {
                log::info!("Loading ledger snapshot from {}", path.display());
                conn.restore(DatabaseName::Main, path, None::<fn(Progress)>)
                    .map_err(|e| corrupt(path, e.to_string()))?;
                verify_schema(&conn, path)?;
            }
            Some(path) => {
                log::info!(
                    "No snapshot at {}, creating fresh ledger schema",
                    path.display()
                );
            }
            None => log::debug!("Opening in-memory ledger without snapshot persistence"),
        }

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
            snapshot_lock: Mutex::new(()),
            snapshot_path,
        })
    }

    /// Open a purely in-memory store (tests, ephemeral sessions)
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::open(None)
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Run `body` inside BEGIN/COMMIT.
    ///
    /// Any error returned by `body` rolls the transaction back and is
    /// returned unchanged. A committed transaction is followed by a snapshot
    /// on the calling thread.
    pub fn with_transaction<T, F>(&self, body: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, LedgerError>,
    {
        let value = self.commit(body)?;
        self.snapshot()?;
        Ok(value)
    }

    /// Async variant of [`with_transaction`](Self::with_transaction): the
    /// commit runs inline, the snapshot on the blocking pool.
    pub async fn with_transaction_async<T, F>(self: &Arc<Self>, body: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, LedgerError>,
    {
        let value = self.commit(body)?;
        self.persist().await?;
        Ok(value)
    }

    /// Write a snapshot without blocking the async scheduler
    pub async fn persist(self: &Arc<Self>) -> Result<(), StorageError> {
        if self.snapshot_path.is_none() {
            return Ok(());
        }
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || store.snapshot())
            .await
            .map_err(|e| StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }

    fn commit<T, F>(&self, body: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, LedgerError>,
    {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(StorageError::from)?;

        match body(&tx) {
            Ok(value) => {
                tx.commit().map_err(StorageError::from)?;
                Ok(value)
            }
            Err(e) => {
                log::warn!("Rolling back ledger transaction: {}", e);
                if let Err(rollback_err) = tx.rollback() {
                    log::error!("Rollback failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    /// Run a read-only closure against the connection
    pub fn read<T, F>(&self, body: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&Connection) -> Result<T, LedgerError>,
    {
        let conn = self.lock();
        body(&conn)
    }

    /// Write the whole database to the snapshot path.
    ///
    /// The copy goes to a sibling temp file first and is renamed into place,
    /// so a crash mid-write leaves the previous snapshot intact.
    pub fn snapshot(&self) -> Result<(), StorageError> {
        let Some(path) = self.snapshot_path.as_ref() else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // one writer at a time owns the temp file
        let _guard = self
            .snapshot_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let tmp = path.with_extension("tmp");
        if tmp.exists() {
            fs::remove_file(&tmp)?;
        }

        {
            let conn = self.lock();
            conn.backup(DatabaseName::Main, &tmp, None)?;
        }
        fs::rename(&tmp, path)?;

        log::debug!("Ledger snapshot written to {}", path.display());
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic inside a closure drops its Transaction, which rolls back,
        // so the connection behind a poisoned lock is still consistent.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn verify_schema(conn: &Connection, path: &Path) -> Result<(), StorageError> {
    for table in REQUIRED_TABLES {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .map_err(|e| corrupt(path, e.to_string()))?;
        if count == 0 {
            return Err(corrupt(path, format!("missing table {}", table)));
        }
    }
    Ok(())
}

fn corrupt(path: &Path, reason: String) -> StorageError {
    StorageError::CorruptSnapshot {
        path: path.display().to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn insert_wallet(tx: &Connection, name: &str) -> Result<(), LedgerError> {
        tx.execute(
            "INSERT INTO wallets (wallet_name, mnemonic, created_at) VALUES (?1, 'm', 'now')",
            [name],
        )?;
        Ok(())
    }

    fn wallet_count(store: &LedgerStore) -> i64 {
        store
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM wallets", [], |r| r.get(0))?))
            .unwrap()
    }

    #[test]
    fn test_fresh_store_has_schema() {
        let store = LedgerStore::in_memory().unwrap();
        let conn = store.lock();
        for table in REQUIRED_TABLES {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE name = ?1",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "table {} missing", table);
        }
    }

    #[test]
    fn test_transaction_commits() {
        let store = LedgerStore::in_memory().unwrap();
        store.with_transaction(|tx| insert_wallet(tx, "a")).unwrap();
        assert_eq!(wallet_count(&store), 1);
    }

    #[test]
    fn test_transaction_rolls_back_and_reraises() {
        let store = LedgerStore::in_memory().unwrap();
        let result: Result<(), LedgerError> = store.with_transaction(|tx| {
            insert_wallet(tx, "a")?;
            Err(LedgerError::InvalidArgument("boom".into()))
        });
        assert!(matches!(result, Err(LedgerError::InvalidArgument(_))));
        assert_eq!(wallet_count(&store), 0);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.db");

        {
            let store = LedgerStore::open(Some(path.clone())).unwrap();
            store.with_transaction(|tx| insert_wallet(tx, "persisted")).unwrap();
        }
        assert!(path.exists());

        let reopened = LedgerStore::open(Some(path)).unwrap();
        assert_eq!(wallet_count(&reopened), 1);
    }

    #[tokio::test]
    async fn test_async_transaction_snapshots_off_thread() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.db");

        {
            let store = Arc::new(LedgerStore::open(Some(path.clone())).unwrap());
            let (a, b) = tokio::join!(
                store.with_transaction_async(|tx| insert_wallet(tx, "a")),
                store.with_transaction_async(|tx| insert_wallet(tx, "b")),
            );
            a.unwrap();
            b.unwrap();
        }
        assert!(!path.with_extension("tmp").exists());

        let reopened = LedgerStore::open(Some(path)).unwrap();
        assert_eq!(wallet_count(&reopened), 2);
    }

    #[test]
    fn test_corrupt_snapshot_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.db");
        fs::write(&path, b"definitely not a sqlite database, just some bytes").unwrap();

        let result = LedgerStore::open(Some(path));
        assert!(matches!(result, Err(StorageError::CorruptSnapshot { .. })));
    }

    #[test]
    fn test_foreign_snapshot_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("other.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE unrelated (x INTEGER);").unwrap();
        }

        let result = LedgerStore::open(Some(path));
        assert!(matches!(result, Err(StorageError::CorruptSnapshot { .. })));
    }
}
