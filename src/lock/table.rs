use super::{Artifact, LockStrategy, StrategyKind, TryAcquire};
use crate::error::{LockError, Result};
use crate::identity::HolderIdentity;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS locks (
    lock_file TEXT PRIMARY KEY NOT NULL,
    unique_name TEXT NOT NULL
)";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Table locking: one row per lock in an SQLite database shared by all
/// participants, keyed by `<path>.lock` and storing the holder token.
///
/// Every call opens its own connection, so a strategy can be shared across
/// threads and each thread's identity is stored as given.
#[derive(Debug)]
pub struct TableStrategy {
    database: PathBuf,
    lock_key: PathBuf,
    threaded: bool,
}

impl TableStrategy {
    /// Open (creating if needed) the lock table in `database`.
    pub fn open(database: impl Into<PathBuf>, lock_key: impl Into<PathBuf>, threaded: bool) -> Result<Self> {
        let strategy = Self {
            database: database.into(),
            lock_key: lock_key.into(),
            threaded,
        };
        strategy.connect()?.execute_batch(SCHEMA)?;
        Ok(strategy)
    }

    pub fn database(&self) -> &Path {
        &self.database
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.database)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn key(&self) -> String {
        self.lock_key.to_string_lossy().into_owned()
    }

    fn holder_row(conn: &Connection, key: &str) -> Result<Option<String>> {
        Ok(conn
            .query_row(
                "SELECT unique_name FROM locks WHERE lock_file = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }
}

impl LockStrategy for TableStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Sqlite
    }

    fn distinguishes_threads(&self) -> bool {
        self.threaded
    }

    fn artifact(&self) -> &Path {
        &self.lock_key
    }

    fn try_acquire(&self, me: &HolderIdentity) -> Result<TryAcquire> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let key = self.key();

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO locks (lock_file, unique_name) VALUES (?1, ?2)",
            params![key, me.encode()],
        )?;
        let outcome = if inserted == 1 {
            debug!("Inserted lock row {} for {}", key, me);
            TryAcquire::Acquired
        } else {
            match Self::holder_row(&tx, &key)?.as_deref().and_then(HolderIdentity::decode) {
                Some(holder) if holder.same_holder(me) => TryAcquire::Acquired,
                Some(holder) => TryAcquire::HeldByOther(holder),
                None => TryAcquire::HeldByOtherUnknownIdentity,
            }
        };
        tx.commit()?;
        Ok(outcome)
    }

    fn inspect(&self) -> Result<Artifact> {
        let conn = self.connect()?;
        Ok(match Self::holder_row(&conn, &self.key())? {
            Some(token) => Artifact::Held(HolderIdentity::decode(&token)),
            None => Artifact::Absent,
        })
    }

    fn remove(&self) -> Result<bool> {
        let conn = self.connect()?;
        let deleted = conn.execute("DELETE FROM locks WHERE lock_file = ?1", params![self.key()])?;
        Ok(deleted > 0)
    }

    // Check and delete in one transaction so the row cannot change hands in between.
    fn release(&self, me: &HolderIdentity) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let key = self.key();

        let Some(token) = Self::holder_row(&tx, &key)? else {
            return Err(LockError::NotLocked(self.lock_key.clone()));
        };
        let holder = HolderIdentity::decode(&token);
        if !holder.as_ref().is_some_and(|h| h.same_holder(me)) {
            return Err(LockError::NotMyLock {
                path: self.lock_key.clone(),
                holder,
            });
        }

        tx.execute("DELETE FROM locks WHERE lock_file = ?1", params![key])?;
        tx.commit()?;
        Ok(())
    }
}
