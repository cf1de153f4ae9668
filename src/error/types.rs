use crate::identity::HolderIdentity;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Failed to acquire lock on {path}: held by {}", describe(.holder))]
    AlreadyLocked {
        path: PathBuf,
        holder: Option<HolderIdentity>,
    },

    #[error("Failed to acquire lock on {path}: timeout after {elapsed:?}")]
    LockTimeout { path: PathBuf, elapsed: Duration },

    #[error("Cannot release {0}: not locked")]
    NotLocked(PathBuf),

    #[error("Cannot release {path}: locked by {}", describe(.holder))]
    NotMyLock {
        path: PathBuf,
        holder: Option<HolderIdentity>,
    },

    #[error("Lock operation on {path} failed: {source}")]
    LockFailed { path: PathBuf, source: io::Error },

    #[error("Lock table error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Path does not exist: {0}")]
    PathNotFound(PathBuf),

    #[error("Failed to create cache directory {path}: {source}")]
    CacheDirectoryFailed { path: PathBuf, source: io::Error },

    #[error("Invalid duration format '{input}': {message}")]
    InvalidDuration { input: String, message: String },

    #[error("Unknown lock strategy '{0}' (expected link, symlink, mkdir, pidfile or sqlite)")]
    UnknownStrategy(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

fn describe(holder: &Option<HolderIdentity>) -> String {
    match holder {
        Some(holder) => holder.to_string(),
        None => "another holder".to_string(),
    }
}

impl LockError {
    pub fn exit_code(&self) -> i32 {
        match self {
            LockError::AlreadyLocked { .. } | LockError::LockTimeout { .. } => 2,
            LockError::Io(e) if e.kind() == io::ErrorKind::Interrupted => 3,
            LockError::LockFailed { source, .. } if source.kind() == io::ErrorKind::Interrupted => 3,
            _ => 1,
        }
    }

    /// True for the two "someone else holds it" outcomes of `acquire`.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            LockError::AlreadyLocked { .. } | LockError::LockTimeout { .. }
        )
    }

    pub(crate) fn lock_failed(path: impl Into<PathBuf>, source: io::Error) -> Self {
        LockError::LockFailed {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
