//! Cross-process locks built on atomic filesystem primitives
//!
//! A [`LockFile`] protects a path by creating exactly one artifact next to it
//! (`<path>.lock`) with one atomic operation: a hard link, a symlink, a
//! directory rename, an exclusive PID-file create, or a row insert in an
//! SQLite table. No daemon is involved; the artifact is the lock.

pub mod error;
pub mod identity;
pub mod lock;
pub mod utils;

pub use error::{LockError, Result};
pub use identity::{HolderIdentity, UniqueNameGenerator};
pub use lock::{
    with_lock, Clock, LockFile, LockGuard, LockOptions, LockStrategy, StrategyKind, SystemClock,
    WaitPolicy,
};
pub use lockfile_macros::locked;
