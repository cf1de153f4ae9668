//! Lock strategies and the controller that drives them.
//!
//! Every strategy turns one atomic filesystem operation into the presence of
//! a single artifact; the controller, [`LockFile`], adds waiting and
//! local state on top.

mod acquisition;
mod guard;
mod link;
mod mkdir;
mod path;
mod pidfile;
mod symlink;
mod table;

pub use acquisition::{Clock, LockFile, LockOptions, SystemClock, WaitPolicy};
pub use guard::{with_lock, LockGuard};
pub use link::LinkStrategy;
pub use mkdir::MkdirStrategy;
pub use path::{default_database_path, derive_lock_path, resolve_path};
pub use pidfile::{PidFileStrategy, ProcessProbe, SignalProbe};
pub use symlink::SymlinkStrategy;
pub use table::TableStrategy;

use crate::error::{LockError, Result};
use crate::identity::HolderIdentity;
use std::fmt;
use std::io;
use std::path::Path;
use std::str::FromStr;

/// Outcome of a single acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TryAcquire {
    Acquired,
    HeldByOther(HolderIdentity),
    HeldByOtherUnknownIdentity,
}

/// What a strategy finds on disk for its lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Absent,
    /// Present; the holder is `None` when the artifact cannot be decoded,
    /// e.g. it was created by a different strategy.
    Held(Option<HolderIdentity>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StrategyKind {
    #[default]
    Link,
    Symlink,
    Mkdir,
    PidFile,
    Sqlite,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Link => "link",
            StrategyKind::Symlink => "symlink",
            StrategyKind::Mkdir => "mkdir",
            StrategyKind::PidFile => "pidfile",
            StrategyKind::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "link" => Ok(StrategyKind::Link),
            "symlink" => Ok(StrategyKind::Symlink),
            "mkdir" => Ok(StrategyKind::Mkdir),
            "pidfile" | "pid" => Ok(StrategyKind::PidFile),
            "sqlite" | "table" => Ok(StrategyKind::Sqlite),
            _ => Err(LockError::UnknownStrategy(s.to_string())),
        }
    }
}

/// One atomic filesystem primitive presented as a lock.
///
/// `try_acquire` performs exactly one atomic create; reporting
/// [`TryAcquire::Acquired`] when the existing artifact already belongs to
/// `me` makes repeated polling safe. The provided methods are built on
/// [`inspect`](LockStrategy::inspect) and [`remove`](LockStrategy::remove).
pub trait LockStrategy: Send + Sync + fmt::Debug {
    fn kind(&self) -> StrategyKind;

    /// Whether artifacts record the owning thread, making two threads of one
    /// process contend as separate holders.
    fn distinguishes_threads(&self) -> bool;

    /// Where the artifact lives; used in errors and logs.
    fn artifact(&self) -> &Path;

    fn try_acquire(&self, me: &HolderIdentity) -> Result<TryAcquire>;

    fn inspect(&self) -> Result<Artifact>;

    /// Delete the artifact whoever owns it. Returns `false` if it was absent.
    fn remove(&self) -> Result<bool>;

    fn is_locked(&self) -> Result<bool> {
        Ok(self.inspect()? != Artifact::Absent)
    }

    fn current_holder(&self) -> Result<Option<HolderIdentity>> {
        match self.inspect()? {
            Artifact::Held(holder) => Ok(holder),
            Artifact::Absent => Ok(None),
        }
    }

    /// Remove the artifact if it names `me`.
    ///
    /// The check and the removal are two steps: an artifact broken and
    /// re-created by another holder in between is removed anyway. Strategies
    /// with an atomic check-and-delete override this.
    fn release(&self, me: &HolderIdentity) -> Result<()> {
        match self.inspect()? {
            Artifact::Absent => Err(LockError::NotLocked(self.artifact().to_path_buf())),
            Artifact::Held(Some(holder)) if holder.same_holder(me) => {
                if self.remove()? {
                    Ok(())
                } else {
                    Err(LockError::NotLocked(self.artifact().to_path_buf()))
                }
            }
            Artifact::Held(holder) => Err(LockError::NotMyLock {
                path: self.artifact().to_path_buf(),
                holder,
            }),
        }
    }

    fn break_lock(&self) -> Result<()> {
        self.remove().map(|_| ())
    }
}

/// Attempts made by [`create_or_contend`] before settling for an unknown holder.
const CREATE_ATTEMPTS: usize = 2;

/// Run `create` (which returns `Ok(false)` when the artifact already exists)
/// and resolve a lost create: ours already, or someone else's. An artifact
/// released between the failed create and the inspection is created again.
pub(crate) fn create_or_contend<F>(
    strategy: &dyn LockStrategy,
    me: &HolderIdentity,
    mut create: F,
) -> Result<TryAcquire>
where
    F: FnMut() -> Result<bool>,
{
    for _ in 0..CREATE_ATTEMPTS {
        if create()? {
            return Ok(TryAcquire::Acquired);
        }
        match strategy.inspect()? {
            Artifact::Held(Some(holder)) if holder.same_holder(me) => {
                return Ok(TryAcquire::Acquired)
            }
            Artifact::Held(Some(holder)) => return Ok(TryAcquire::HeldByOther(holder)),
            Artifact::Held(None) => return Ok(TryAcquire::HeldByOtherUnknownIdentity),
            Artifact::Absent => continue,
        }
    }
    Ok(TryAcquire::HeldByOtherUnknownIdentity)
}

/// Errors meaning "the artifact is already there" for create-style calls.
pub(crate) fn is_already_exists(e: &io::Error) -> bool {
    if e.kind() == io::ErrorKind::AlreadyExists {
        return true;
    }
    // rename(2) onto a populated directory, or a directory onto a file
    #[cfg(unix)]
    if let Some(code) = e.raw_os_error() {
        if code == libc::ENOTEMPTY || code == libc::EEXIST || code == libc::ENOTDIR {
            return true;
        }
    }
    false
}

/// Remove a plain file or symlink, treating absence as `false`.
pub(crate) fn remove_file_if_present(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(LockError::lock_failed(path, e)),
    }
}
