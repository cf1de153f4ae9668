use super::{create_or_contend, is_already_exists, remove_file_if_present, Artifact, LockStrategy, StrategyKind, TryAcquire};
use crate::error::{LockError, Result};
use crate::identity::HolderIdentity;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Symbolic-link locking: `<path>.lock` is a symlink whose target is the
/// holder token. The target never exists; only the link text matters.
#[derive(Debug)]
pub struct SymlinkStrategy {
    lock_path: PathBuf,
    threaded: bool,
}

impl SymlinkStrategy {
    pub fn new(lock_path: impl Into<PathBuf>, threaded: bool) -> Self {
        Self {
            lock_path: lock_path.into(),
            threaded,
        }
    }
}

#[cfg(unix)]
fn create_symlink(target: &str, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &str, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

impl LockStrategy for SymlinkStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Symlink
    }

    fn distinguishes_threads(&self) -> bool {
        self.threaded
    }

    fn artifact(&self) -> &Path {
        &self.lock_path
    }

    fn try_acquire(&self, me: &HolderIdentity) -> Result<TryAcquire> {
        create_or_contend(self, me, || match create_symlink(&me.encode(), &self.lock_path) {
            Ok(()) => {
                debug!("Symlinked {} for {}", self.lock_path.display(), me);
                Ok(true)
            }
            Err(e) if is_already_exists(&e) => Ok(false),
            Err(e) => Err(LockError::lock_failed(&self.lock_path, e)),
        })
    }

    fn inspect(&self) -> Result<Artifact> {
        match fs::read_link(&self.lock_path) {
            Ok(target) => Ok(Artifact::Held(
                target.to_str().and_then(HolderIdentity::decode),
            )),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Artifact::Absent),
            // Not a symlink: some other strategy's artifact sits here.
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(Artifact::Held(None)),
            Err(e) => Err(LockError::lock_failed(&self.lock_path, e)),
        }
    }

    fn remove(&self) -> Result<bool> {
        remove_file_if_present(&self.lock_path)
    }
}
