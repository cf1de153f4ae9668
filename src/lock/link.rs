use super::{create_or_contend, is_already_exists, remove_file_if_present, Artifact, LockStrategy, StrategyKind, TryAcquire};
use crate::error::{LockError, Result};
use crate::identity::{HolderIdentity, UniqueNameGenerator};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Hard-link locking.
///
/// Each attempt writes the holder token into a uniquely named staging file and
/// hard-links it to `<path>.lock`. `link(2)` refuses to replace an existing
/// name, so at most one attempt wins; the lock file shares the staging file's
/// contents, so the holder is readable from it once the staging name is gone.
#[derive(Debug)]
pub struct LinkStrategy {
    lock_path: PathBuf,
    threaded: bool,
    names: UniqueNameGenerator,
}

impl LinkStrategy {
    pub fn new(lock_path: impl Into<PathBuf>, threaded: bool) -> Self {
        Self {
            lock_path: lock_path.into(),
            threaded,
            names: UniqueNameGenerator,
        }
    }

    fn write_staging(&self, staging: &Path, me: &HolderIdentity) -> io::Result<()> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(staging)?;
        file.write_all(me.encode().as_bytes())?;
        file.sync_all()
    }

    /// `Ok(false)` when `<path>.lock` already exists.
    fn link(&self, me: &HolderIdentity) -> Result<bool> {
        let staging = self.names.staging_path(&self.lock_path, me);
        if let Err(e) = self.write_staging(&staging, me) {
            let _ = fs::remove_file(&staging);
            return Err(LockError::lock_failed(&staging, e));
        }

        let linked = fs::hard_link(&staging, &self.lock_path);
        // The lock file keeps the contents alive; the staging name is never needed again.
        let _ = fs::remove_file(&staging);

        match linked {
            Ok(()) => {
                debug!("Linked {} for {}", self.lock_path.display(), me);
                Ok(true)
            }
            Err(e) if is_already_exists(&e) => Ok(false),
            Err(e) => Err(LockError::lock_failed(&self.lock_path, e)),
        }
    }
}

impl LockStrategy for LinkStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Link
    }

    fn distinguishes_threads(&self) -> bool {
        self.threaded
    }

    fn artifact(&self) -> &Path {
        &self.lock_path
    }

    fn try_acquire(&self, me: &HolderIdentity) -> Result<TryAcquire> {
        create_or_contend(self, me, || self.link(me))
    }

    fn inspect(&self) -> Result<Artifact> {
        match fs::symlink_metadata(&self.lock_path) {
            Ok(meta) if !meta.is_file() => return Ok(Artifact::Held(None)),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Artifact::Absent),
            Err(e) => return Err(LockError::lock_failed(&self.lock_path, e)),
        }

        match fs::read(&self.lock_path) {
            Ok(bytes) => {
                let holder = std::str::from_utf8(&bytes).ok().and_then(HolderIdentity::decode);
                Ok(Artifact::Held(holder))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Artifact::Absent),
            Err(e) => Err(LockError::lock_failed(&self.lock_path, e)),
        }
    }

    fn remove(&self) -> Result<bool> {
        remove_file_if_present(&self.lock_path)
    }
}
