use super::{create_or_contend, is_already_exists, Artifact, LockStrategy, StrategyKind, TryAcquire};
use crate::error::{LockError, Result};
use crate::identity::{HolderIdentity, UniqueNameGenerator};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const HOLDER_FILE: &str = "holder";

/// Directory locking.
///
/// `mkdir(2)` of `<path>.lock` has at most one winner; the winner then
/// renames a `holder` file into it. Until that rename lands the directory is
/// locked with an unknown holder, and so is any bare directory left behind
/// by a crash. Removal renames the directory aside first so it never
/// appears half-deleted.
#[derive(Debug)]
pub struct MkdirStrategy {
    lock_path: PathBuf,
    threaded: bool,
    names: UniqueNameGenerator,
}

impl MkdirStrategy {
    pub fn new(lock_path: impl Into<PathBuf>, threaded: bool) -> Self {
        Self {
            lock_path: lock_path.into(),
            threaded,
            names: UniqueNameGenerator,
        }
    }

    /// `Ok(false)` when the lock directory already exists.
    fn create(&self, me: &HolderIdentity) -> Result<bool> {
        match fs::create_dir(&self.lock_path) {
            Ok(()) => {}
            Err(e) if is_already_exists(&e) => return Ok(false),
            Err(e) => return Err(LockError::lock_failed(&self.lock_path, e)),
        }

        let staging = self
            .lock_path
            .join(format!("{}.{}", HOLDER_FILE, self.names.next_sequence()));
        let written = fs::write(&staging, me.encode())
            .and_then(|()| fs::rename(&staging, self.lock_path.join(HOLDER_FILE)));
        if let Err(e) = written {
            // Leave no anonymous directory behind to block every later attempt.
            self.discard(&self.lock_path);
            return Err(LockError::lock_failed(&self.lock_path, e));
        }

        debug!("Created lock directory {} for {}", self.lock_path.display(), me);
        Ok(true)
    }

    fn discard(&self, dir: &Path) {
        if let Err(e) = fs::remove_dir_all(dir) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove {} (non-fatal): {}", dir.display(), e);
            }
        }
    }

    fn graveyard(&self) -> PathBuf {
        self.names
            .staging_path(&self.lock_path, &HolderIdentity::current(false))
    }

    /// Move the lock directory aside, then delete it only if it still names
    /// `me`. A directory that changed hands in the meantime is put back.
    fn remove_if_owned(&self, me: &HolderIdentity) -> Result<()> {
        let graveyard = self.graveyard();
        match fs::rename(&self.lock_path, &graveyard) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(LockError::NotLocked(self.lock_path.clone()));
            }
            Err(e) => return Err(LockError::lock_failed(&self.lock_path, e)),
        }

        let holder = fs::read_to_string(graveyard.join(HOLDER_FILE))
            .ok()
            .and_then(|token| HolderIdentity::decode(&token));
        if holder.as_ref().is_some_and(|h| h.same_holder(me)) {
            fs::remove_dir_all(&graveyard).map_err(|e| LockError::lock_failed(&graveyard, e))?;
            return Ok(());
        }

        if let Err(e) = fs::rename(&graveyard, &self.lock_path) {
            warn!(
                "Could not restore lock directory {} after ownership check: {}",
                self.lock_path.display(),
                e
            );
            self.discard(&graveyard);
        }
        Err(LockError::NotMyLock {
            path: self.lock_path.clone(),
            holder,
        })
    }
}

impl LockStrategy for MkdirStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Mkdir
    }

    fn distinguishes_threads(&self) -> bool {
        self.threaded
    }

    fn artifact(&self) -> &Path {
        &self.lock_path
    }

    fn try_acquire(&self, me: &HolderIdentity) -> Result<TryAcquire> {
        create_or_contend(self, me, || self.create(me))
    }

    fn inspect(&self) -> Result<Artifact> {
        match fs::symlink_metadata(&self.lock_path) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(Artifact::Held(None)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Artifact::Absent),
            Err(e) => return Err(LockError::lock_failed(&self.lock_path, e)),
        }

        match fs::read_to_string(self.lock_path.join(HOLDER_FILE)) {
            Ok(token) => Ok(Artifact::Held(HolderIdentity::decode(&token))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Either removed between the two reads, or not yet (or never)
                // given a holder.
                if self.lock_path.exists() {
                    Ok(Artifact::Held(None))
                } else {
                    Ok(Artifact::Absent)
                }
            }
            Err(e) => Err(LockError::lock_failed(&self.lock_path, e)),
        }
    }

    fn remove(&self) -> Result<bool> {
        let graveyard = self.graveyard();
        match fs::rename(&self.lock_path, &graveyard) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(LockError::lock_failed(&self.lock_path, e)),
        }

        fs::remove_dir_all(&graveyard).map_err(|e| LockError::lock_failed(&graveyard, e))?;
        Ok(true)
    }

    fn release(&self, me: &HolderIdentity) -> Result<()> {
        match self.inspect()? {
            Artifact::Absent => Err(LockError::NotLocked(self.lock_path.clone())),
            Artifact::Held(Some(holder)) if holder.same_holder(me) => self.remove_if_owned(me),
            Artifact::Held(holder) => Err(LockError::NotMyLock {
                path: self.lock_path.clone(),
                holder,
            }),
        }
    }
}
