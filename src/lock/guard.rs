use super::{LockFile, WaitPolicy};
use crate::error::Result;
use std::ops::{Deref, DerefMut};
use tracing::{debug, warn};

/// Holds a [`LockFile`] for the life of a scope.
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a mut LockFile,
}

impl LockFile {
    /// Acquire with the default wait policy and release when the guard drops.
    pub fn lock(&mut self) -> Result<LockGuard<'_>> {
        self.acquire()?;
        Ok(LockGuard { lock: self })
    }

    pub fn lock_with(&mut self, wait: WaitPolicy) -> Result<LockGuard<'_>> {
        self.acquire_with(wait)?;
        Ok(LockGuard { lock: self })
    }
}

impl Deref for LockGuard<'_> {
    type Target = LockFile;

    fn deref(&self) -> &LockFile {
        self.lock
    }
}

impl DerefMut for LockGuard<'_> {
    fn deref_mut(&mut self) -> &mut LockFile {
        self.lock
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        // Never panic in drop; a broken or stolen lock is only worth a warning.
        match self.lock.release() {
            Ok(()) => debug!("Guard released {}", self.lock.path().display()),
            Err(e) => warn!(
                "Failed to release lock {} (non-fatal): {}",
                self.lock.path().display(),
                e
            ),
        }
    }
}

/// Run `f` while holding `lock`, returning its result untouched.
pub fn with_lock<T>(lock: &mut LockFile, f: impl FnOnce() -> T) -> Result<T> {
    let _guard = lock.lock()?;
    Ok(f())
}
