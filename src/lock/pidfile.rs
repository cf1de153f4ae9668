use super::{is_already_exists, remove_file_if_present, Artifact, LockStrategy, StrategyKind, TryAcquire};
use crate::error::{LockError, Result};
use crate::identity::{local_hostname, HolderIdentity};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Answers "does a process with this PID exist?".
pub trait ProcessProbe: Send + Sync + fmt::Debug {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Probes with `kill(pid, 0)`: delivered or refused for lack of permission
/// both mean the process exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalProbe;

impl ProcessProbe for SignalProbe {
    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        if pid <= 0 {
            return false;
        }
        // SAFETY: signal 0 performs only the existence and permission check.
        if unsafe { libc::kill(pid, 0) } == 0 {
            return true;
        }
        io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    fn is_alive(&self, _pid: u32) -> bool {
        true
    }
}

/// PID-file locking: `<path>.lock` holds the owner's decimal process id.
///
/// Only the process is recorded, so every thread of the owning process is
/// the same holder. A file naming a process that no longer exists is stale
/// and is reclaimed on the next attempt.
#[derive(Debug)]
pub struct PidFileStrategy {
    pid_path: PathBuf,
    host: String,
    probe: Arc<dyn ProcessProbe>,
}

impl PidFileStrategy {
    pub fn new(pid_path: impl Into<PathBuf>) -> Self {
        Self::with_probe(pid_path, Arc::new(SignalProbe))
    }

    pub fn with_probe(pid_path: impl Into<PathBuf>, probe: Arc<dyn ProcessProbe>) -> Self {
        Self {
            pid_path: pid_path.into(),
            host: local_hostname(),
            probe,
        }
    }

    /// The PID recorded in the file, if present and well formed.
    pub fn read_pid(&self) -> Result<Option<u32>> {
        match fs::read_to_string(&self.pid_path) {
            Ok(contents) => Ok(contents.trim().parse().ok()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LockError::lock_failed(&self.pid_path, e)),
        }
    }

    fn write_pid(&self, pid: u32) -> io::Result<()> {
        let mut opts = OpenOptions::new();
        opts.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o644);
        }
        let mut file = opts.open(&self.pid_path)?;
        writeln!(file, "{}", pid)?;
        file.sync_all()
    }

    fn holder_for(&self, pid: u32) -> HolderIdentity {
        HolderIdentity::new(self.host.clone(), pid, None)
    }
}

impl LockStrategy for PidFileStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PidFile
    }

    fn distinguishes_threads(&self) -> bool {
        false
    }

    fn artifact(&self) -> &Path {
        &self.pid_path
    }

    fn try_acquire(&self, me: &HolderIdentity) -> Result<TryAcquire> {
        // The file has no room for a host, so it could never be read back as `me`.
        if me.host != self.host {
            return Err(LockError::Other(format!(
                "pid file {} can only be held by processes on {}, not {}",
                self.pid_path.display(),
                self.host,
                me
            )));
        }

        // Another create is allowed only after the file vanished or a stale one was cleared.
        for _ in 0..2 {
            match self.write_pid(me.pid) {
                Ok(()) => {
                    debug!("Wrote pid {} to {}", me.pid, self.pid_path.display());
                    return Ok(TryAcquire::Acquired);
                }
                Err(e) if is_already_exists(&e) => {}
                Err(e) => return Err(LockError::lock_failed(&self.pid_path, e)),
            }

            let holder = match self.inspect()? {
                Artifact::Absent => continue,
                Artifact::Held(None) => return Ok(TryAcquire::HeldByOtherUnknownIdentity),
                Artifact::Held(Some(holder)) => holder,
            };
            if holder.same_holder(me) {
                return Ok(TryAcquire::Acquired);
            }
            if self.probe.is_alive(holder.pid) {
                return Ok(TryAcquire::HeldByOther(holder));
            }

            // Only clear the file if it still names the dead process.
            if self.read_pid()? != Some(holder.pid) {
                return Ok(TryAcquire::HeldByOtherUnknownIdentity);
            }
            info!(
                "Removing stale pid file {} (process {} is gone)",
                self.pid_path.display(),
                holder.pid
            );
            remove_file_if_present(&self.pid_path)?;
        }

        match self.read_pid()? {
            Some(pid) => Ok(TryAcquire::HeldByOther(self.holder_for(pid))),
            None => Ok(TryAcquire::HeldByOtherUnknownIdentity),
        }
    }

    fn inspect(&self) -> Result<Artifact> {
        match fs::symlink_metadata(&self.pid_path) {
            Ok(meta) if meta.is_dir() => return Ok(Artifact::Held(None)),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Artifact::Absent),
            Err(e) => return Err(LockError::lock_failed(&self.pid_path, e)),
        }
        match fs::read_to_string(&self.pid_path) {
            Ok(contents) => Ok(Artifact::Held(
                contents.trim().parse().ok().map(|pid| self.holder_for(pid)),
            )),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Artifact::Absent),
            Err(e) => Err(LockError::lock_failed(&self.pid_path, e)),
        }
    }

    fn remove(&self) -> Result<bool> {
        remove_file_if_present(&self.pid_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Debug)]
    struct Dead;

    impl ProcessProbe for Dead {
        fn is_alive(&self, _pid: u32) -> bool {
            false
        }
    }

    #[test]
    fn test_pid_file_contains_only_pid() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("svc.lock");
        let strategy = PidFileStrategy::new(&path);
        let me = HolderIdentity::new(local_hostname(), 4321, None);

        assert_eq!(strategy.try_acquire(&me).unwrap(), TryAcquire::Acquired);
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), "4321");
        assert_eq!(strategy.read_pid().unwrap(), Some(4321));
    }

    #[test]
    fn test_stale_pid_is_reclaimed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("svc.lock");
        fs::write(&path, "999999\n").unwrap();
        let strategy = PidFileStrategy::with_probe(&path, Arc::new(Dead));
        let me = HolderIdentity::new(local_hostname(), 12, None);

        assert_eq!(strategy.try_acquire(&me).unwrap(), TryAcquire::Acquired);
        assert_eq!(strategy.read_pid().unwrap(), Some(12));
    }

    #[test]
    fn test_live_pid_blocks() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("svc.lock");
        let own = std::process::id();
        fs::write(&path, format!("{}\n", own)).unwrap();
        let strategy = PidFileStrategy::new(&path);
        let other = HolderIdentity::new(local_hostname(), own.wrapping_add(1), None);

        assert_eq!(
            strategy.try_acquire(&other).unwrap(),
            TryAcquire::HeldByOther(HolderIdentity::new(local_hostname(), own, None))
        );
    }

    #[test]
    fn test_own_pid_from_another_host_is_not_ours() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("svc.lock");
        let own = std::process::id();
        fs::write(&path, format!("{}\n", own)).unwrap();
        let strategy = PidFileStrategy::new(&path);
        let foreign = HolderIdentity::new(format!("{}-elsewhere", local_hostname()), own, None);

        assert!(matches!(
            strategy.try_acquire(&foreign).unwrap_err(),
            LockError::Other(_)
        ));
        assert!(!strategy
            .current_holder()
            .unwrap()
            .is_some_and(|h| h.same_holder(&foreign)));
        assert_eq!(strategy.read_pid().unwrap(), Some(own));
    }

    #[cfg(unix)]
    #[test]
    fn test_inspect_distinguishes_missing_from_unreadable() {
        let temp = TempDir::new().unwrap();
        let strategy = PidFileStrategy::new(temp.path().join("svc.lock"));
        assert_eq!(strategy.inspect().unwrap(), Artifact::Absent);

        // Something that is not a pid file still occupies the name.
        fs::create_dir(temp.path().join("svc.lock")).unwrap();
        assert_eq!(strategy.inspect().unwrap(), Artifact::Held(None));

        // A path through a regular file fails with ENOTDIR, not NotFound.
        fs::write(temp.path().join("plain"), "x").unwrap();
        let nested = PidFileStrategy::new(temp.path().join("plain").join("svc.lock"));
        assert!(matches!(
            nested.inspect().unwrap_err(),
            LockError::LockFailed { .. }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_probe_sees_self() {
        assert!(SignalProbe.is_alive(std::process::id()));
        assert!(!SignalProbe.is_alive(0));
    }
}
