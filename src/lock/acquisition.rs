use super::path::{default_database_path, derive_lock_path, resolve_path};
use super::{
    LinkStrategy, LockStrategy, MkdirStrategy, PidFileStrategy, ProcessProbe, SignalProbe, StrategyKind,
    SymlinkStrategy, TableStrategy, TryAcquire,
};
use crate::error::{LockError, Result};
use crate::identity::HolderIdentity;
use rand::Rng;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Time source for the acquisition loop.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration)
    }
}

/// How long `acquire` waits for a lock held by someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitPolicy {
    /// Poll until acquired.
    #[default]
    Wait,
    /// One attempt; fail with `AlreadyLocked`.
    NoWait,
    /// Poll until acquired or the deadline passes; fail with `LockTimeout`.
    /// A zero duration behaves like `NoWait`.
    Timeout(Duration),
}

impl WaitPolicy {
    /// Seconds as accepted by most callers: zero or negative means a single
    /// attempt, positive means wait at most that long.
    pub fn from_secs(secs: f64) -> Self {
        if secs > 0.0 && secs.is_finite() {
            WaitPolicy::Timeout(Duration::from_secs_f64(secs))
        } else if secs > 0.0 {
            WaitPolicy::Wait
        } else {
            WaitPolicy::NoWait
        }
    }
}

/// Construction parameters for a [`LockFile`].
#[derive(Debug, Clone)]
pub struct LockOptions {
    pub strategy: StrategyKind,
    /// Ask for two threads of one process to contend as separate holders.
    /// Ignored by strategies that cannot tell threads apart.
    pub threaded: bool,
    /// Used by [`LockFile::acquire`].
    pub timeout: WaitPolicy,
    pub poll_interval: Duration,
    pub poll_jitter: Duration,
    /// Table strategy database; defaults to the user cache directory.
    pub database: Option<PathBuf>,
    /// Act as this holder instead of the calling process/thread.
    pub holder: Option<HolderIdentity>,
    pub clock: Arc<dyn Clock>,
    pub probe: Arc<dyn ProcessProbe>,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            threaded: true,
            timeout: WaitPolicy::Wait,
            poll_interval: Duration::from_millis(100),
            poll_jitter: Duration::ZERO,
            database: None,
            holder: None,
            clock: Arc::new(SystemClock),
            probe: Arc::new(SignalProbe),
        }
    }
}

impl LockOptions {
    pub fn new(strategy: StrategyKind) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    pub fn with_threaded(mut self, threaded: bool) -> Self {
        self.threaded = threaded;
        self
    }

    pub fn with_timeout(mut self, timeout: WaitPolicy) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_poll_jitter(mut self, jitter: Duration) -> Self {
        self.poll_jitter = jitter;
        self
    }

    pub fn with_database(mut self, database: impl Into<PathBuf>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_holder(mut self, holder: HolderIdentity) -> Self {
        self.holder = Some(holder);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn ProcessProbe>) -> Self {
        self.probe = probe;
        self
    }

    fn build_strategy(&self, lock_path: PathBuf) -> Result<Box<dyn LockStrategy>> {
        Ok(match self.strategy {
            StrategyKind::Link => Box::new(LinkStrategy::new(lock_path, self.threaded)),
            StrategyKind::Symlink => Box::new(SymlinkStrategy::new(lock_path, self.threaded)),
            StrategyKind::Mkdir => Box::new(MkdirStrategy::new(lock_path, self.threaded)),
            StrategyKind::PidFile => Box::new(PidFileStrategy::with_probe(lock_path, self.probe.clone())),
            StrategyKind::Sqlite => {
                let database = match &self.database {
                    Some(db) => db.clone(),
                    None => default_database_path()?,
                };
                Box::new(TableStrategy::open(database, lock_path, self.threaded)?)
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockState {
    Unlocked,
    LockedByMe,
}

/// A lock on one path, driven through a [`LockStrategy`].
///
/// The holder identity is fixed when the `LockFile` is built, taking the
/// constructing thread for thread-distinguishing strategies. Instances keep
/// independent local state; the artifact on disk is the only shared truth.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    strategy: Box<dyn LockStrategy>,
    identity: HolderIdentity,
    timeout: WaitPolicy,
    poll_interval: Duration,
    poll_jitter: Duration,
    clock: Arc<dyn Clock>,
    state: LockState,
}

impl LockFile {
    /// Hard-link lock on `path` with default options.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_options(path, LockOptions::default())
    }

    pub fn with_options(path: impl AsRef<Path>, options: LockOptions) -> Result<Self> {
        let path = resolve_path(path.as_ref())?;
        let strategy = options.build_strategy(derive_lock_path(&path))?;
        let identity = options
            .holder
            .clone()
            .unwrap_or_else(|| HolderIdentity::current(strategy.distinguishes_threads()));

        Ok(LockFile {
            path,
            strategy,
            identity,
            timeout: options.timeout,
            poll_interval: options.poll_interval,
            poll_jitter: options.poll_jitter,
            clock: options.clock,
            state: LockState::Unlocked,
        })
    }

    /// Acquire with the default wait policy given at construction.
    pub fn acquire(&mut self) -> Result<()> {
        self.acquire_with(self.timeout)
    }

    pub fn acquire_with(&mut self, wait: WaitPolicy) -> Result<()> {
        if self.state == LockState::LockedByMe {
            return Ok(());
        }

        debug!(
            "Acquiring lock: {} (strategy: {}, wait: {:?})",
            self.path.display(),
            self.strategy.kind(),
            wait
        );

        let wait = match wait {
            WaitPolicy::Timeout(d) if d.is_zero() => WaitPolicy::NoWait,
            other => other,
        };
        let interval = match wait {
            WaitPolicy::Timeout(d) => (d / 10).min(self.poll_interval),
            _ => self.poll_interval,
        };

        let start = self.clock.now();
        let mut rng = rand::thread_rng();

        loop {
            let holder = match self.strategy.try_acquire(&self.identity)? {
                TryAcquire::Acquired => break,
                TryAcquire::HeldByOther(holder) => Some(holder),
                TryAcquire::HeldByOtherUnknownIdentity => None,
            };

            match wait {
                WaitPolicy::NoWait => {
                    return Err(LockError::AlreadyLocked {
                        path: self.path.clone(),
                        holder,
                    });
                }
                WaitPolicy::Timeout(limit) => {
                    let elapsed = self.clock.now().saturating_duration_since(start);
                    if elapsed >= limit {
                        return Err(LockError::LockTimeout {
                            path: self.path.clone(),
                            elapsed,
                        });
                    }
                }
                WaitPolicy::Wait => {}
            }

            let jitter = if self.poll_jitter.is_zero() {
                Duration::ZERO
            } else {
                Duration::from_millis(rng.gen_range(0..=self.poll_jitter.as_millis() as u64))
            };
            self.clock.sleep(interval + jitter);
        }

        self.state = LockState::LockedByMe;
        debug!("Lock acquired: {} by {}", self.path.display(), self.identity);
        Ok(())
    }

    /// Remove the artifact if it is ours.
    ///
    /// Fails with `NotLocked` when there is no artifact and `NotMyLock` when
    /// it belongs to someone else; either way this instance no longer
    /// considers itself the holder.
    pub fn release(&mut self) -> Result<()> {
        let result = self.strategy.release(&self.identity);
        match &result {
            Ok(()) => debug!("Lock released: {}", self.path.display()),
            Err(LockError::NotLocked(_)) | Err(LockError::NotMyLock { .. }) => {}
            Err(_) => return result,
        }
        self.state = LockState::Unlocked;
        result
    }

    pub fn is_locked(&self) -> bool {
        self.strategy.is_locked().unwrap_or_else(|e| {
            warn!("Failed to inspect lock {}: {}", self.path.display(), e);
            false
        })
    }

    pub fn i_am_locking(&self) -> bool {
        match self.current_holder() {
            Some(holder) => holder.same_holder(&self.identity),
            None => false,
        }
    }

    pub fn current_holder(&self) -> Option<HolderIdentity> {
        self.strategy.current_holder().unwrap_or_else(|e| {
            warn!("Failed to read lock holder {}: {}", self.path.display(), e);
            None
        })
    }

    /// Remove the artifact regardless of who holds it. Succeeds when there
    /// is nothing to remove.
    pub fn break_lock(&mut self) -> Result<()> {
        self.strategy.break_lock()?;
        debug!("Lock broken: {}", self.path.display());
        self.state = LockState::Unlocked;
        Ok(())
    }

    /// The protected path, resolved to an absolute path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The artifact that represents the lock (a file, link, directory or
    /// table key).
    pub fn artifact(&self) -> &Path {
        self.strategy.artifact()
    }

    pub fn identity(&self) -> &HolderIdentity {
        &self.identity
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    pub fn distinguishes_threads(&self) -> bool {
        self.strategy.distinguishes_threads()
    }
}
