//! Holder identities and the unique names derived from them.
//!
//! A [`HolderIdentity`] is encoded on disk as `<hostname>-<threadid>-<pid>`,
//! with an empty thread segment for thread-oblivious holders. Staging
//! artifacts append a `.<sequence>` discriminator so two attempts by the same
//! holder never collide.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);
static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: u64 = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
}

/// Stable numeric id of the calling thread, unique within this process.
pub fn current_thread_token() -> u64 {
    THREAD_TOKEN.with(|token| *token)
}

/// Who holds (or wants to hold) a lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HolderIdentity {
    pub host: String,
    pub pid: u32,
    pub thread: Option<u64>,
    pub sequence: Option<u64>,
}

impl HolderIdentity {
    pub fn new(host: impl Into<String>, pid: u32, thread: Option<u64>) -> Self {
        Self {
            host: host.into(),
            pid,
            thread,
            sequence: None,
        }
    }

    /// Identity of the calling process, and of the calling thread when
    /// `thread_aware` is set.
    pub fn current(thread_aware: bool) -> Self {
        let thread = thread_aware.then(current_thread_token);
        Self::new(local_hostname(), std::process::id(), thread)
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Two identities name the same holder when every field populated on
    /// both sides agrees. Thread must match exactly so a thread-aware holder
    /// never matches a thread-oblivious one.
    pub fn same_holder(&self, other: &HolderIdentity) -> bool {
        let sequence_matches = match (self.sequence, other.sequence) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        self.host == other.host
            && self.pid == other.pid
            && self.thread == other.thread
            && sequence_matches
    }

    /// The `<hostname>-<threadid or "">-<pid>` token stored in artifacts.
    pub fn encode(&self) -> String {
        let thread = self.thread.map(|t| t.to_string()).unwrap_or_default();
        match self.sequence {
            Some(seq) => format!("{}-{}-{}.{}", self.host, thread, self.pid, seq),
            None => format!("{}-{}-{}", self.host, thread, self.pid),
        }
    }

    /// Parse a token produced by [`HolderIdentity::encode`]. The hostname may
    /// itself contain dashes, so fields are taken from the right.
    pub fn decode(token: &str) -> Option<Self> {
        let mut parts = token.trim().rsplitn(3, '-');
        let tail = parts.next()?;
        let thread = parts.next()?;
        let host = parts.next()?;
        if host.is_empty() {
            return None;
        }

        let (pid, sequence) = match tail.split_once('.') {
            Some((pid, seq)) => (pid, Some(seq.parse().ok()?)),
            None => (tail, None),
        };
        let thread = if thread.is_empty() {
            None
        } else {
            Some(thread.parse().ok()?)
        };

        Some(Self {
            host: host.to_string(),
            pid: pid.parse().ok()?,
            thread,
            sequence,
        })
    }
}

impl fmt::Display for HolderIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for HolderIdentity {
    type Err = crate::LockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
            .ok_or_else(|| crate::LockError::Other(format!("Malformed holder identity '{}'", s)))
    }
}

/// Hostname of this machine, or `unknown` when it cannot be determined.
pub fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Hands out per-attempt names for staging artifacts.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniqueNameGenerator;

impl UniqueNameGenerator {
    pub fn next_sequence(&self) -> u64 {
        NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed)
    }

    /// A sibling of `artifact` that no other live attempt will use:
    /// `<artifact>.<token>.<sequence>`.
    pub fn staging_path(&self, artifact: &Path, holder: &HolderIdentity) -> PathBuf {
        let unique = holder.clone().with_sequence(self.next_sequence());
        let mut name = artifact.as_os_str().to_os_string();
        name.push(".");
        name.push(unique.encode());
        PathBuf::from(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_encode_thread_aware() {
        let id = HolderIdentity::new("build-host", 4242, Some(7));
        assert_eq!(id.encode(), "build-host-7-4242");
    }

    #[test]
    fn test_encode_thread_oblivious() {
        let id = HolderIdentity::new("box", 10, None);
        assert_eq!(id.encode(), "box--10");
    }

    #[test]
    fn test_decode_dashed_hostname() {
        let id = HolderIdentity::decode("my-build-host-3-99").unwrap();
        assert_eq!(id.host, "my-build-host");
        assert_eq!(id.thread, Some(3));
        assert_eq!(id.pid, 99);
        assert_eq!(id.sequence, None);
    }

    #[test]
    fn test_decode_with_sequence() {
        let id = HolderIdentity::decode("box--10.5").unwrap();
        assert_eq!(id, HolderIdentity::new("box", 10, None).with_sequence(5));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(HolderIdentity::decode("").is_none());
        assert!(HolderIdentity::decode("no-pid-here").is_none());
        assert!(HolderIdentity::decode("-1-2").is_none());
    }

    #[test]
    fn test_same_holder_ignores_missing_sequence() {
        let a = HolderIdentity::new("box", 1, Some(2));
        let b = a.clone().with_sequence(9);
        assert!(a.same_holder(&b));
        assert!(!b.same_holder(&a.clone().with_sequence(10)));
        assert!(!a.same_holder(&HolderIdentity::new("box", 1, None)));
    }

    #[test]
    fn test_thread_token_differs_across_threads() {
        let here = current_thread_token();
        assert_eq!(here, current_thread_token());
        let there = thread::spawn(current_thread_token).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn test_staging_paths_are_unique() {
        let generator = UniqueNameGenerator;
        let holder = HolderIdentity::current(true);
        let artifact = Path::new("/tmp/resource.lock");
        let a = generator.staging_path(artifact, &holder);
        let b = generator.staging_path(artifact, &holder);
        assert_ne!(a, b);
        assert!(a.to_string_lossy().starts_with("/tmp/resource.lock."));
    }
}
