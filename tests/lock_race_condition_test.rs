use lockfile::{LockFile, LockOptions, StrategyKind, WaitPolicy};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const WORKERS: usize = 6;
const ROUNDS: usize = 5;

/// Read-modify-write a counter file from several threads; lost updates mean
/// two threads were inside the lock at once.
fn hammer(kind: StrategyKind, dir: &Path) {
    let counter: PathBuf = dir.join("counter");
    fs::write(&counter, "0").unwrap();

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let counter = counter.clone();
            let options = LockOptions::new(kind)
                .with_database(dir.join("locks.sqlite"))
                .with_poll_interval(Duration::from_millis(5));
            thread::spawn(move || {
                let mut lock = LockFile::with_options(&counter, options).unwrap();
                for _ in 0..ROUNDS {
                    let _guard = lock.lock_with(WaitPolicy::Wait).unwrap();
                    let value: usize = fs::read_to_string(&counter).unwrap().parse().unwrap();
                    thread::sleep(Duration::from_millis(1));
                    fs::write(&counter, (value + 1).to_string()).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let total: usize = fs::read_to_string(&counter).unwrap().parse().unwrap();
    assert_eq!(total, WORKERS * ROUNDS);
}

#[test]
fn test_link_excludes_threads() {
    let temp = TempDir::new().unwrap();
    hammer(StrategyKind::Link, temp.path());
}

#[test]
fn test_symlink_excludes_threads() {
    let temp = TempDir::new().unwrap();
    hammer(StrategyKind::Symlink, temp.path());
}

#[test]
fn test_mkdir_excludes_threads() {
    let temp = TempDir::new().unwrap();
    hammer(StrategyKind::Mkdir, temp.path());
}

#[test]
fn test_sqlite_excludes_threads() {
    let temp = TempDir::new().unwrap();
    hammer(StrategyKind::Sqlite, temp.path());
}

#[test]
fn test_no_staging_leftovers() {
    let temp = TempDir::new().unwrap();
    hammer(StrategyKind::Mkdir, temp.path());
    hammer(StrategyKind::Link, temp.path());

    let names: Vec<String> = fs::read_dir(temp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["counter".to_string()]);
}
