use crate::cli::args::LockArgs;
use lockfile::utils::parse_duration;
use lockfile::{LockError, LockFile, LockOptions, Result, WaitPolicy};
use std::process;
use tracing::debug;

fn open_lock(args: &LockArgs, timeout: WaitPolicy) -> Result<LockFile> {
    let mut options = LockOptions::new(args.strategy)
        .with_threaded(!args.no_threads)
        .with_timeout(timeout);
    if let Some(db) = &args.database {
        options = options.with_database(db);
    }
    LockFile::with_options(&args.path, options)
}

pub fn execute_status(args: &LockArgs) -> Result<()> {
    let lock = open_lock(args, WaitPolicy::NoWait)?;

    if !lock.is_locked() {
        println!("{}: unlocked", lock.path().display());
        return Ok(());
    }

    match lock.current_holder() {
        Some(holder) => println!(
            "{}: locked by {} (pid {} on {})",
            lock.path().display(),
            holder,
            holder.pid,
            holder.host
        ),
        None => println!("{}: locked (holder unknown)", lock.path().display()),
    }
    Ok(())
}

pub fn execute_break(args: &LockArgs) -> Result<()> {
    let mut lock = open_lock(args, WaitPolicy::NoWait)?;
    let holder = lock.current_holder();
    lock.break_lock()?;

    match holder {
        Some(holder) => eprintln!("Broke lock on {} held by {}", lock.path().display(), holder),
        None => eprintln!("No lock held on {}", lock.path().display()),
    }
    Ok(())
}

/// Returns the child's exit code.
pub fn execute_run(args: &LockArgs, no_wait: bool, timeout: Option<&str>, command: &[String]) -> Result<i32> {
    let wait = if no_wait {
        WaitPolicy::NoWait
    } else if let Some(timeout) = timeout {
        WaitPolicy::Timeout(parse_duration(timeout)?)
    } else {
        WaitPolicy::Wait
    };

    let (program, rest) = command
        .split_first()
        .ok_or_else(|| LockError::Other("No command given".to_string()))?;

    let mut lock = open_lock(args, wait)?;
    let guard = lock.lock()?;
    debug!("Running {:?} under {}", command, guard.artifact().display());

    let status = process::Command::new(program).args(rest).status()?;
    drop(guard);

    Ok(status.code().unwrap_or(1))
}
