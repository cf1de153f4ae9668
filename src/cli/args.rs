use clap::{Args as ClapArgs, Parser, Subcommand};
use lockfile::StrategyKind;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "lockfile",
    version,
    about = "Cross-process locks built on atomic filesystem primitives",
    long_about = None
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output
    #[arg(short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct LockArgs {
    /// Path the lock protects (the artifact is PATH.lock)
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Locking primitive: link, symlink, mkdir, pidfile or sqlite
    #[arg(short = 's', long, value_name = "STRATEGY", default_value = "link")]
    pub strategy: StrategyKind,

    /// Treat all threads of a process as one holder
    #[arg(long)]
    pub no_threads: bool,

    /// Database for the sqlite strategy
    #[arg(long, value_name = "FILE")]
    pub database: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show whether PATH is locked and by whom
    Status {
        #[command(flatten)]
        lock: LockArgs,
    },

    /// Forcibly remove the lock on PATH, whoever holds it
    Break {
        #[command(flatten)]
        lock: LockArgs,
    },

    /// Run a command while holding the lock on PATH
    Run {
        #[command(flatten)]
        lock: LockArgs,

        /// Fail immediately if locked
        #[arg(long, conflicts_with = "timeout")]
        no_wait: bool,

        /// Give up after this long (e.g. 500ms, 10s, 2m)
        #[arg(short = 't', long, value_name = "DURATION")]
        timeout: Option<String>,

        /// Command and arguments to run
        #[arg(last = true, required = true, value_name = "COMMAND")]
        command: Vec<String>,
    },
}
