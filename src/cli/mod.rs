mod args;
mod commands;

use lockfile::Result;
pub use args::{Args, Command};

pub fn run(args: Args) -> Result<i32> {
    match args.command {
        Command::Status { lock } => commands::execute_status(&lock).map(|_| 0),
        Command::Break { lock } => commands::execute_break(&lock).map(|_| 0),
        Command::Run {
            lock,
            no_wait,
            timeout,
            command,
        } => commands::execute_run(&lock, no_wait, timeout.as_deref(), &command),
    }
}
