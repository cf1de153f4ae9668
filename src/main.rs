use clap::Parser;
use std::process;
use tracing::Level;

mod cli;

fn main() {
    let args = cli::Args::parse();

    let level = if args.verbose > 0 { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();

    match cli::run(args) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(e.exit_code());
        }
    }
}
