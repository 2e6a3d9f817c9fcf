//! Cyme CLI entry point.

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use cyme_cli::cli::Cli;
use cyme_cli::commands;

fn main() {
    // Load .env.local if it exists (CYME_WORKDIR, CYME_DEBUG etc.)
    let _ = dotenvy::from_filename(".env.local");

    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level().to_string()));

    // Logs go to stderr so they do not break status lines.
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = commands::execute(&cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
