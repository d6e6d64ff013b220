//! isoboot CLI - provision a persistent boot entry from a disc image
//!
//! This is the main entry point for the isoboot command-line interface.

mod cli;
mod commands;
mod output;
mod progress;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Deploy(args) => commands::deploy::run(args, cli.config.as_deref()),
        Commands::Recover(args) => commands::recover::run(args, cli.config.as_deref()),
        Commands::Status(args) => commands::status::run(args, cli.config.as_deref()),
    }
}

/// Initialize tracing with appropriate verbosity
fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            // Progress is rendered separately; keep library chatter at warn by default
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}
