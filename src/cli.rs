//! CLI argument parsing and command dispatch

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;

/// lib50 - Validate .cs50.yml files and push workspaces to their slug
#[derive(Parser, Debug)]
#[command(name = "lib50")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the .cs50.yml configuration of a workspace for one tool
    Validate(commands::validate::ValidateArgs),

    /// Push a workspace to the repository a slug resolves to
    Push(commands::push::PushArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        init_logging(&self.log_level);

        match self.command {
            Commands::Validate(args) => commands::validate::execute(args),
            Commands::Push(args) => commands::push::execute(args),
        }
    }
}

/// `RUST_LOG`, when set, refines the `--log-level` default.
fn init_logging(level: &str) {
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(level).format_timestamp(None);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    let _ = builder.try_init();
}
