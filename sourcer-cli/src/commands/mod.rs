//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod run;
mod safety;

pub use run::RunCommands;
pub use safety::SafetyCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Submit, inspect and follow runs
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Check terms and manage the banned-term list
    Safety {
        #[command(subcommand)]
        command: SafetyCommands,
    },
}

/// Routes the command to the appropriate handler module
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Run { command } => run::handle_run_command(command, config).await,
        Commands::Safety { command } => safety::handle_safety_command(command, config).await,
    }
}
