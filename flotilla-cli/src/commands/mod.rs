//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod job;
mod org;
mod pipeline;

pub use job::JobCommands;
pub use org::OrgCommands;
pub use pipeline::PipelineCommands;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use flotilla_client::ClientError;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Pipeline management
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Job management
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Organization administration (requires the admin token)
    Org {
        #[command(subcommand)]
        command: OrgCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    let result = match command {
        Commands::Pipeline { command } => pipeline::handle_pipeline_command(command, config).await,
        Commands::Job { command } => job::handle_job_command(command, config).await,
        Commands::Org { command } => org::handle_org_command(command, config).await,
    };
    result.map_err(with_hint)
}

/// Point at the fix for failures the user can act on
fn with_hint(err: anyhow::Error) -> anyhow::Error {
    let hint = match err.downcast_ref::<ClientError>() {
        Some(e) if e.is_unauthorized() => "check --token or FLOTILLA_TOKEN",
        Some(e) if e.is_conflict() => "the record changed while the command ran, run it again",
        Some(e) if e.is_upstream() => "the cloud provider failed, retry later",
        _ => return err,
    };
    err.context(hint)
}

/// Format a timestamp the way every command prints it
pub(crate) fn timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}
