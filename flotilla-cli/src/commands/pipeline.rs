//! Pipeline command handlers
//!
//! Handles all pipeline-related CLI commands including creation, listing,
//! rolling updates, closing and destruction.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use flotilla_client::OrchestratorClient;
use flotilla_core::domain::pipeline::{Pipeline, PipelineStatus};
use flotilla_core::domain::pipeline_base::{BaseConfig, PipelineBaseStatus};
use flotilla_core::dto::pipeline::{CreatePipeline, PipelineSummary, UpdatePipeline};
use uuid::Uuid;

use super::timestamp;
use crate::config::Config;
use crate::id_resolver::resolve_pipeline_id;
use crate::types::IdOrPrefix;

/// Pipeline subcommands
#[derive(Subcommand)]
pub enum PipelineCommands {
    /// Create a new pipeline from a JSON base configuration
    Create {
        /// Pipeline name (lowercase letters, digits and hyphens)
        #[arg(short, long)]
        name: String,

        /// Path to the base configuration file
        #[arg(short, long)]
        config: String,

        /// Store the pipeline without deploying anything
        #[arg(long)]
        dry_run: bool,
    },
    /// List all pipelines
    List,
    /// Get pipeline details
    Get {
        /// Pipeline ID, unambiguous prefix or name
        id: String,
    },
    /// Roll a running pipeline onto a new base configuration
    Update {
        /// Pipeline ID, unambiguous prefix or name
        id: String,

        /// Path to the new base configuration file
        #[arg(short, long)]
        config: String,
    },
    /// Rebuild a pipeline whose current base failed to open
    Retry {
        /// Pipeline ID, unambiguous prefix or name
        id: String,
    },
    /// Stop a pipeline and close its bases
    Close {
        /// Pipeline ID, unambiguous prefix or name
        id: String,
    },
    /// Destroy a stopped pipeline
    Delete {
        /// Pipeline ID, unambiguous prefix or name
        id: String,
    },
    /// List the base generations of a pipeline
    Bases {
        /// Pipeline ID, unambiguous prefix or name
        id: String,
    },
    /// Re-issue the failed step of a pipeline base
    RetryBase {
        /// Pipeline base ID
        base_id: Uuid,
    },
}

/// Handle pipeline commands
///
/// Routes pipeline subcommands to their respective handlers.
pub async fn handle_pipeline_command(command: PipelineCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        PipelineCommands::Create {
            name,
            config,
            dry_run,
        } => create_pipeline(&client, name, &config, dry_run).await,
        PipelineCommands::List => list_pipelines(&client).await,
        PipelineCommands::Get { id } => get_pipeline(&client, &id).await,
        PipelineCommands::Update { id, config } => update_pipeline(&client, &id, &config).await,
        PipelineCommands::Retry { id } => {
            let uuid = resolve_pipeline_id(&client, &IdOrPrefix::parse(&id)).await?;
            let pipeline = client.retry_pipeline(uuid).await?;
            println!("{}", "✓ Pipeline rebuild requested".green().bold());
            print_pipeline_details(&pipeline);
            Ok(())
        }
        PipelineCommands::Close { id } => {
            let uuid = resolve_pipeline_id(&client, &IdOrPrefix::parse(&id)).await?;
            let pipeline = client.close_pipeline(uuid).await?;
            println!("{}", "✓ Pipeline closing".green().bold());
            print_pipeline_details(&pipeline);
            Ok(())
        }
        PipelineCommands::Delete { id } => delete_pipeline(&client, &id).await,
        PipelineCommands::Bases { id } => list_bases(&client, &id).await,
        PipelineCommands::RetryBase { base_id } => {
            let base = client.retry_pipeline_base(base_id).await?;
            println!(
                "{} base {} is now {}",
                "✓".green().bold(),
                base.name.bold(),
                colorize_base_status(base.status)
            );
            Ok(())
        }
    }
}

/// Read and parse a base configuration file
fn read_base_config(path: &str) -> Result<BaseConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path))?;

    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse base configuration: {}", path))
}

async fn create_pipeline(
    client: &OrchestratorClient,
    name: String,
    config_path: &str,
    dry_run: bool,
) -> Result<()> {
    let config = read_base_config(config_path)?;

    let pipeline = client
        .create_pipeline(CreatePipeline { name, config }, dry_run)
        .await?;

    if dry_run {
        println!("{}", "✓ Pipeline stored (dry run, nothing deployed)".green().bold());
    } else {
        println!("{}", "✓ Pipeline created successfully!".green().bold());
    }
    println!("  ID:     {}", pipeline.id.to_string().cyan());
    println!("  Name:   {}", pipeline.name.bold());
    println!("  Status: {}", colorize_status(pipeline.status));

    Ok(())
}

async fn list_pipelines(client: &OrchestratorClient) -> Result<()> {
    let pipelines = client.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{}", "No pipelines found.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} pipeline(s):", pipelines.len()).bold()
        );
        println!();
        for pipeline in pipelines {
            print_pipeline_summary(&pipeline);
        }
    }

    Ok(())
}

async fn get_pipeline(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, &IdOrPrefix::parse(id)).await?;

    let pipeline = client.get_pipeline(uuid).await?;

    print_pipeline_details(&pipeline);

    Ok(())
}

async fn update_pipeline(client: &OrchestratorClient, id: &str, config_path: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, &IdOrPrefix::parse(id)).await?;
    let config = read_base_config(config_path)?;

    let pipeline = client
        .update_pipeline(uuid, UpdatePipeline { config })
        .await?;

    println!("{}", "✓ Rolling update started".green().bold());
    print_pipeline_details(&pipeline);

    Ok(())
}

async fn delete_pipeline(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, &IdOrPrefix::parse(id)).await?;

    client.delete_pipeline(uuid).await?;

    println!(
        "{}",
        format!("✓ Pipeline {} deleted successfully!", uuid)
            .green()
            .bold()
    );

    Ok(())
}

async fn list_bases(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, &IdOrPrefix::parse(id)).await?;
    let bases = client.list_pipeline_bases(uuid).await?;

    if bases.is_empty() {
        println!("{}", "No bases found.".yellow());
        return Ok(());
    }

    for base in bases {
        println!("  {} {}", "▸".cyan(), base.name.bold());
        println!("    ID:     {}", base.id.to_string().dimmed());
        println!("    Status: {}", colorize_base_status(base.status));
        if let Some(awoke_at) = &base.awoke_at {
            println!("    Awoke:  {}", timestamp(awoke_at).dimmed());
        }
        if let Some(error) = &base.last_error {
            println!("    Error:  {}", error.red());
        }
        println!();
    }

    Ok(())
}

fn print_pipeline_summary(pipeline: &PipelineSummary) {
    println!("  {} {}", "▸".cyan(), pipeline.name.bold());
    println!("    ID:      {}", pipeline.id.to_string().dimmed());
    println!("    Status:  {}", colorize_status(pipeline.status));
    println!("    Created: {}", timestamp(&pipeline.created_at).dimmed());
    println!();
}

fn print_pipeline_details(pipeline: &Pipeline) {
    let print_base = |label: &str, id: Option<Uuid>| {
        if let Some(id) = id {
            println!("  {:<13}{}", label, id.to_string().dimmed());
        }
    };

    println!("{}", "Pipeline Details:".bold());
    println!("  ID:          {}", pipeline.id.to_string().cyan());
    println!("  Name:        {}", pipeline.name.bold());
    println!("  Status:      {}", colorize_status(pipeline.status));
    println!("  Generation:  {}", pipeline.generation);
    print_base("Prev base:", pipeline.prev_base_id);
    print_base("Curr base:", pipeline.curr_base_id);
    print_base("Next base:", pipeline.next_base_id);
    println!("  Created:     {}", timestamp(&pipeline.created_at));
    println!("  Updated:     {}", timestamp(&pipeline.updated_at));

    let spec = &pipeline.config.instance_group;
    println!("\n{}", "Configuration:".bold());
    println!("  Image:       {}", pipeline.config.container.image);
    println!("  Machine:     {} x {}", spec.machine_type, spec.instance_size);
    println!("  Zone:        {}/{}", spec.project_id, spec.zone);
    println!("  Hibernation: {}s", pipeline.config.hibernation_delay);
}

fn colorize_status(status: PipelineStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        PipelineStatus::Running => label.green(),
        PipelineStatus::CurrentPreparing | PipelineStatus::NextPreparing => label.cyan(),
        PipelineStatus::CurrentPreparingError | PipelineStatus::StoppingError => label.red(),
        PipelineStatus::Stopping | PipelineStatus::Stopped => label.dimmed(),
    }
}

fn colorize_base_status(status: PipelineBaseStatus) -> ColoredString {
    let label = status.to_string();
    if status.is_error() {
        label.red()
    } else if status.is_serving() {
        label.green()
    } else if status == PipelineBaseStatus::Closed {
        label.dimmed()
    } else {
        label.yellow()
    }
}
