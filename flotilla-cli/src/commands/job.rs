//! Job command handlers
//!
//! Handles job submission, readiness toggles, listing and inspection.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use flotilla_client::OrchestratorClient;
use flotilla_core::domain::job::{Job, JobMessage, JobStatus};
use flotilla_core::dto::job::{CreateJob, JobSummary};

use super::timestamp;
use crate::config::Config;
use crate::id_resolver::{resolve_job_id, resolve_pipeline_id};
use crate::types::IdOrPrefix;

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// Submit a job to a pipeline
    Submit {
        /// Pipeline ID, unambiguous prefix or name
        pipeline: String,

        /// Message body; `@path` reads it from a file
        #[arg(short, long, default_value = "")]
        data: String,

        /// Message attributes as key=value pairs
        #[arg(short, long, value_parser = parse_key_val)]
        attr: Vec<(String, String)>,

        /// Client-side identifier stored with the job
        #[arg(long)]
        id_by_client: Option<String>,

        /// Publish as soon as the pipeline allows it
        #[arg(long)]
        ready: bool,
    },
    /// List jobs for a pipeline
    List {
        /// Pipeline ID, unambiguous prefix or name
        pipeline: String,
    },
    /// Get job details
    Get {
        /// Job ID, or a prefix together with --pipeline
        id: String,

        #[arg(short, long)]
        pipeline: Option<String>,
    },
    /// Mark a job ready for publishing
    Activate {
        /// Job ID, or a prefix together with --pipeline
        id: String,

        #[arg(short, long)]
        pipeline: Option<String>,
    },
    /// Take a job that is not yet published back to inactive
    Inactivate {
        /// Job ID, or a prefix together with --pipeline
        id: String,

        #[arg(short, long)]
        pipeline: Option<String>,
    },
}

/// Parse a single key=value pair
fn parse_key_val(s: &str) -> Result<(String, String)> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("invalid KEY=value: no `=` found in `{}`", s))?;
    Ok((key.to_string(), value.to_string()))
}

/// Handle job commands
///
/// Routes job subcommands to their respective handlers.
pub async fn handle_job_command(command: JobCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        JobCommands::Submit {
            pipeline,
            data,
            attr,
            id_by_client,
            ready,
        } => submit_job(&client, &pipeline, &data, attr, id_by_client, ready).await,
        JobCommands::List { pipeline } => list_pipeline_jobs(&client, &pipeline).await,
        JobCommands::Get { id, pipeline } => {
            let uuid = resolve_job_id(&client, pipeline.as_deref(), &IdOrPrefix::parse(&id)).await?;
            let job = client.get_job(uuid).await?;
            print_job_details(&job);
            Ok(())
        }
        JobCommands::Activate { id, pipeline } => {
            let uuid = resolve_job_id(&client, pipeline.as_deref(), &IdOrPrefix::parse(&id)).await?;
            let job = client.activate_job(uuid).await?;
            println!("{} job {} is {}", "✓".green().bold(), job.id, colorize_status(job.status));
            Ok(())
        }
        JobCommands::Inactivate { id, pipeline } => {
            let uuid = resolve_job_id(&client, pipeline.as_deref(), &IdOrPrefix::parse(&id)).await?;
            let job = client.inactivate_job(uuid).await?;
            println!("{} job {} is {}", "✓".green().bold(), job.id, colorize_status(job.status));
            Ok(())
        }
    }
}

async fn submit_job(
    client: &OrchestratorClient,
    pipeline: &str,
    data: &str,
    attrs: Vec<(String, String)>,
    id_by_client: Option<String>,
    ready: bool,
) -> Result<()> {
    let pipeline_id = resolve_pipeline_id(client, &IdOrPrefix::parse(pipeline)).await?;

    let data = match data.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read message file: {}", path))?,
        None => data.to_string(),
    };

    let req = CreateJob {
        id_by_client,
        message: JobMessage {
            attributes: attrs.into_iter().collect::<BTreeMap<_, _>>(),
            data,
        },
        ready,
    };

    let job = client.submit_job(pipeline_id, req).await?;

    println!("{}", "✓ Job submitted successfully!".green().bold());
    println!("  Job ID:      {}", job.id.to_string().cyan());
    println!("  Pipeline ID: {}", job.pipeline_id.to_string().dimmed());
    println!("  Status:      {}", colorize_status(job.status));

    Ok(())
}

async fn list_pipeline_jobs(client: &OrchestratorClient, pipeline: &str) -> Result<()> {
    let pipeline_id = resolve_pipeline_id(client, &IdOrPrefix::parse(pipeline)).await?;
    let jobs = client.list_jobs_by_pipeline(pipeline_id).await?;

    if jobs.is_empty() {
        println!(
            "{}",
            format!("No jobs found for pipeline {}.", pipeline_id).yellow()
        );
    } else {
        println!(
            "{}",
            format!("Found {} job(s) for pipeline {}:", jobs.len(), pipeline_id).bold()
        );
        println!();
        for job in jobs {
            print_job_summary(&job);
        }
    }

    Ok(())
}

fn print_job_summary(job: &JobSummary) {
    println!("  {} Job {}", "▸".cyan(), job.id.to_string().dimmed());
    if let Some(id_by_client) = &job.id_by_client {
        println!("    Client ID: {}", id_by_client);
    }
    println!("    Status:    {}", colorize_status(job.status));
    println!("    Created:   {}", timestamp(&job.created_at).dimmed());
    println!();
}

fn print_job_details(job: &Job) {
    println!("{}", "Job Details:".bold());
    println!("  ID:          {}", job.id.to_string().cyan());
    println!("  Pipeline ID: {}", job.pipeline_id.to_string().dimmed());
    println!("  Base ID:     {}", job.pipeline_base_id.to_string().dimmed());
    if let Some(id_by_client) = &job.id_by_client {
        println!("  Client ID:   {}", id_by_client);
    }
    println!("  Status:      {}", colorize_status(job.status));
    if let Some(message_id) = &job.message_id {
        println!("  Message ID:  {}", message_id);
    }
    println!("  Created:     {}", timestamp(&job.created_at));

    if let Some(published) = &job.published_at {
        println!("  Published:   {}", timestamp(published));
    }
    if let Some(started) = &job.started_at {
        println!("  Started:     {}", timestamp(started));
    }
    if let Some(finished) = &job.finished_at {
        println!("  Finished:    {}", timestamp(finished));

        if let Some(started) = job.started_at {
            let seconds = finished.signed_duration_since(started).num_seconds();
            println!("  Duration:    {}s", seconds);
        }
    }
    if let Some(hostname) = &job.hostname {
        println!("  Host:        {}", hostname);
    }

    if !job.message.attributes.is_empty() {
        println!("\n{}", "Attributes:".bold());
        for (key, value) in &job.message.attributes {
            println!("  {} = {}", key.cyan(), value);
        }
    }

    if let Some(output) = &job.output {
        println!("\n{}", "Output:".bold());
        println!("{}", output);
    }

    if let Some(error) = &job.last_error {
        println!("\n{}", "Error:".bold());
        println!("{}", error.red());
    }
}

fn colorize_status(status: JobStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        JobStatus::Inactive => label.dimmed(),
        JobStatus::Blocked | JobStatus::Publishing => label.yellow(),
        JobStatus::Published | JobStatus::Started => label.cyan(),
        JobStatus::Success => label.green(),
        JobStatus::PublishingError | JobStatus::Failure => label.red(),
    }
}
