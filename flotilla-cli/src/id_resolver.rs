//! ID resolver module
//!
//! Handles resolution of UUID prefixes to full UUIDs by querying the API.
//! This allows users to specify short, unambiguous prefixes instead of full UUIDs.

use anyhow::{Context, Result, anyhow, bail};
use flotilla_client::OrchestratorClient;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a pipeline ID, prefix or name to a full UUID
///
/// If the input is already a full UUID, returns it immediately.
/// Otherwise, fetches the organization's pipelines and finds the one whose
/// name equals the input or whose ID starts with it.
///
/// # Errors
/// Returns an error if:
/// - No pipeline matches
/// - Multiple pipelines match the prefix (ambiguous)
/// - API call fails
pub async fn resolve_pipeline_id(
    client: &OrchestratorClient,
    id_or_prefix: &IdOrPrefix,
) -> Result<Uuid> {
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let input = id_or_prefix.as_str();

    let pipelines = client
        .list_pipelines()
        .await
        .context("Failed to fetch pipelines for ID resolution")?;

    if let Some(pipeline) = pipelines.iter().find(|p| p.name == input) {
        return Ok(pipeline.id);
    }

    let ids: Vec<Uuid> = pipelines.iter().map(|p| p.id).collect();
    pick(&ids, &input.to_lowercase(), "pipeline")
}

/// Resolve a job ID or prefix within a pipeline
///
/// Jobs are only listed per pipeline, so a prefix needs the pipeline to
/// search in; a full UUID never does.
pub async fn resolve_job_id(
    client: &OrchestratorClient,
    pipeline: Option<&str>,
    id_or_prefix: &IdOrPrefix,
) -> Result<Uuid> {
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let Some(pipeline) = pipeline else {
        bail!(
            "'{}' is not a full job ID; pass --pipeline to resolve it as a prefix",
            id_or_prefix
        );
    };
    let pipeline_id = resolve_pipeline_id(client, &IdOrPrefix::parse(pipeline)).await?;

    let jobs = client
        .list_jobs_by_pipeline(pipeline_id)
        .await
        .context("Failed to fetch pipeline jobs for ID resolution")?;

    let ids: Vec<Uuid> = jobs.iter().map(|j| j.id).collect();
    pick(&ids, &id_or_prefix.as_str().to_lowercase(), "job")
}

fn pick(ids: &[Uuid], prefix: &str, kind: &str) -> Result<Uuid> {
    let matches: Vec<&Uuid> = ids
        .iter()
        .filter(|id| id.to_string().starts_with(prefix))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No {} found with ID starting with '{}'", kind, prefix)),
        [id] => Ok(**id),
        _ => {
            let ids: Vec<String> = matches.iter().map(|id| id.to_string()).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple {}s: {}",
                prefix,
                kind,
                ids.join(", ")
            ))
        }
    }
}
