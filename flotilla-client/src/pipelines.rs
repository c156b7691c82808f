//! Pipeline-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use flotilla_core::domain::pipeline::Pipeline;
use flotilla_core::domain::pipeline_base::PipelineBase;
use flotilla_core::dto::pipeline::{
    CreatePipeline, PipelineBaseSummary, PipelineSummary, UpdatePipeline,
};
use reqwest::Method;
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Pipeline Management
    // =============================================================================

    /// Create a new pipeline
    ///
    /// With `dry_run` the pipeline and its first base are stored but nothing
    /// is deployed.
    ///
    /// # Example
    /// ```no_run
    /// # use flotilla_client::OrchestratorClient;
    /// # use flotilla_core::dto::pipeline::CreatePipeline;
    /// # async fn example(req: CreatePipeline) -> anyhow::Result<()> {
    /// let client = OrchestratorClient::new("http://localhost:8080").with_token("secret");
    /// let pipeline = client.create_pipeline(req, false).await?;
    /// println!("Created pipeline: {}", pipeline.id);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create_pipeline(&self, req: CreatePipeline, dry_run: bool) -> Result<Pipeline> {
        let response = self
            .request(Method::POST, "/pipelines")
            .query(&[("dry_run", dry_run)])
            .json(&req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// List the organization's pipelines
    pub async fn list_pipelines(&self) -> Result<Vec<PipelineSummary>> {
        let response = self.request(Method::GET, "/pipelines").send().await?;

        self.handle_response(response).await
    }

    /// Get a pipeline by ID
    pub async fn get_pipeline(&self, pipeline_id: Uuid) -> Result<Pipeline> {
        let path = format!("/pipelines/{}", pipeline_id);
        let response = self.request(Method::GET, &path).send().await?;

        self.handle_response(response).await
    }

    /// Roll a running pipeline onto a new base configuration
    pub async fn update_pipeline(&self, pipeline_id: Uuid, req: UpdatePipeline) -> Result<Pipeline> {
        let path = format!("/pipelines/{}", pipeline_id);
        let response = self.request(Method::PUT, &path).json(&req).send().await?;

        self.handle_response(response).await
    }

    /// Stop a pipeline and close its bases
    pub async fn close_pipeline(&self, pipeline_id: Uuid) -> Result<Pipeline> {
        let path = format!("/pipelines/{}/close", pipeline_id);
        let response = self.request(Method::POST, &path).send().await?;

        self.handle_response(response).await
    }

    /// Rebuild a pipeline whose current base failed to open
    pub async fn retry_pipeline(&self, pipeline_id: Uuid) -> Result<Pipeline> {
        let path = format!("/pipelines/{}/retry", pipeline_id);
        let response = self.request(Method::POST, &path).send().await?;

        self.handle_response(response).await
    }

    /// Destroy a stopped pipeline
    pub async fn delete_pipeline(&self, pipeline_id: Uuid) -> Result<()> {
        let path = format!("/pipelines/{}", pipeline_id);
        let response = self.request(Method::DELETE, &path).send().await?;

        self.handle_empty_response(response).await
    }

    // =============================================================================
    // Pipeline Bases
    // =============================================================================

    /// List every base generation of a pipeline
    pub async fn list_pipeline_bases(&self, pipeline_id: Uuid) -> Result<Vec<PipelineBaseSummary>> {
        let path = format!("/pipelines/{}/bases", pipeline_id);
        let response = self.request(Method::GET, &path).send().await?;

        self.handle_response(response).await
    }

    /// Re-issue the step that left a base in an error status
    pub async fn retry_pipeline_base(&self, base_id: Uuid) -> Result<PipelineBase> {
        let path = format!("/pipeline_bases/{}/retry", base_id);
        let response = self.request(Method::POST, &path).send().await?;

        self.handle_response(response).await
    }
}
