//! Job-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use flotilla_core::domain::job::Job;
use flotilla_core::dto::job::{CreateJob, JobReport, JobSummary};
use reqwest::Method;
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Submission & Readiness
    // =============================================================================

    /// Submit a job to a pipeline
    ///
    /// A job submitted with `ready` is published as soon as the pipeline's
    /// current base is awake; otherwise it waits for [`activate_job`].
    ///
    /// [`activate_job`]: OrchestratorClient::activate_job
    pub async fn submit_job(&self, pipeline_id: Uuid, req: CreateJob) -> Result<Job> {
        let path = format!("/pipelines/{}/jobs", pipeline_id);
        let response = self.request(Method::POST, &path).json(&req).send().await?;

        self.handle_response(response).await
    }

    /// List all jobs of a pipeline
    pub async fn list_jobs_by_pipeline(&self, pipeline_id: Uuid) -> Result<Vec<JobSummary>> {
        let path = format!("/pipelines/{}/jobs", pipeline_id);
        let response = self.request(Method::GET, &path).send().await?;

        self.handle_response(response).await
    }

    /// Get a job by ID
    pub async fn get_job(&self, job_id: Uuid) -> Result<Job> {
        let path = format!("/jobs/{}", job_id);
        let response = self.request(Method::GET, &path).send().await?;

        self.handle_response(response).await
    }

    pub async fn activate_job(&self, job_id: Uuid) -> Result<Job> {
        self.post_job_action(job_id, "activate", None).await
    }

    pub async fn inactivate_job(&self, job_id: Uuid) -> Result<Job> {
        self.post_job_action(job_id, "inactivate", None).await
    }

    // =============================================================================
    // Runner Reports
    // =============================================================================

    /// Report that a runner picked the job up
    pub async fn report_started(&self, job_id: Uuid, report: JobReport) -> Result<Job> {
        self.post_job_action(job_id, "started", Some(report)).await
    }

    pub async fn report_success(&self, job_id: Uuid, report: JobReport) -> Result<Job> {
        self.post_job_action(job_id, "success", Some(report)).await
    }

    pub async fn report_failure(&self, job_id: Uuid, report: JobReport) -> Result<Job> {
        self.post_job_action(job_id, "failure", Some(report)).await
    }

    async fn post_job_action(
        &self,
        job_id: Uuid,
        action: &str,
        report: Option<JobReport>,
    ) -> Result<Job> {
        let path = format!("/jobs/{}/{}", job_id, action);
        let mut builder = self.request(Method::POST, &path);
        if let Some(report) = report {
            builder = builder.json(&report);
        }
        let response = builder.send().await?;

        self.handle_response(response).await
    }
}
