//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod auth;
pub mod error;
pub mod health;
pub mod job;
pub mod organization;
pub mod pipeline;
pub mod task;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Pipeline endpoints
        .route(
            "/pipelines",
            post(pipeline::create_pipeline).get(pipeline::list_pipelines),
        )
        .route(
            "/pipelines/{id}",
            get(pipeline::get_pipeline)
                .put(pipeline::update_pipeline)
                .delete(pipeline::delete_pipeline),
        )
        .route("/pipelines/{id}/close", post(pipeline::close_pipeline))
        .route("/pipelines/{id}/retry", post(pipeline::retry_pipeline))
        .route("/pipelines/{id}/bases", get(pipeline::list_pipeline_bases))
        .route("/pipeline_bases/{id}/retry", post(pipeline::retry_pipeline_base))
        // Job endpoints
        .route(
            "/pipelines/{id}/jobs",
            post(job::submit_job).get(job::list_jobs_by_pipeline),
        )
        .route("/jobs/{id}", get(job::get_job))
        .route("/jobs/{id}/activate", post(job::activate_job))
        .route("/jobs/{id}/inactivate", post(job::inactivate_job))
        .route("/jobs/{id}/started", post(job::job_started))
        .route("/jobs/{id}/success", post(job::job_success))
        .route("/jobs/{id}/failure", post(job::job_failure))
        // Admin endpoints
        .route(
            "/organizations",
            post(organization::create_organization).get(organization::list_organizations),
        )
        .route("/organizations/{id}", get(organization::get_organization))
        .route(
            "/organizations/{id}/token_amount",
            post(organization::adjust_tokens),
        )
        .route(
            "/organizations/{id}/auth_tokens",
            post(organization::create_auth_token).get(organization::list_auth_tokens),
        )
        .route(
            "/auth_tokens/{id}/disable",
            post(organization::disable_auth_token),
        )
        .route("/auth_tokens/{id}", delete(organization::delete_auth_token))
        // Task endpoints
        .route("/operations/{id}/watch_task", post(task::watch_operation))
        .route("/pipelines/refresh_task", post(task::refresh_all))
        .route("/pipelines/{id}/build_task", post(task::build_pipeline))
        .route("/pipelines/{id}/close_task", post(task::close_pipeline))
        .route("/pipelines/{id}/refresh_task", post(task::refresh_pipeline))
        .route("/pipeline_bases/pull_task", post(task::pull_all))
        .route("/pipeline_bases/{id}/pull_task", post(task::pull_base))
        .route(
            "/pipeline_bases/{id}/hibernation_checking_task",
            post(task::hibernation_check),
        )
        .route("/pipeline_bases/{id}/changed_task", post(task::base_changed))
        .route(
            "/instance_groups/{id}/changed_task",
            post(task::instance_group_changed),
        )
        .route(
            "/instance_groups/{id}/health_check_task",
            post(task::health_check),
        )
        .route("/jobs/{id}/publish_task", post(task::publish_job))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use axum::response::Response;
    use flotilla_core::domain::pipeline::Pipeline;
    use flotilla_core::dto::pipeline::CreatePipeline;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::service::auth_service;
    use crate::service::testing::{Harness, base_config};

    const ADMIN_TOKEN: &str = "0123456789abcdef-admin";

    fn admin_state(h: &Harness) -> AppState {
        let mut state = h.state.clone();
        let mut config = (*state.config).clone();
        config.admin_token = Some(ADMIN_TOKEN.to_string());
        state.config = Arc::new(config);
        state
    }

    async fn token(h: &Harness) -> String {
        auth_service::create(h.store(), h.org.id).await.unwrap().token
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json(resp: Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn create_body(name: &str) -> Value {
        serde_json::to_value(CreatePipeline {
            name: name.to_string(),
            config: base_config(1, 60),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let h = Harness::new().await;
        let resp = create_router(h.state.clone())
            .oneshot(request("GET", "/health", None, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_pipeline_endpoints_require_a_token() {
        let h = Harness::new().await;
        let router = create_router(h.state.clone());

        let resp = router
            .clone()
            .oneshot(request("GET", "/pipelines", None, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = router
            .oneshot(request("GET", "/pipelines", Some("unknown"), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(json(resp).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_create_then_show_running_pipeline() {
        let h = Harness::new().await;
        let token = token(&h).await;
        let router = create_router(h.state.clone());

        let resp = router
            .clone()
            .oneshot(request("POST", "/pipelines", Some(&token), Some(create_body("etl"))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: Pipeline = serde_json::from_value(json(resp).await).unwrap();

        h.drain().await;

        let resp = router
            .oneshot(request(
                "GET",
                &format!("/pipelines/{}", created.id),
                Some(&token),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json(resp).await;
        assert_eq!(body["status"], "running");
        assert_eq!(body["curr_base_id"], created.curr_base_id.unwrap().to_string());
    }

    #[tokio::test]
    async fn test_invalid_pipeline_is_bad_request() {
        let h = Harness::new().await;
        let token = token(&h).await;

        let resp = create_router(h.state.clone())
            .oneshot(request("POST", "/pipelines", Some(&token), Some(create_body("Bad Name"))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_destroying_running_pipeline_is_refused() {
        let h = Harness::new().await;
        let token = token(&h).await;
        let p = h.create_pipeline("etl", 1).await;
        h.drain().await;

        let resp = create_router(h.state.clone())
            .oneshot(request("DELETE", &format!("/pipelines/{}", p.id), Some(&token), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_admin_endpoints() {
        let h = Harness::new().await;

        // Closed when no admin token is configured
        let resp = create_router(h.state.clone())
            .oneshot(request("GET", "/organizations", Some(ADMIN_TOKEN), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let router = create_router(admin_state(&h));
        let body = serde_json::json!({ "name": "globex", "token_amount": 10 });
        let resp = router
            .clone()
            .oneshot(request("POST", "/organizations", Some(ADMIN_TOKEN), Some(body)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let org = json(resp).await;

        let resp = router
            .clone()
            .oneshot(request(
                "POST",
                &format!("/organizations/{}/token_amount", org["id"].as_str().unwrap()),
                Some(ADMIN_TOKEN),
                Some(serde_json::json!({ "delta": -20 })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = router
            .oneshot(request("GET", "/organizations", Some("wrong-token"), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_task_endpoint_delivers() {
        let h = Harness::new().await;
        let p = h.create_pipeline("etl", 1).await;
        h.queue.clear().await;

        let resp = create_router(admin_state(&h))
            .oneshot(request(
                "POST",
                &format!("/pipelines/{}/build_task", p.id),
                Some(ADMIN_TOKEN),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(h.cloud.issued().await.len(), 1);
    }

    #[tokio::test]
    async fn test_other_organizations_pipeline_is_not_found() {
        let h = Harness::new().await;
        let p = h.create_pipeline("etl", 1).await;
        let other = crate::service::organization_service::create(
            h.store(),
            flotilla_core::dto::organization::CreateOrganization {
                name: "globex".to_string(),
                memo: None,
                token_amount: 0,
            },
        )
        .await
        .unwrap();
        let other_token = auth_service::create(h.store(), other.id).await.unwrap().token;

        let resp = create_router(h.state.clone())
            .oneshot(request(
                "GET",
                &format!("/pipelines/{}", p.id),
                Some(&other_token),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
