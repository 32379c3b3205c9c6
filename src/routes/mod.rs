//! HTTP surface — webhook intake, CRUD, SSE logs, admin settings.

pub mod admin;
pub mod api;
pub mod logs;
pub mod orgs;
pub mod setup;
pub mod webhook;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;

use crate::config::Config;
use crate::db::DbPool;
use crate::github::GitHubAppProvider;
use crate::settings::SettingsStore;

/// Webhook bodies are capped at 10 MiB.
const WEBHOOK_BODY_LIMIT: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Config,
    pub settings: SettingsStore,
    pub github: Arc<GitHubAppProvider>,
}

/// JSON error body, matching `{"error": "..."}` everywhere.
pub fn err(status: StatusCode, msg: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(serde_json::json!({ "error": msg.into() })))
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/healthz", get(healthz))
        .route("/setup/status", get(setup::setup_status))
        .route("/setup", post(setup::run_setup))
        .route("/orgs", get(orgs::list_orgs))
        .route("/orgs/{org_id}/projects", get(orgs::list_org_projects))
        .route(
            "/orgs/{org_id}/members",
            get(orgs::list_members).post(orgs::add_member),
        )
        .route("/projects", post(api::create_project).get(api::list_projects))
        .route("/projects/{id}", get(api::get_project))
        .route(
            "/projects/{id}/env",
            post(api::set_env_var).get(api::list_env_vars),
        )
        .route("/projects/{id}/deployments", get(api::list_deployments))
        .route("/deployments/enqueue", post(api::enqueue_build))
        .route("/deployments/{id}", get(api::get_deployment))
        .route("/deployments/{id}/promote", post(api::promote_deployment))
        .route("/deployments/{id}/logs", get(logs::deployment_logs_sse))
        .route(
            "/admin/settings",
            get(admin::get_settings).put(admin::put_settings),
        )
        .route("/admin/apply", post(admin::apply))
        .route("/admin/self-update", post(admin::self_update))
        .route("/admin/jobs/{job_id}", get(admin::get_job))
        .route("/admin/jobs/{job_id}/logs", get(admin::get_job_logs))
        // Webhooks carry no auth cookie; the signature is the credential.
        .route(
            "/webhooks/github",
            post(webhook::github_webhook).layer(DefaultBodyLimit::max(WEBHOOK_BODY_LIMIT)),
        );

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api", api)
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}
