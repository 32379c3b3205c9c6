//! GitHub webhook intake: signature check, project resolution, deployment
//! creation, build task enqueue.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use crate::github::webhook::verify_signature;
use crate::models::project::NewProject;
use crate::queue::{self, BuildDeployPayload, QUEUE_BUILDS, TASK_BUILD_DEPLOY};
use crate::services::{deployment_service, project_service};

use super::{err, AppState};

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref", default)]
    git_ref: String,
    #[serde(default)]
    after: String,
    #[serde(default)]
    repository: PushRepository,
    #[serde(default)]
    installation: PushInstallation,
}

#[derive(Debug, Default, Deserialize)]
struct PushRepository {
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    default_branch: String,
}

#[derive(Debug, Default, Deserialize)]
struct PushInstallation {
    #[serde(default)]
    id: i64,
}

pub async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let event = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    crate::metrics::webhook_received(event);

    let app = match state.github.get().await {
        Ok(Some(app)) => app,
        Ok(None) => return err(StatusCode::BAD_REQUEST, "github not configured"),
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if verify_signature(&app.webhook_secret, &body, signature).is_err() {
        tracing::warn!("Webhook signature validation failed");
        return err(StatusCode::UNAUTHORIZED, "invalid signature");
    }

    match event {
        "push" => handle_push(&state, &body).await,
        _ => (StatusCode::OK, Json(serde_json::json!({ "ok": true }))),
    }
}

async fn handle_push(
    state: &AppState,
    body: &[u8],
) -> (StatusCode, Json<serde_json::Value>) {
    let payload: PushPayload = match serde_json::from_slice(body) {
        Ok(p) => p,
        Err(_) => return err(StatusCode::BAD_REQUEST, "invalid payload"),
    };
    if payload.repository.full_name.is_empty()
        || payload.after.is_empty()
        || payload.git_ref.is_empty()
    {
        return err(StatusCode::BAD_REQUEST, "missing fields");
    }

    let mut conn = match state.pool.get().await {
        Ok(c) => c,
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let repo_full = payload.repository.full_name.as_str();
    let project = match project_service::get_by_repo_full_name(&mut conn, repo_full).await {
        Ok(p) => p,
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let project = match project {
        Some(project) => {
            let _ = project_service::update_github_info(
                &mut conn,
                project.id,
                payload.installation.id,
                &payload.repository.default_branch,
            )
            .await;
            project
        }
        None => {
            // Auto-create so "push to deploy" works with only webhook wiring.
            let org = match project_service::first_organization(&mut conn).await {
                Ok(Some(org)) => org,
                Ok(None) => {
                    return err(StatusCode::BAD_REQUEST, "no org exists (complete setup first)")
                }
                Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            };
            let repo_name = repo_full.split('/').next_back().unwrap_or(repo_full);
            let slug = project_service::slugify_repo(repo_name);
            if !project_service::is_valid_slug(&slug) {
                return err(StatusCode::BAD_REQUEST, "cannot derive a valid project slug");
            }
            match project_service::create_project(
                &mut conn,
                NewProject {
                    org_id: org.id,
                    slug,
                    repo_full_name: repo_full.to_string(),
                    github_installation_id: Some(payload.installation.id),
                    github_default_branch: Some(payload.repository.default_branch.clone()),
                },
            )
            .await
            {
                Ok(p) => p,
                Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            }
        }
    };

    let branch = payload
        .git_ref
        .strip_prefix("refs/heads/")
        .unwrap_or(&payload.git_ref);
    let kind =
        deployment_service::deployment_kind(branch, Some(&payload.repository.default_branch));

    let deployment = match deployment_service::create_deployment(
        &mut conn,
        project.id,
        &payload.after,
        &payload.git_ref,
        kind,
    )
    .await
    {
        Ok(d) => d,
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let _ = deployment_service::add_event(
        &mut conn,
        deployment.id,
        crate::models::deployment::STATUS_QUEUED,
        "Deployment queued from GitHub push",
    )
    .await;

    // Enqueue failure leaves the row QUEUED; the task can be reissued.
    if let Err(e) = queue::enqueue(
        &mut conn,
        QUEUE_BUILDS,
        TASK_BUILD_DEPLOY,
        &BuildDeployPayload {
            deployment_id: deployment.id,
        },
    )
    .await
    {
        return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    (
        StatusCode::OK,
        Json(serde_json::json!({ "ok": true, "deployment_id": deployment.id })),
    )
}
