//! REST API for projects, env vars, and deployments.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::deployment::{Deployment, EVENT_PROMOTED, STATUS_READY};
use crate::models::project::{NewProject, Project};
use crate::queue::{self, BuildDeployPayload, QUEUE_BUILDS, TASK_BUILD_DEPLOY};
use crate::services::{
    deployment_service, env_service, project_service, router_service,
};

use super::{err, AppState};

type ApiError = (StatusCode, Json<serde_json::Value>);

// ── Projects ──

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub slug: String,
    /// owner/repo
    pub repo_full_name: String,
    /// Defaults to the first organization on the instance.
    pub org_id: Option<Uuid>,
}

pub async fn create_project(
    State(state): State<AppState>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>), ApiError> {
    let slug = req.slug.trim().to_lowercase();
    let repo_full_name = req.repo_full_name.trim().to_string();

    if !project_service::is_valid_slug(&slug) {
        return Err(err(
            StatusCode::BAD_REQUEST,
            "invalid slug (use lowercase letters, numbers, and hyphens)",
        ));
    }
    let Some((owner, repo)) = repo_full_name
        .split_once('/')
        .filter(|(o, r)| !o.is_empty() && !r.is_empty())
    else {
        return Err(err(
            StatusCode::BAD_REQUEST,
            "repo_full_name must be owner/repo",
        ));
    };

    // When a GitHub App is configured, resolve installation + default branch
    // up front so the first push can build immediately.
    let mut installation_id = None;
    let mut default_branch = None;
    match state.github.get().await {
        Ok(Some(app)) => {
            let inst = app.get_repo_installation(owner, repo).await.map_err(|e| {
                err(
                    StatusCode::BAD_REQUEST,
                    format!("github installation lookup failed: {e}"),
                )
            })?;
            let token = app.create_installation_token(inst).await.map_err(|e| {
                err(
                    StatusCode::BAD_REQUEST,
                    format!("github installation token failed: {e}"),
                )
            })?;
            let info = app.get_repo(&token, owner, repo).await.map_err(|e| {
                err(
                    StatusCode::BAD_REQUEST,
                    format!("github repo lookup failed: {e}"),
                )
            })?;
            installation_id = Some(inst);
            default_branch = Some(info.default_branch);
        }
        Ok(None) => {}
        Err(e) => return Err(err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }

    let mut conn = state
        .pool
        .get()
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let org_id = match req.org_id {
        Some(id) => id,
        None => match project_service::first_organization(&mut conn).await {
            Ok(Some(org)) => org.id,
            Ok(None) => {
                return Err(err(
                    StatusCode::BAD_REQUEST,
                    "no org found (complete setup first)",
                ))
            }
            Err(e) => return Err(err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
        },
    };

    let project = project_service::create_project(
        &mut conn,
        NewProject {
            org_id,
            slug,
            repo_full_name,
            github_installation_id: installation_id,
            github_default_branch: default_branch,
        },
    )
    .await
    .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn list_projects(
    State(state): State<AppState>,
) -> Result<Json<Vec<Project>>, ApiError> {
    let mut conn = state
        .pool
        .get()
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let projects = project_service::list_projects(&mut conn)
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(projects))
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Project>, ApiError> {
    let mut conn = state
        .pool
        .get()
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    match project_service::get_project(&mut conn, id).await {
        Ok(Some(project)) => Ok(Json(project)),
        Ok(None) => Err(err(StatusCode::NOT_FOUND, "not found")),
        Err(e) => Err(err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

// ── Env vars ──

#[derive(Debug, Deserialize)]
pub struct SetEnvVarRequest {
    pub scope: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct EnvVarResponse {
    pub scope: String,
    pub key: String,
    // Value intentionally omitted: neither plaintext nor ciphertext leaves
    // the store through this API.
}

pub async fn set_env_var(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(req): Json<SetEnvVarRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let scope = req.scope.trim().to_lowercase();
    let key = req.key.trim().to_string();
    if !env_service::is_valid_scope(&scope) {
        return Err(err(
            StatusCode::BAD_REQUEST,
            "scope must be preview or production",
        ));
    }
    if key.is_empty() || key.contains(' ') {
        return Err(err(StatusCode::BAD_REQUEST, "invalid key"));
    }

    let mut conn = state
        .pool
        .get()
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    env_service::set_env_var(
        &mut conn,
        &state.config.encrypt_key,
        project_id,
        &scope,
        &key,
        &req.value,
    )
    .await
    .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct ListEnvVarsQuery {
    pub scope: Option<String>,
}

pub async fn list_env_vars(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Query(query): Query<ListEnvVarsQuery>,
) -> Result<Json<Vec<EnvVarResponse>>, ApiError> {
    let scope = query.scope.as_deref().map(|s| s.trim().to_lowercase());
    if let Some(s) = &scope {
        if !s.is_empty() && !env_service::is_valid_scope(s) {
            return Err(err(
                StatusCode::BAD_REQUEST,
                "scope must be preview or production",
            ));
        }
    }
    let scope = scope.filter(|s| !s.is_empty());

    let mut conn = state
        .pool
        .get()
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let vars = env_service::list_env_vars(&mut conn, project_id, scope.as_deref())
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(
        vars.into_iter()
            .map(|v| EnvVarResponse {
                scope: v.scope,
                key: v.key,
            })
            .collect(),
    ))
}

// ── Deployments ──

pub async fn list_deployments(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<Vec<Deployment>>, ApiError> {
    let mut conn = state
        .pool
        .get()
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let deployments = deployment_service::list_by_project(&mut conn, project_id, 50)
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(deployments))
}

pub async fn get_deployment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Deployment>, ApiError> {
    let mut conn = state
        .pool
        .get()
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    match deployment_service::get_deployment(&mut conn, id).await {
        Ok(Some(deployment)) => Ok(Json(deployment)),
        Ok(None) => Err(err(StatusCode::NOT_FOUND, "not found")),
        Err(e) => Err(err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

/// Point the project's production hostname at this deployment and rewrite
/// the routing document.
pub async fn promote_deployment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = state
        .pool
        .get()
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let deployment = match deployment_service::get_deployment(&mut conn, id).await {
        Ok(Some(d)) => d,
        Ok(None) => return Err(err(StatusCode::NOT_FOUND, "not found")),
        Err(e) => return Err(err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    };
    // The production pointer invariant: it only ever references READY builds.
    // Rollbacks target an older READY deployment, which still passes.
    if deployment.status != STATUS_READY {
        return Err(err(
            StatusCode::BAD_REQUEST,
            "only READY deployments can be promoted",
        ));
    }

    project_service::set_production_deployment(&mut conn, deployment.project_id, deployment.id)
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    deployment_service::mark_promoted(&mut conn, deployment.id)
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    drop(conn);

    if let Err(e) = router_service::reconcile(&state.pool, &state.config).await {
        return Err(err(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("router config update failed: {e}"),
        ));
    }

    let mut conn = state
        .pool
        .get()
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let _ = deployment_service::add_event(
        &mut conn,
        deployment.id,
        EVENT_PROMOTED,
        "Deployment promoted to production",
    )
    .await;

    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct EnqueueBuildRequest {
    pub deployment_id: Uuid,
}

/// Manually (re)enqueue a build task. Useful after an enqueue failure left a
/// deployment sitting in QUEUED.
pub async fn enqueue_build(
    State(state): State<AppState>,
    Json(req): Json<EnqueueBuildRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = state
        .pool
        .get()
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    queue::enqueue(
        &mut conn,
        QUEUE_BUILDS,
        TASK_BUILD_DEPLOY,
        &BuildDeployPayload {
            deployment_id: req.deployment_id,
        },
    )
    .await
    .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(serde_json::json!({ "ok": true })))
}
