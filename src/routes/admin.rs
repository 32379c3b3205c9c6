//! Admin settings API and agent job control.
//!
//! Secrets are write-only: reads report `*_configured` booleans, never
//! values. Every mutation invalidates the cached GitHub App provider.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::admin_job::{AdminJob, AdminJobLog, JOB_STATUS_FAILED};
use crate::queue::{self, AdminJobPayload, QUEUE_ADMIN, TASK_APPLY_SETTINGS, TASK_SELF_UPDATE};
use crate::services::admin_service;
use crate::settings::keys;

use super::{err, AppState};

type ApiError = (StatusCode, Json<serde_json::Value>);

#[derive(Debug, Serialize)]
pub struct AdminSettingsResponse {
    pub base_domain: String,
    pub public_scheme: String,
    /// letsencrypt | cloudflared | disabled
    pub tls_mode: String,

    pub github_app_id_configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_app_id: Option<String>,
    pub github_app_webhook_secret_configured: bool,
    pub github_app_private_key_configured: bool,

    pub auto_updates_enabled: bool,
    /// hourly | daily
    pub auto_updates_interval: String,
}

#[derive(Debug, Deserialize, Default)]
struct AppIdValue {
    #[serde(default)]
    app_id: String,
}

#[derive(Debug, Deserialize)]
struct AutoUpdatesValue {
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    interval: String,
}

fn default_true() -> bool {
    true
}

pub async fn get_settings(
    State(state): State<AppState>,
) -> Result<Json<AdminSettingsResponse>, ApiError> {
    let mut resp = AdminSettingsResponse {
        base_domain: state.config.base_domain.clone(),
        public_scheme: state.config.public_scheme.clone(),
        tls_mode: if state.config.traefik_tls {
            "letsencrypt".to_string()
        } else {
            "disabled".to_string()
        },
        github_app_id_configured: false,
        github_app_id: None,
        github_app_webhook_secret_configured: false,
        github_app_private_key_configured: false,
        auto_updates_enabled: true,
        auto_updates_interval: "hourly".to_string(),
    };

    if let Ok(Some(v)) = state
        .settings
        .get_json::<AutoUpdatesValue>(keys::AUTO_UPDATES)
        .await
    {
        resp.auto_updates_enabled = v.enabled;
        if !v.interval.is_empty() {
            resp.auto_updates_interval = v.interval;
        }
    }

    match state.settings.get_json::<AppIdValue>(keys::GITHUB_APP_ID).await {
        Ok(Some(v)) if !v.app_id.is_empty() => {
            resp.github_app_id_configured = true;
            resp.github_app_id = Some(v.app_id);
        }
        Ok(_) => {}
        Err(e) => return Err(err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
    resp.github_app_webhook_secret_configured = state
        .settings
        .has_secret(keys::GITHUB_WEBHOOK_SECRET)
        .await
        .unwrap_or(false);
    resp.github_app_private_key_configured = state
        .settings
        .has_secret(keys::GITHUB_PRIVATE_KEY_PEM)
        .await
        .unwrap_or(false);

    Ok(Json(resp))
}

#[derive(Debug, Deserialize)]
pub struct AdminSettingsPutRequest {
    pub base_domain: Option<String>,
    pub public_scheme: Option<String>,
    pub tls_mode: Option<String>,

    pub github_app_id: Option<String>,
    /// write-only
    pub github_app_webhook_secret: Option<String>,
    /// write-only
    pub github_app_private_key_pem: Option<String>,

    pub auto_updates_enabled: Option<bool>,
    pub auto_updates_interval: Option<String>,
}

pub async fn put_settings(
    State(state): State<AppState>,
    Json(req): Json<AdminSettingsPutRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // DB settings first; the agent projects them onto the host on apply.
    if let Some(v) = &req.github_app_id {
        state
            .settings
            .set_json(
                keys::GITHUB_APP_ID,
                &serde_json::json!({ "app_id": v.trim() }),
            )
            .await
            .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    }
    if let Some(v) = &req.github_app_webhook_secret {
        state
            .settings
            .set_secret(keys::GITHUB_WEBHOOK_SECRET, v.trim().as_bytes())
            .await
            .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    }
    if let Some(v) = &req.github_app_private_key_pem {
        state
            .settings
            .set_secret(keys::GITHUB_PRIVATE_KEY_PEM, v.as_bytes())
            .await
            .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    }
    if let Some(v) = &req.base_domain {
        state
            .settings
            .set_json(
                keys::BASE_DOMAIN,
                &serde_json::json!({ "base_domain": v.trim() }),
            )
            .await
            .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    }
    if let Some(v) = &req.public_scheme {
        state
            .settings
            .set_json(
                keys::PUBLIC_SCHEME,
                &serde_json::json!({ "public_scheme": v.trim() }),
            )
            .await
            .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    }
    if let Some(v) = &req.tls_mode {
        state
            .settings
            .set_json(keys::TLS_MODE, &serde_json::json!({ "tls_mode": v.trim() }))
            .await
            .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    }
    if req.auto_updates_enabled.is_some() || req.auto_updates_interval.is_some() {
        let mut v = serde_json::Map::new();
        if let Some(enabled) = req.auto_updates_enabled {
            v.insert("enabled".to_string(), serde_json::json!(enabled));
        }
        if let Some(interval) = &req.auto_updates_interval {
            v.insert("interval".to_string(), serde_json::json!(interval.trim()));
        }
        state
            .settings
            .set_json(keys::AUTO_UPDATES, &serde_json::Value::Object(v))
            .await
            .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    }

    state.github.invalidate().await;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn enqueue_admin_job(
    state: &AppState,
    kind: &str,
    task_kind: &str,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let mut conn = state
        .pool
        .get()
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let job = admin_service::create_admin_job(&mut conn, kind, None)
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    if let Err(e) = queue::enqueue(
        &mut conn,
        QUEUE_ADMIN,
        task_kind,
        &AdminJobPayload { job_id: job.id },
    )
    .await
    {
        let _ = admin_service::set_job_status(
            &mut conn,
            job.id,
            JOB_STATUS_FAILED,
            Some(&e.to_string()),
        )
        .await;
        return Err(err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "job_id": job.id })),
    ))
}

pub async fn apply(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    enqueue_admin_job(&state, "apply_settings", TASK_APPLY_SETTINGS).await
}

pub async fn self_update(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    enqueue_admin_job(&state, "self_update", TASK_SELF_UPDATE).await
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<AdminJob>, ApiError> {
    let mut conn = state
        .pool
        .get()
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    match admin_service::get_admin_job(&mut conn, job_id).await {
        Ok(Some(job)) => Ok(Json(job)),
        Ok(None) => Err(err(StatusCode::NOT_FOUND, "not found")),
        Err(e) => Err(err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

pub async fn get_job_logs(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Vec<AdminJobLog>>, ApiError> {
    let mut conn = state
        .pool
        .get()
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let logs = admin_service::list_job_logs(&mut conn, job_id, 1000)
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(logs))
}
