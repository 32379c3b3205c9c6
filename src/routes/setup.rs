//! First-run setup endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use crate::services::setup_service;

use super::{err, AppState};

type ApiError = (StatusCode, Json<serde_json::Value>);

#[derive(Debug, Serialize)]
pub struct SetupStatusResponse {
    pub needs_setup: bool,
}

pub async fn setup_status(
    State(state): State<AppState>,
) -> Result<Json<SetupStatusResponse>, ApiError> {
    let mut conn = state
        .pool
        .get()
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let users = setup_service::count_users(&mut conn)
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(SetupStatusResponse {
        needs_setup: users == 0,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SetupRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub org_name: String,
}

pub async fn run_setup(
    State(state): State<AppState>,
    Json(req): Json<SetupRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let mut conn = state
        .pool
        .get()
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    match setup_service::run_setup(&mut conn, &req.email, &req.password, &req.org_name).await {
        Ok(res) => Ok((
            StatusCode::CREATED,
            Json(serde_json::json!({
                "ok": true,
                "user_id": res.user_id,
                "org_id": res.org_id,
            })),
        )),
        Err(e) if e.to_string() == "already setup" => Err(err(StatusCode::CONFLICT, "already setup")),
        Err(e)
            if e.to_string().contains("invalid email")
                || e.to_string().contains("password must be") =>
        {
            Err(err(StatusCode::BAD_REQUEST, e.to_string()))
        }
        Err(e) => Err(err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}
