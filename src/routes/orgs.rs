//! Organization and membership endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::organization::{is_valid_role, OrgMembership, Organization};
use crate::models::project::Project;
use crate::services::{org_service, project_service};

use super::{err, AppState};

type ApiError = (StatusCode, Json<serde_json::Value>);

pub async fn list_orgs(
    State(state): State<AppState>,
) -> Result<Json<Vec<Organization>>, ApiError> {
    let mut conn = state
        .pool
        .get()
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let orgs = org_service::list_organizations(&mut conn)
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(orgs))
}

pub async fn list_org_projects(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
) -> Result<Json<Vec<Project>>, ApiError> {
    let mut conn = state
        .pool
        .get()
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    match org_service::get_organization(&mut conn, org_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(err(StatusCode::NOT_FOUND, "not found")),
        Err(e) => return Err(err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
    let projects = project_service::list_projects_by_org(&mut conn, org_id)
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(projects))
}

pub async fn list_members(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
) -> Result<Json<Vec<org_service::OrgMemberRow>>, ApiError> {
    let mut conn = state
        .pool
        .get()
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let members = org_service::list_members(&mut conn, org_id)
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(members))
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub email: String,
    pub role: String,
}

pub async fn add_member(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
    Json(req): Json<AddMemberRequest>,
) -> Result<(StatusCode, Json<OrgMembership>), ApiError> {
    let role = req.role.trim().to_lowercase();
    if !is_valid_role(&role) {
        return Err(err(
            StatusCode::BAD_REQUEST,
            "role must be owner, admin, or member",
        ));
    }

    let mut conn = state
        .pool
        .get()
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    match org_service::get_organization(&mut conn, org_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(err(StatusCode::NOT_FOUND, "not found")),
        Err(e) => return Err(err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
    let user = match org_service::get_user_by_email(&mut conn, req.email.trim()).await {
        Ok(Some(user)) => user,
        Ok(None) => return Err(err(StatusCode::NOT_FOUND, "no such user")),
        Err(e) => return Err(err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    };

    let membership = org_service::add_member(&mut conn, org_id, user.id, &role)
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok((StatusCode::CREATED, Json(membership)))
}
