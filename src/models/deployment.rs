//! A deployment is one build-and-run of a specific commit for a project.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::schema::{deployment_events, deployment_log_chunks, deployments};

/// Deployment kinds, decided at creation by comparing the pushed branch
/// against the project's default branch.
pub const KIND_PREVIEW: &str = "preview";
pub const KIND_PRODUCTION: &str = "production";

/// Lifecycle: QUEUED -> BUILDING -> READY | FAILED. Terminal states are final.
pub const STATUS_QUEUED: &str = "QUEUED";
pub const STATUS_BUILDING: &str = "BUILDING";
pub const STATUS_READY: &str = "READY";
pub const STATUS_FAILED: &str = "FAILED";

pub const EVENT_PROMOTED: &str = "PROMOTED";

pub const STREAM_BUILD: &str = "build";
pub const STREAM_SYSTEM: &str = "system";

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = deployments)]
pub struct Deployment {
    pub id: Uuid,
    pub project_id: Uuid,
    pub git_sha: String,
    pub git_ref: String,
    pub kind: String,
    pub status: String,
    pub image_ref: Option<String>,
    pub container_name: Option<String>,
    pub service_port: i32,
    pub preview_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub promoted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = deployments)]
pub struct NewDeployment {
    pub project_id: Uuid,
    pub git_sha: String,
    pub git_ref: String,
    pub kind: String,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = deployment_events)]
pub struct DeploymentEvent {
    pub id: i64,
    pub deployment_id: Uuid,
    pub kind: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = deployment_log_chunks)]
pub struct DeploymentLogChunk {
    pub id: i64,
    pub deployment_id: Uuid,
    pub ts: DateTime<Utc>,
    pub stream: String,
    pub chunk: String,
}
