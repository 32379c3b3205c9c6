//! Asynchronous host-level operations run by the agent.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::schema::{admin_job_logs, admin_jobs};

pub const JOB_STATUS_QUEUED: &str = "queued";
pub const JOB_STATUS_RUNNING: &str = "running";
pub const JOB_STATUS_SUCCESS: &str = "success";
pub const JOB_STATUS_FAILED: &str = "failed";

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = admin_jobs)]
pub struct AdminJob {
    pub id: Uuid,
    pub kind: String,
    pub status: String,
    pub created_by_user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = admin_jobs)]
pub struct NewAdminJob {
    pub kind: String,
    pub status: String,
    pub created_by_user_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = admin_job_logs)]
pub struct AdminJobLog {
    pub id: i64,
    pub job_id: Uuid,
    pub ts: DateTime<Utc>,
    pub stream: String,
    pub chunk: String,
}
