//! Durable queue task rows.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::schema::queue_tasks;

pub const TASK_STATUS_PENDING: &str = "pending";
pub const TASK_STATUS_RUNNING: &str = "running";
pub const TASK_STATUS_DONE: &str = "done";
pub const TASK_STATUS_FAILED: &str = "failed";

// QueryableByName: claimed rows come back from a raw `UPDATE ... RETURNING`.
#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = queue_tasks)]
pub struct QueueTask {
    pub id: i64,
    pub queue: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub error: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = queue_tasks)]
pub struct NewQueueTask {
    pub queue: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub status: String,
}
