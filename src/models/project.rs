//! A project maps one source repository to its deployments.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::schema::projects;

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = projects)]
pub struct Project {
    pub id: Uuid,
    pub org_id: Uuid,
    pub slug: String,
    pub repo_full_name: String,
    pub github_installation_id: Option<i64>,
    pub github_default_branch: Option<String>,
    /// Sole source of truth for production routing.
    pub production_deployment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = projects)]
pub struct NewProject {
    pub org_id: Uuid,
    pub slug: String,
    pub repo_full_name: String,
    pub github_installation_id: Option<i64>,
    pub github_default_branch: Option<String>,
}
