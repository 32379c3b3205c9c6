//! Encrypted per-project env vars. Ciphertext never leaves the store
//! through list responses; only the builder decrypts.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::project_env_vars;

pub const SCOPE_PREVIEW: &str = "preview";
pub const SCOPE_PRODUCTION: &str = "production";

// Deliberately not Serialize: value_enc must not reach HTTP responses.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = project_env_vars)]
pub struct EnvVar {
    pub id: Uuid,
    pub project_id: Uuid,
    pub scope: String,
    pub key: String,
    pub value_enc: Vec<u8>,
    pub created_at: DateTime<Utc>,
}
