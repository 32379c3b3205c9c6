//! Organizations and memberships — the unit of ownership.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::schema::{organization_memberships, organizations};

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = organizations)]
pub struct Organization {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = organizations)]
pub struct NewOrganization {
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = organization_memberships)]
pub struct OrgMembership {
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = organization_memberships)]
pub struct NewOrgMembership {
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
}

/// One role per user per org: owner > admin > member.
pub fn is_valid_role(role: &str) -> bool {
    matches!(role, "owner" | "admin" | "member")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_roles_only() {
        assert!(is_valid_role("owner"));
        assert!(is_valid_role("admin"));
        assert!(is_valid_role("member"));
        assert!(!is_valid_role("root"));
        assert!(!is_valid_role(""));
    }
}
