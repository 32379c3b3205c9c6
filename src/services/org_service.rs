//! Organization and membership queries.

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use uuid::Uuid;

use crate::models::organization::{NewOrgMembership, OrgMembership, Organization};
use crate::models::user::User;
use crate::schema::{organization_memberships, organizations, users};

pub async fn list_organizations(
    conn: &mut AsyncPgConnection,
) -> anyhow::Result<Vec<Organization>> {
    let out = organizations::table
        .order(organizations::created_at.asc())
        .load::<Organization>(conn)
        .await?;
    Ok(out)
}

pub async fn get_organization(
    conn: &mut AsyncPgConnection,
    id: Uuid,
) -> anyhow::Result<Option<Organization>> {
    let org = organizations::table
        .find(id)
        .first::<Organization>(conn)
        .await
        .optional()?;
    Ok(org)
}

#[derive(Debug, Serialize)]
pub struct OrgMemberRow {
    pub user_id: Uuid,
    pub email: String,
    pub role: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub async fn list_members(
    conn: &mut AsyncPgConnection,
    org_id: Uuid,
) -> anyhow::Result<Vec<OrgMemberRow>> {
    let rows: Vec<(Uuid, String, String, chrono::DateTime<chrono::Utc>)> =
        organization_memberships::table
            .inner_join(users::table)
            .filter(organization_memberships::org_id.eq(org_id))
            .order(organization_memberships::created_at.asc())
            .select((
                users::id,
                users::email,
                organization_memberships::role,
                organization_memberships::created_at,
            ))
            .load(conn)
            .await?;
    Ok(rows
        .into_iter()
        .map(|(user_id, email, role, created_at)| OrgMemberRow {
            user_id,
            email,
            role,
            created_at,
        })
        .collect())
}

/// Upsert a membership; a second add for the same user updates the role.
pub async fn add_member(
    conn: &mut AsyncPgConnection,
    org_id: Uuid,
    user_id: Uuid,
    role: &str,
) -> anyhow::Result<OrgMembership> {
    let membership = diesel::insert_into(organization_memberships::table)
        .values(&NewOrgMembership {
            org_id,
            user_id,
            role: role.to_string(),
        })
        .on_conflict((
            organization_memberships::org_id,
            organization_memberships::user_id,
        ))
        .do_update()
        .set(organization_memberships::role.eq(role))
        .get_result::<OrgMembership>(conn)
        .await?;
    Ok(membership)
}

pub async fn get_user_by_email(
    conn: &mut AsyncPgConnection,
    email: &str,
) -> anyhow::Result<Option<User>> {
    let user = users::table
        .filter(users::email.eq(email))
        .first::<User>(conn)
        .await
        .optional()?;
    Ok(user)
}
