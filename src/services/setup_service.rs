//! First-run seeding: the initial user, organization, and owner membership.
//!
//! The whole seed runs in one serializable transaction so that only the
//! first setup wins when two requests race.

use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use crate::models::organization::{NewOrgMembership, NewOrganization, Organization};
use crate::models::user::{NewUser, User};
use crate::schema::{organization_memberships, organizations, users};

pub struct SetupResult {
    pub user_id: Uuid,
    pub org_id: Uuid,
}

pub async fn count_users(conn: &mut AsyncPgConnection) -> anyhow::Result<i64> {
    let n: i64 = users::table.count().get_result(conn).await?;
    Ok(n)
}

/// Slug for the seed organization: lowercase, `_`/space become `-`, other
/// unsafe characters dropped to `-`, trimmed, 2..=32 chars with a
/// `personal` fallback.
pub fn slugify_org(name: &str) -> String {
    let mut s: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' => c,
            _ => '-',
        })
        .collect();
    while s.contains("--") {
        s = s.replace("--", "-");
    }
    let mut s = s.trim_matches('-').to_string();
    if s.len() < 2 {
        return "personal".to_string();
    }
    if s.len() > 32 {
        s.truncate(32);
        s = s.trim_matches('-').to_string();
    }
    s
}

/// Seed the instance. Fails with "already setup" when any user exists.
pub async fn run_setup(
    conn: &mut AsyncPgConnection,
    email: &str,
    password: &str,
    org_name: &str,
) -> anyhow::Result<SetupResult> {
    let email = email.trim().to_string();
    let password = password.trim();
    let org_name = if org_name.trim().is_empty() {
        "Personal".to_string()
    } else {
        org_name.trim().to_string()
    };

    if email.is_empty() || !email.contains('@') {
        anyhow::bail!("invalid email");
    }
    if password.len() < 8 {
        anyhow::bail!("password must be at least 8 characters");
    }

    let password_hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;

    conn.build_transaction()
        .serializable()
        .run(|conn| {
            async move {
                let existing: i64 = users::table.count().get_result(conn).await?;
                if existing > 0 {
                    anyhow::bail!("already setup");
                }

                let user: User = diesel::insert_into(users::table)
                    .values(&NewUser {
                        email,
                        password_hash,
                        is_instance_admin: true,
                    })
                    .get_result(conn)
                    .await?;

                let slug = slugify_org(&org_name);
                let org: Organization = match diesel::insert_into(organizations::table)
                    .values(&NewOrganization {
                        slug: slug.clone(),
                        name: org_name.clone(),
                    })
                    .get_result(conn)
                    .await
                {
                    Ok(org) => org,
                    // Slug collision with a pre-existing org name; retry once.
                    Err(_) => {
                        diesel::insert_into(organizations::table)
                            .values(&NewOrganization {
                                slug: format!("{slug}-1"),
                                name: org_name,
                            })
                            .get_result(conn)
                            .await?
                    }
                };

                diesel::insert_into(organization_memberships::table)
                    .values(&NewOrgMembership {
                        org_id: org.id,
                        user_id: user.id,
                        role: "owner".to_string(),
                    })
                    .execute(conn)
                    .await?;

                Ok(SetupResult {
                    user_id: user.id,
                    org_id: org.id,
                })
            }
            .scope_boxed()
        })
        .await
}

/// Non-interactive seeding from `OPENCEL_BOOTSTRAP_EMAIL`/`_PASSWORD`.
/// A no-op when the instance already has users.
pub async fn bootstrap_from_env(
    conn: &mut AsyncPgConnection,
    email: &str,
    password: &str,
) -> anyhow::Result<()> {
    if email.is_empty() || password.is_empty() {
        return Ok(());
    }
    if count_users(conn).await? > 0 {
        return Ok(());
    }
    match run_setup(conn, email, password, "Personal").await {
        Ok(res) => {
            tracing::info!(user_id = %res.user_id, org_id = %res.org_id, "Bootstrapped first admin");
            Ok(())
        }
        Err(e) if e.to_string() == "already setup" => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn org_slugify_rules() {
        assert_eq!(slugify_org("Personal"), "personal");
        assert_eq!(slugify_org("Acme Corp"), "acme-corp");
        assert_eq!(slugify_org("A_B  C"), "a-b-c");
        assert_eq!(slugify_org(""), "personal");
        assert_eq!(slugify_org("!"), "personal");
        assert_eq!(slugify_org("x"), "personal");
        let long = "a".repeat(40);
        assert!(slugify_org(&long).len() <= 32);
    }
}
