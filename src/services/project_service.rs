//! Project CRUD and slug handling.

use std::sync::LazyLock;

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use regex::Regex;
use uuid::Uuid;

use crate::models::organization::Organization;
use crate::models::project::{NewProject, Project};
use crate::schema::{organizations, projects};

static SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]{0,62}[a-z0-9]$").unwrap());

/// Whether `slug` is a valid project slug.
pub fn is_valid_slug(slug: &str) -> bool {
    SLUG_RE.is_match(slug)
}

/// Derive a project slug from a repository name: lowercase, `_`/`.`/space
/// become `-`, trimmed to 32 characters. The result still has to pass
/// [`is_valid_slug`].
pub fn slugify_repo(repo_name: &str) -> String {
    let mut s: String = repo_name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            '_' | '.' | ' ' => '-',
            other => other,
        })
        .collect();
    s.truncate(32);
    s.trim_matches('-').to_string()
}

pub async fn create_project(
    conn: &mut AsyncPgConnection,
    new_project: NewProject,
) -> anyhow::Result<Project> {
    let project = diesel::insert_into(projects::table)
        .values(&new_project)
        .get_result::<Project>(conn)
        .await?;
    tracing::info!(
        project_id = %project.id,
        slug = %project.slug,
        repo = %project.repo_full_name,
        "Project created"
    );
    Ok(project)
}

pub async fn get_project(
    conn: &mut AsyncPgConnection,
    id: Uuid,
) -> anyhow::Result<Option<Project>> {
    let project = projects::table
        .find(id)
        .first::<Project>(conn)
        .await
        .optional()?;
    Ok(project)
}

pub async fn get_by_repo_full_name(
    conn: &mut AsyncPgConnection,
    repo_full_name: &str,
) -> anyhow::Result<Option<Project>> {
    let project = projects::table
        .filter(projects::repo_full_name.eq(repo_full_name))
        .first::<Project>(conn)
        .await
        .optional()?;
    Ok(project)
}

pub async fn list_projects(conn: &mut AsyncPgConnection) -> anyhow::Result<Vec<Project>> {
    let out = projects::table
        .order(projects::created_at.desc())
        .load::<Project>(conn)
        .await?;
    Ok(out)
}

pub async fn list_projects_by_org(
    conn: &mut AsyncPgConnection,
    org_id: Uuid,
) -> anyhow::Result<Vec<Project>> {
    let out = projects::table
        .filter(projects::org_id.eq(org_id))
        .order(projects::created_at.desc())
        .load::<Project>(conn)
        .await?;
    Ok(out)
}

/// Oldest organization on the instance; used by webhook auto-create.
pub async fn first_organization(
    conn: &mut AsyncPgConnection,
) -> anyhow::Result<Option<Organization>> {
    let org = organizations::table
        .order(organizations::created_at.asc())
        .first::<Organization>(conn)
        .await
        .optional()?;
    Ok(org)
}

/// Point the project's production hostname at a deployment.
pub async fn set_production_deployment(
    conn: &mut AsyncPgConnection,
    project_id: Uuid,
    deployment_id: Uuid,
) -> anyhow::Result<()> {
    diesel::update(projects::table.find(project_id))
        .set(projects::production_deployment_id.eq(deployment_id))
        .execute(conn)
        .await?;
    Ok(())
}

/// Refresh the installation id and default branch seen in a push event.
pub async fn update_github_info(
    conn: &mut AsyncPgConnection,
    project_id: Uuid,
    installation_id: i64,
    default_branch: &str,
) -> anyhow::Result<()> {
    diesel::update(projects::table.find(project_id))
        .set((
            projects::github_installation_id.eq(installation_id),
            projects::github_default_branch.eq(default_branch),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_boundaries() {
        assert!(is_valid_slug("ab"));
        assert!(is_valid_slug("a1b"));
        assert!(is_valid_slug("my-app-2"));
        assert!(!is_valid_slug("a"));
        assert!(!is_valid_slug("-ab"));
        assert!(!is_valid_slug("ab-"));
        assert!(!is_valid_slug("Ab"));
        assert!(!is_valid_slug("a_b"));
        // 63-char middle segment is the maximum: 64 total passes, 65 fails.
        let middle = "x".repeat(62);
        assert!(is_valid_slug(&format!("a{middle}b")));
        let too_long = "x".repeat(63);
        assert!(!is_valid_slug(&format!("a{too_long}b")));
    }

    #[test]
    fn slugify_repo_normalizes() {
        assert_eq!(slugify_repo("My_Web.App"), "my-web-app");
        assert_eq!(slugify_repo("web"), "web");
        assert_eq!(slugify_repo("_edge_"), "edge");
        let long = "a".repeat(40);
        assert_eq!(slugify_repo(&long).len(), 32);
        assert!(is_valid_slug(&slugify_repo("Some Repo.Name_here")));
    }
}
