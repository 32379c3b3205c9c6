//! Deployment lifecycle, events, and the log journal.

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use crate::models::deployment::{
    Deployment, DeploymentLogChunk, NewDeployment, KIND_PREVIEW, KIND_PRODUCTION, STATUS_BUILDING,
    STATUS_FAILED, STATUS_QUEUED, STATUS_READY,
};
use crate::schema::{deployment_events, deployment_log_chunks, deployments};

/// Production iff the pushed branch equals the project's default branch.
pub fn deployment_kind(branch: &str, default_branch: Option<&str>) -> &'static str {
    match default_branch {
        Some(d) if !d.is_empty() && branch == d => KIND_PRODUCTION,
        _ => KIND_PREVIEW,
    }
}

pub async fn create_deployment(
    conn: &mut AsyncPgConnection,
    project_id: Uuid,
    git_sha: &str,
    git_ref: &str,
    kind: &str,
) -> anyhow::Result<Deployment> {
    let deployment = diesel::insert_into(deployments::table)
        .values(&NewDeployment {
            project_id,
            git_sha: git_sha.to_string(),
            git_ref: git_ref.to_string(),
            kind: kind.to_string(),
            status: STATUS_QUEUED.to_string(),
        })
        .get_result::<Deployment>(conn)
        .await?;

    crate::metrics::deployment_status_changed(STATUS_QUEUED);
    tracing::info!(
        deployment_id = %deployment.id,
        project_id = %project_id,
        kind = %kind,
        "Deployment created"
    );
    Ok(deployment)
}

pub async fn get_deployment(
    conn: &mut AsyncPgConnection,
    id: Uuid,
) -> anyhow::Result<Option<Deployment>> {
    let deployment = deployments::table
        .find(id)
        .first::<Deployment>(conn)
        .await
        .optional()?;
    Ok(deployment)
}

pub async fn list_by_project(
    conn: &mut AsyncPgConnection,
    project_id: Uuid,
    limit: i64,
) -> anyhow::Result<Vec<Deployment>> {
    let limit = if limit <= 0 || limit > 200 { 50 } else { limit };
    let out = deployments::table
        .filter(deployments::project_id.eq(project_id))
        .order(deployments::created_at.desc())
        .limit(limit)
        .load::<Deployment>(conn)
        .await?;
    Ok(out)
}

/// QUEUED -> BUILDING. Returns false when the deployment was not QUEUED
/// (redelivered task); the caller must then skip the build.
pub async fn mark_building(conn: &mut AsyncPgConnection, id: Uuid) -> anyhow::Result<bool> {
    let updated = diesel::update(
        deployments::table
            .find(id)
            .filter(deployments::status.eq(STATUS_QUEUED)),
    )
    .set((
        deployments::status.eq(STATUS_BUILDING),
        deployments::updated_at.eq(chrono::Utc::now()),
    ))
    .execute(conn)
    .await?;

    if updated > 0 {
        crate::metrics::deployment_status_changed(STATUS_BUILDING);
    }
    Ok(updated > 0)
}

/// BUILDING -> READY, persisting everything the build produced.
pub async fn mark_ready(
    conn: &mut AsyncPgConnection,
    id: Uuid,
    image_ref: &str,
    container_name: &str,
    service_port: i32,
    preview_url: &str,
) -> anyhow::Result<()> {
    diesel::update(
        deployments::table
            .find(id)
            .filter(deployments::status.eq(STATUS_BUILDING)),
    )
    .set((
        deployments::status.eq(STATUS_READY),
        deployments::image_ref.eq(image_ref),
        deployments::container_name.eq(container_name),
        deployments::service_port.eq(service_port),
        deployments::preview_url.eq(preview_url),
        deployments::updated_at.eq(chrono::Utc::now()),
    ))
    .execute(conn)
    .await?;

    crate::metrics::deployment_status_changed(STATUS_READY);
    Ok(())
}

/// BUILDING -> FAILED. Terminal states are never overwritten.
pub async fn mark_failed(conn: &mut AsyncPgConnection, id: Uuid) -> anyhow::Result<()> {
    diesel::update(
        deployments::table
            .find(id)
            .filter(deployments::status.eq(STATUS_BUILDING)),
    )
    .set((
        deployments::status.eq(STATUS_FAILED),
        deployments::updated_at.eq(chrono::Utc::now()),
    ))
    .execute(conn)
    .await?;

    crate::metrics::deployment_status_changed(STATUS_FAILED);
    Ok(())
}

/// Stamp the promotion time on the deployment.
pub async fn mark_promoted(conn: &mut AsyncPgConnection, id: Uuid) -> anyhow::Result<()> {
    diesel::update(deployments::table.find(id))
        .set((
            deployments::promoted_at.eq(chrono::Utc::now()),
            deployments::updated_at.eq(chrono::Utc::now()),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn add_event(
    conn: &mut AsyncPgConnection,
    deployment_id: Uuid,
    kind: &str,
    message: &str,
) -> anyhow::Result<()> {
    diesel::insert_into(deployment_events::table)
        .values((
            deployment_events::deployment_id.eq(deployment_id),
            deployment_events::kind.eq(kind),
            deployment_events::message.eq(message),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn append_log_chunk(
    conn: &mut AsyncPgConnection,
    deployment_id: Uuid,
    stream: &str,
    chunk: &str,
) -> anyhow::Result<()> {
    diesel::insert_into(deployment_log_chunks::table)
        .values((
            deployment_log_chunks::deployment_id.eq(deployment_id),
            deployment_log_chunks::stream.eq(stream),
            deployment_log_chunks::chunk.eq(chunk),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

/// Chunks with `id > after_id`, ascending, for resume semantics.
pub async fn list_log_chunks(
    conn: &mut AsyncPgConnection,
    deployment_id: Uuid,
    after_id: i64,
    limit: i64,
) -> anyhow::Result<Vec<DeploymentLogChunk>> {
    let limit = if limit <= 0 || limit > 2000 { 500 } else { limit };
    let out = deployment_log_chunks::table
        .filter(deployment_log_chunks::deployment_id.eq(deployment_id))
        .filter(deployment_log_chunks::id.gt(after_id))
        .order(deployment_log_chunks::id.asc())
        .limit(limit)
        .load::<DeploymentLogChunk>(conn)
        .await?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_default_branch() {
        assert_eq!(deployment_kind("main", Some("main")), KIND_PRODUCTION);
        assert_eq!(deployment_kind("feature-x", Some("main")), KIND_PREVIEW);
        assert_eq!(deployment_kind("main", None), KIND_PREVIEW);
        assert_eq!(deployment_kind("main", Some("")), KIND_PREVIEW);
    }
}
