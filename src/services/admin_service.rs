//! Admin job rows and their append-only log stream.

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use crate::models::admin_job::{
    AdminJob, AdminJobLog, NewAdminJob, JOB_STATUS_FAILED, JOB_STATUS_QUEUED, JOB_STATUS_RUNNING,
    JOB_STATUS_SUCCESS,
};
use crate::schema::{admin_job_logs, admin_jobs};

pub async fn create_admin_job(
    conn: &mut AsyncPgConnection,
    kind: &str,
    created_by_user_id: Option<Uuid>,
) -> anyhow::Result<AdminJob> {
    let job = diesel::insert_into(admin_jobs::table)
        .values(&NewAdminJob {
            kind: kind.to_string(),
            status: JOB_STATUS_QUEUED.to_string(),
            created_by_user_id,
        })
        .get_result::<AdminJob>(conn)
        .await?;
    crate::metrics::admin_job_status(JOB_STATUS_QUEUED);
    Ok(job)
}

pub async fn get_admin_job(
    conn: &mut AsyncPgConnection,
    id: Uuid,
) -> anyhow::Result<Option<AdminJob>> {
    let job = admin_jobs::table
        .find(id)
        .first::<AdminJob>(conn)
        .await
        .optional()?;
    Ok(job)
}

pub async fn set_job_status(
    conn: &mut AsyncPgConnection,
    job_id: Uuid,
    status: &str,
    error: Option<&str>,
) -> anyhow::Result<()> {
    let now = chrono::Utc::now();
    match status {
        JOB_STATUS_RUNNING => {
            diesel::update(admin_jobs::table.find(job_id))
                .set((
                    admin_jobs::status.eq(status),
                    admin_jobs::started_at.eq(now),
                    admin_jobs::error.eq(error),
                ))
                .execute(conn)
                .await?;
        }
        JOB_STATUS_SUCCESS | JOB_STATUS_FAILED => {
            diesel::update(admin_jobs::table.find(job_id))
                .set((
                    admin_jobs::status.eq(status),
                    admin_jobs::finished_at.eq(now),
                    admin_jobs::error.eq(error),
                ))
                .execute(conn)
                .await?;
        }
        _ => {
            diesel::update(admin_jobs::table.find(job_id))
                .set((admin_jobs::status.eq(status), admin_jobs::error.eq(error)))
                .execute(conn)
                .await?;
        }
    }
    crate::metrics::admin_job_status(status);
    Ok(())
}

pub async fn append_job_log(
    conn: &mut AsyncPgConnection,
    job_id: Uuid,
    stream: &str,
    chunk: &str,
) -> anyhow::Result<()> {
    let stream = if stream.is_empty() { "system" } else { stream };
    diesel::insert_into(admin_job_logs::table)
        .values((
            admin_job_logs::job_id.eq(job_id),
            admin_job_logs::stream.eq(stream),
            admin_job_logs::chunk.eq(chunk),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn list_job_logs(
    conn: &mut AsyncPgConnection,
    job_id: Uuid,
    limit: i64,
) -> anyhow::Result<Vec<AdminJobLog>> {
    let limit = if limit <= 0 || limit > 2000 { 500 } else { limit };
    let out = admin_job_logs::table
        .filter(admin_job_logs::job_id.eq(job_id))
        .order(admin_job_logs::id.asc())
        .limit(limit)
        .load::<AdminJobLog>(conn)
        .await?;
    Ok(out)
}
