//! Durable task queue over Postgres.
//!
//! At-least-once delivery: producers insert `pending` rows, consumers claim
//! with a skip-locked update and mark `done`/`failed`. A `running` row whose
//! lease expired (crashed consumer) becomes claimable again, so handlers must
//! be idempotent. Ordering across tasks is not guaranteed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::db::DbPool;
use crate::models::task::{NewQueueTask, QueueTask};
use crate::schema::queue_tasks;

/// Build tasks run with bounded parallelism.
pub const QUEUE_BUILDS: &str = "builds";
/// Admin tasks run strictly serially (one installer invocation per host).
pub const QUEUE_ADMIN: &str = "admin";

pub const TASK_BUILD_DEPLOY: &str = "build_deploy";
pub const TASK_APPLY_SETTINGS: &str = "apply_settings";
pub const TASK_SELF_UPDATE: &str = "self_update";

const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize, Deserialize)]
pub struct BuildDeployPayload {
    pub deployment_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdminJobPayload {
    pub job_id: Uuid,
}

/// Insert a task. The row is durable before this returns.
pub async fn enqueue<P: Serialize>(
    conn: &mut AsyncPgConnection,
    queue: &str,
    kind: &str,
    payload: &P,
) -> anyhow::Result<i64> {
    let task: QueueTask = diesel::insert_into(queue_tasks::table)
        .values(&NewQueueTask {
            queue: queue.to_string(),
            kind: kind.to_string(),
            payload: serde_json::to_value(payload)?,
            status: crate::models::task::TASK_STATUS_PENDING.to_string(),
        })
        .get_result(conn)
        .await?;
    Ok(task.id)
}

/// Claim the next available task on a queue, if any.
///
/// Also reclaims `running` rows whose 30-minute lease expired, which is how
/// redelivery after a consumer crash happens.
async fn claim_next(pool: &DbPool, queue: &str) -> anyhow::Result<Option<QueueTask>> {
    use crate::models::task::{TASK_STATUS_PENDING, TASK_STATUS_RUNNING};

    let mut conn = pool.get().await?;
    let sql = format!(
        r#"
        UPDATE queue_tasks
        SET status = '{running}', locked_at = NOW(), attempts = attempts + 1, updated_at = NOW()
        WHERE id = (
            SELECT id FROM queue_tasks
            WHERE queue = $1
              AND (status = '{pending}'
                   OR (status = '{running}' AND locked_at < NOW() - INTERVAL '30 minutes'))
            ORDER BY id
            FOR UPDATE SKIP LOCKED
            LIMIT 1
        )
        RETURNING id, queue, kind, payload, status, attempts, error, locked_at, created_at, updated_at
        "#,
        running = TASK_STATUS_RUNNING,
        pending = TASK_STATUS_PENDING,
    );
    let claimed = diesel::sql_query(sql)
        .bind::<diesel::sql_types::Text, _>(queue)
        .get_result::<QueueTask>(&mut conn)
        .await
        .optional()?;
    Ok(claimed)
}

async fn mark_done(pool: &DbPool, task_id: i64) -> anyhow::Result<()> {
    let mut conn = pool.get().await?;
    diesel::update(queue_tasks::table.find(task_id))
        .set((
            queue_tasks::status.eq(crate::models::task::TASK_STATUS_DONE),
            queue_tasks::updated_at.eq(chrono::Utc::now()),
        ))
        .execute(&mut conn)
        .await?;
    Ok(())
}

async fn mark_failed(pool: &DbPool, task_id: i64, err: &str) -> anyhow::Result<()> {
    let mut conn = pool.get().await?;
    diesel::update(queue_tasks::table.find(task_id))
        .set((
            queue_tasks::status.eq(crate::models::task::TASK_STATUS_FAILED),
            queue_tasks::error.eq(err),
            queue_tasks::updated_at.eq(chrono::Utc::now()),
        ))
        .execute(&mut conn)
        .await?;
    Ok(())
}

/// Run a polling consumer loop forever. Spawned as a background tokio task.
pub async fn run_consumer<F, Fut>(pool: DbPool, queue: &'static str, concurrency: usize, handler: F)
where
    F: Fn(QueueTask) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tracing::info!(queue, concurrency, "task consumer started");
    let semaphore = Arc::new(Semaphore::new(concurrency));

    loop {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => return,
        };

        match claim_next(&pool, queue).await {
            Ok(Some(task)) => {
                let pool = pool.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    let task_id = task.id;
                    let kind = task.kind.clone();
                    match handler(task).await {
                        Ok(()) => {
                            if let Err(e) = mark_done(&pool, task_id).await {
                                tracing::error!(task_id, "mark task done: {e}");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(task_id, kind = %kind, "task failed: {e}");
                            if let Err(e) = mark_failed(&pool, task_id, &e.to_string()).await {
                                tracing::error!(task_id, "mark task failed: {e}");
                            }
                        }
                    }
                    drop(permit);
                });
            }
            Ok(None) => {
                drop(permit);
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            Err(e) => {
                tracing::error!(queue, "queue poll error: {e}");
                drop(permit);
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payloads_use_snake_case_wire_names() {
        let id = Uuid::new_v4();
        let v = serde_json::to_value(BuildDeployPayload { deployment_id: id }).unwrap();
        assert_eq!(v["deployment_id"], serde_json::json!(id.to_string()));
        let v = serde_json::to_value(AdminJobPayload { job_id: id }).unwrap();
        assert_eq!(v["job_id"], serde_json::json!(id.to_string()));
    }
}
