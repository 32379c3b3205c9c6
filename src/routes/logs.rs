//! Deployment log streaming over Server-Sent Events.
//!
//! Clients resume with `?after=<chunk id>`. Each poll tick (750 ms) reads at
//! most 500 chunks, so backpressure is bounded by construction. The stream
//! ends when the client disconnects or the journal read fails.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::Json;
use futures::stream::{self, Stream};
use serde::Deserialize;
use uuid::Uuid;

use crate::db::DbPool;
use crate::services::deployment_service;

use super::{err, AppState};

const POLL_INTERVAL: Duration = Duration::from_millis(750);
const CHUNKS_PER_TICK: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub after: i64,
}

struct StreamState {
    pool: DbPool,
    deployment_id: Uuid,
    after: i64,
    queued: VecDeque<Event>,
    done: bool,
}

pub async fn deployment_logs_sse(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<LogsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, Json<serde_json::Value>)>
{
    let mut conn = state
        .pool
        .get()
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    match deployment_service::get_deployment(&mut conn, id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(err(StatusCode::NOT_FOUND, "not found")),
        Err(e) => return Err(err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
    drop(conn);

    let initial = StreamState {
        pool: state.pool.clone(),
        deployment_id: id,
        after: query.after,
        queued: VecDeque::new(),
        done: false,
    };

    let stream = stream::unfold(initial, |mut st| async move {
        loop {
            if let Some(event) = st.queued.pop_front() {
                return Some((Ok(event), st));
            }
            if st.done {
                return None;
            }
            tokio::time::sleep(POLL_INTERVAL).await;

            let chunks = match st.pool.get().await {
                Ok(mut conn) => {
                    deployment_service::list_log_chunks(
                        &mut conn,
                        st.deployment_id,
                        st.after,
                        CHUNKS_PER_TICK,
                    )
                    .await
                }
                Err(e) => Err(e.into()),
            };

            match chunks {
                Ok(chunks) => {
                    for chunk in chunks {
                        st.after = chunk.id;
                        let id = chunk.id;
                        match Event::default()
                            .id(id.to_string())
                            .event("log")
                            .json_data(&chunk)
                        {
                            Ok(event) => st.queued.push_back(event),
                            Err(e) => {
                                tracing::warn!(chunk_id = id, "encode log event: {e}");
                            }
                        }
                    }
                }
                Err(e) => {
                    st.done = true;
                    return Some((Ok(Event::default().event("error").data(e.to_string())), st));
                }
            }
        }
    });

    Ok(Sse::new(stream))
}
