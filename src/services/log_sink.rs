//! Buffered sink that turns child-process output into durable log chunks.
//!
//! Flushes when the buffer exceeds 8 KiB or 500 ms have passed since the
//! last flush, whichever comes first. Bounds both latency and per-write
//! overhead. Appends are best-effort: a failed write must not kill a build.

use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use crate::db::DbPool;
use crate::services::deployment_service;

const FLUSH_BYTES: usize = 8 * 1024;
const FLUSH_INTERVAL_MS: u128 = 500;

pub struct LogSink {
    pool: DbPool,
    deployment_id: Uuid,
    stream: &'static str,
    buf: Vec<u8>,
    last_flush: Instant,
}

impl LogSink {
    pub fn new(pool: DbPool, deployment_id: Uuid, stream: &'static str) -> Self {
        Self {
            pool,
            deployment_id,
            stream,
            buf: Vec::new(),
            last_flush: Instant::now(),
        }
    }

    pub async fn write(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        if self.buf.len() > FLUSH_BYTES || self.last_flush.elapsed().as_millis() > FLUSH_INTERVAL_MS
        {
            self.flush().await;
        }
    }

    pub async fn flush(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let chunk = String::from_utf8_lossy(&self.buf).into_owned();
        match self.pool.get().await {
            Ok(mut conn) => {
                if let Err(e) = deployment_service::append_log_chunk(
                    &mut conn,
                    self.deployment_id,
                    self.stream,
                    &chunk,
                )
                .await
                {
                    tracing::warn!(deployment_id = %self.deployment_id, "append log chunk: {e}");
                }
            }
            Err(e) => {
                tracing::warn!(deployment_id = %self.deployment_id, "log sink pool: {e}");
            }
        }
        self.buf.clear();
        self.last_flush = Instant::now();
    }
}

/// Drain a child process pipe into a sink until EOF, then flush.
pub async fn drain<R: AsyncRead + Unpin>(mut reader: R, mut sink: LogSink) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => sink.write(&buf[..n]).await,
        }
    }
    sink.flush().await;
}
