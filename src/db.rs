//! Database pool setup.

use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;

pub type DbPool = Pool<AsyncPgConnection>;

/// Build a connection pool for the given DSN.
pub fn connect(dsn: &str) -> anyhow::Result<DbPool> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(dsn);
    let pool = Pool::builder(manager)
        .max_size(10)
        .build()
        .map_err(|e| anyhow::anyhow!("build db pool: {e}"))?;
    Ok(pool)
}
