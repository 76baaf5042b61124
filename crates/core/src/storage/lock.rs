use anyhow::Context;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use std::future::Future;

// Advisory locks are scoped to the Postgres session, so the lease pins one pooled connection for
// as long as it is held.
const LOCK_NAMESPACE: i64 = 0x5354_4F43_4B56; // "STOCKV"
pub const REFRESH_LOCK_KEY: i64 = LOCK_NAMESPACE ^ 1;

/// Exclusive right to write the price and metadata tables for the duration of a refresh.
#[derive(Debug)]
pub struct RefreshLease {
    conn: Option<PoolConnection<Postgres>>,
    key: i64,
}

impl RefreshLease {
    pub async fn try_acquire_key(pool: &sqlx::PgPool, key: i64) -> anyhow::Result<Option<Self>> {
        let mut conn = pool
            .acquire()
            .await
            .context("failed to acquire a connection for the refresh lease")?;

        let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .persistent(false)
            .bind(key)
            .fetch_one(&mut *conn)
            .await
            .with_context(|| format!("failed to acquire advisory lock (key={key})"))?;

        if !acquired.0 {
            return Ok(None);
        }

        tracing::debug!(key, "refresh lease acquired");
        Ok(Some(Self {
            conn: Some(conn),
            key,
        }))
    }

    pub async fn release(mut self) -> anyhow::Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        let key = self.key;

        let released: (bool,) = sqlx::query_as("SELECT pg_advisory_unlock($1)")
            .persistent(false)
            .bind(key)
            .fetch_one(&mut *conn)
            .await
            .with_context(|| format!("failed to release advisory lock (key={key})"))?;

        anyhow::ensure!(released.0, "advisory lock was not held (key={key})");
        tracing::debug!(key, "refresh lease released");
        Ok(())
    }
}

/// Runs `f` while holding the refresh lease; fails without running it if another session holds
/// the lease. The lease is released on every path.
pub async fn with_refresh_lease<T, F, Fut>(pool: &sqlx::PgPool, f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    with_lease_key(pool, REFRESH_LOCK_KEY, f).await
}

pub async fn with_lease_key<T, F, Fut>(pool: &sqlx::PgPool, key: i64, f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let lease = RefreshLease::try_acquire_key(pool, key)
        .await?
        .context("refresh lease is held by another session; is another refresh running?")?;

    let result = f().await;
    let released = lease.release().await;

    let value = result?;
    released?;
    Ok(value)
}

impl Drop for RefreshLease {
    fn drop(&mut self) {
        // Closing the session is the only synchronous way to free a session-level lock.
        if let Some(conn) = self.conn.take() {
            tracing::warn!(key = self.key, "refresh lease dropped without release; closing its session");
            drop(conn.detach());
        }
    }
}
