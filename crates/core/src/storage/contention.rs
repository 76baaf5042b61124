use anyhow::Context;
use std::future::Future;

/// Bounded wait for table and row locks inside every write transaction.
const SET_WRITE_LOCK_TIMEOUT: &str = "SET LOCAL lock_timeout = '10s'";

const LOCK_NOT_AVAILABLE: &str = "55P03";

pub async fn begin_write(
    pool: &sqlx::PgPool,
) -> Result<sqlx::Transaction<'static, sqlx::Postgres>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query(SET_WRITE_LOCK_TIMEOUT)
        .persistent(false)
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}

pub fn is_lock_timeout(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(LOCK_NOT_AVAILABLE),
        _ => false,
    }
}

/// Runs a write; if it times out waiting for a lock, terminates the sessions holding write locks
/// on `tables` (the tables this write touches) and runs it exactly once more.
pub async fn with_contention_retry<T, F, Fut>(
    pool: &sqlx::PgPool,
    tables: &[&str],
    what: &str,
    mut op: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    match op().await {
        Ok(v) => return Ok(v),
        Err(err) if is_lock_timeout(&err) => {
            tracing::warn!(what, error = %err, "write blocked by another session; terminating lock holders");
        }
        Err(err) => return Err(err).with_context(|| format!("{what} failed")),
    }

    let terminated = terminate_lock_holders(pool, tables).await?;
    tracing::warn!(what, terminated, "terminated blocking sessions; retrying write once");

    match op().await {
        Ok(v) => Ok(v),
        Err(err) if is_lock_timeout(&err) => {
            Err(err).with_context(|| format!("{what} still blocked after terminating lock holders"))
        }
        Err(err) => Err(err).with_context(|| format!("{what} failed on retry")),
    }
}

/// Terminates other sessions holding write-conflicting locks on `tables`. Plain readers
/// (`AccessShareLock`) are left alone. Fails if any termination is refused.
pub async fn terminate_lock_holders(pool: &sqlx::PgPool, tables: &[&str]) -> anyhow::Result<usize> {
    let tables: Vec<String> = tables.iter().map(|t| t.to_string()).collect();

    let rows: Vec<(i32, bool)> = sqlx::query_as(
        "SELECT holders.pid, pg_terminate_backend(holders.pid) \
         FROM ( \
           SELECT DISTINCT l.pid \
           FROM pg_locks l \
           JOIN pg_class c ON c.oid = l.relation \
           WHERE l.granted \
             AND l.mode <> 'AccessShareLock' \
             AND l.pid <> pg_backend_pid() \
             AND l.database = (SELECT oid FROM pg_database WHERE datname = current_database()) \
             AND c.relname = ANY($1) \
         ) holders",
    )
    .persistent(false)
    .bind(&tables)
    .fetch_all(pool)
    .await
    .context("terminate lock holders failed")?;

    let refused: Vec<i32> = rows
        .iter()
        .filter(|(_, terminated)| !terminated)
        .map(|(pid, _)| *pid)
        .collect();
    anyhow::ensure!(
        refused.is_empty(),
        "could not terminate sessions holding locks on {tables:?}: pids {refused:?}"
    );

    for (pid, _) in &rows {
        tracing::warn!(pid, ?tables, "terminated session holding a conflicting lock");
    }
    Ok(rows.len())
}
