use crate::refresh::{RefreshSummary, RunStatus};
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

pub async fn record_refresh_run(
    pool: &sqlx::PgPool,
    summary: &RefreshSummary,
    status: RunStatus,
    error: Option<&str>,
) -> anyhow::Result<Uuid> {
    let raw_summary = serde_json::to_value(summary).context("serialize refresh summary failed")?;

    sqlx::query(
        "INSERT INTO refresh_runs \
           (id, started_at, finished_at, provider, range_start, range_end, status, rows_written, error, summary) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .persistent(false)
    .bind(summary.run_id)
    .bind(summary.started_at)
    .bind(Utc::now())
    .bind(&summary.provider)
    .bind(summary.range.start)
    .bind(summary.range.end)
    .bind(status.as_str())
    .bind(i64::try_from(summary.rows_written).unwrap_or(i64::MAX))
    .bind(error)
    .bind(raw_summary)
    .execute(pool)
    .await
    .context("insert refresh_runs failed")?;

    Ok(summary.run_id)
}

/// A row of the refresh ledger, without the per-ticker summary payload.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RefreshRunRecord {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub provider: String,
    pub range_start: NaiveDate,
    pub range_end: NaiveDate,
    pub status: String,
    pub rows_written: i64,
    pub error: Option<String>,
}

pub async fn latest_run(pool: &sqlx::PgPool) -> anyhow::Result<Option<RefreshRunRecord>> {
    let row = sqlx::query_as::<_, RefreshRunRecord>(
        "SELECT id, started_at, finished_at, provider, range_start, range_end, status, rows_written, error \
         FROM refresh_runs \
         ORDER BY started_at DESC \
         LIMIT 1",
    )
    .persistent(false)
    .fetch_optional(pool)
    .await
    .context("select refresh_runs failed")?;
    Ok(row)
}
