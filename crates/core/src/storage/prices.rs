use crate::domain::price::PriceHistory;
use crate::storage::contention;
use crate::time::range::DateRange;

// 7 binds per row keeps a full batch far below the Postgres parameter limit.
const UPSERT_BATCH_SIZE: usize = 500;

/// Replaces `range` of every history in one transaction: delete the range, insert the new rows.
/// Re-running with the same input leaves exactly one row per (ticker, trade_date).
pub async fn replace_histories(
    pool: &sqlx::PgPool,
    range: DateRange,
    histories: &[PriceHistory],
) -> anyhow::Result<u64> {
    for history in histories {
        history.validate()?;
        anyhow::ensure!(
            history.records.iter().all(|r| range.contains(r.trade_date)),
            "history of {} has rows outside {range}",
            history.ticker
        );
    }

    contention::with_contention_retry(pool, &["raw_prices"], "replace raw_prices", || {
        replace_histories_once(pool, range, histories)
    })
    .await
}

async fn replace_histories_once(
    pool: &sqlx::PgPool,
    range: DateRange,
    histories: &[PriceHistory],
) -> Result<u64, sqlx::Error> {
    let mut tx = contention::begin_write(pool).await?;
    let mut written: u64 = 0;

    for history in histories {
        let t0 = std::time::Instant::now();
        let deleted = sqlx::query(
            "DELETE FROM raw_prices WHERE ticker = $1 AND trade_date BETWEEN $2 AND $3",
        )
        .persistent(false)
        .bind(&history.ticker)
        .bind(range.start)
        .bind(range.end)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        for chunk in history.records.chunks(UPSERT_BATCH_SIZE) {
            let mut qb = sqlx::QueryBuilder::new(
                "INSERT INTO raw_prices (ticker, trade_date, open, high, low, close, volume) ",
            );
            qb.push_values(chunk, |mut b, r| {
                b.push_bind(&r.ticker)
                    .push_bind(r.trade_date)
                    .push_bind(r.open)
                    .push_bind(r.high)
                    .push_bind(r.low)
                    .push_bind(r.close)
                    .push_bind(r.volume);
            });
            qb.push(
                " ON CONFLICT (ticker, trade_date) DO UPDATE \
                   SET open = EXCLUDED.open, high = EXCLUDED.high, low = EXCLUDED.low, \
                       close = EXCLUDED.close, volume = EXCLUDED.volume, ingested_at = now()",
            );

            let res = qb.build().persistent(false).execute(&mut *tx).await?;
            written += res.rows_affected();
        }

        tracing::debug!(
            ticker = %history.ticker,
            %range,
            deleted,
            inserted = history.records.len(),
            elapsed_ms = t0.elapsed().as_millis(),
            "raw_prices range replaced"
        );
    }

    tx.commit().await?;
    Ok(written)
}
