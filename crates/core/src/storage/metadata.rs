use crate::domain::ticker::{Sector, TickerMetadata};
use crate::storage::contention;
use anyhow::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnConflict {
    Update,
    Keep,
}

/// Inserts or updates metadata rows. Rows whose attributes are unchanged are not touched.
pub async fn upsert_metadata(pool: &sqlx::PgPool, items: &[TickerMetadata]) -> anyhow::Result<u64> {
    write_metadata(pool, items, OnConflict::Update).await
}

/// Inserts rows for tickers that have no metadata yet; existing rows are left as they are.
pub async fn insert_missing_metadata(
    pool: &sqlx::PgPool,
    items: &[TickerMetadata],
) -> anyhow::Result<u64> {
    write_metadata(pool, items, OnConflict::Keep).await
}

async fn write_metadata(
    pool: &sqlx::PgPool,
    items: &[TickerMetadata],
    on_conflict: OnConflict,
) -> anyhow::Result<u64> {
    if items.is_empty() {
        return Ok(0);
    }
    for item in items {
        item.validate()?;
    }
    let mut seen = std::collections::BTreeSet::new();
    for item in items {
        anyhow::ensure!(
            seen.insert(item.ticker.as_str()),
            "duplicate ticker in metadata batch: {}",
            item.ticker
        );
    }

    contention::with_contention_retry(pool, &["ticker_metadata"], "write ticker_metadata", || {
        write_metadata_once(pool, items, on_conflict)
    })
    .await
}

async fn write_metadata_once(
    pool: &sqlx::PgPool,
    items: &[TickerMetadata],
    on_conflict: OnConflict,
) -> Result<u64, sqlx::Error> {
    let mut tx = contention::begin_write(pool).await?;

    let mut qb = sqlx::QueryBuilder::new("INSERT INTO ticker_metadata (ticker, company_name, sector) ");
    qb.push_values(items, |mut b, item| {
        b.push_bind(&item.ticker)
            .push_bind(&item.company_name)
            .push_bind(item.sector.as_str());
    });
    match on_conflict {
        OnConflict::Update => qb.push(
            " ON CONFLICT (ticker) DO UPDATE \
               SET company_name = EXCLUDED.company_name, sector = EXCLUDED.sector, updated_at = now() \
             WHERE ticker_metadata.company_name IS DISTINCT FROM EXCLUDED.company_name \
                OR ticker_metadata.sector IS DISTINCT FROM EXCLUDED.sector",
        ),
        OnConflict::Keep => qb.push(" ON CONFLICT (ticker) DO NOTHING"),
    };

    let affected = qb
        .build()
        .persistent(false)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    tx.commit().await?;
    Ok(affected)
}

pub async fn list_metadata(pool: &sqlx::PgPool) -> anyhow::Result<Vec<TickerMetadata>> {
    let rows = sqlx::query_as::<_, (String, String, String)>(
        "SELECT ticker, company_name, sector FROM ticker_metadata ORDER BY ticker ASC",
    )
    .persistent(false)
    .fetch_all(pool)
    .await
    .context("select ticker_metadata failed")?;

    rows.into_iter()
        .map(|(ticker, company_name, sector)| {
            let sector: Sector = sector
                .parse()
                .with_context(|| format!("invalid sector in DB for {ticker}"))?;
            Ok(TickerMetadata {
                ticker,
                company_name,
                sector,
            })
        })
        .collect()
}

/// Tracked tickers, as listed in the metadata store.
pub async fn list_tickers(pool: &sqlx::PgPool) -> anyhow::Result<Vec<String>> {
    let tickers: Vec<String> =
        sqlx::query_scalar("SELECT ticker FROM ticker_metadata ORDER BY ticker ASC")
            .persistent(false)
            .fetch_all(pool)
            .await
            .context("select tickers failed")?;
    Ok(tickers)
}
