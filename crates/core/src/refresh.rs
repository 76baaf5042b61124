use crate::analysis::{self, AnalyticalRow};
use crate::domain::price::{normalize_ticker, PriceHistory, PriceRecord};
use crate::domain::ticker::TickerMetadata;
use crate::ingest::provider::{PriceHistoryProvider, ProviderErrorKind};
use crate::ingest::quality::{sanitize_bars, QualityReport};
use crate::storage::{lock, prices, runs};
use crate::time::range::DateRange;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// Pause between provider requests.
pub const REQUEST_SPACING: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickerOutcome {
    Loaded { rows: usize, quality: QualityReport },
    NoData,
    Failed { kind: ProviderErrorKind, error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickerReport {
    pub ticker: String,
    #[serde(flatten)]
    pub outcome: TickerOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct FetchedBatch {
    pub histories: Vec<PriceHistory>,
    pub reports: Vec<TickerReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub run_id: Uuid,
    pub provider: String,
    pub range: DateRange,
    pub started_at: DateTime<Utc>,
    pub tickers: Vec<TickerReport>,
    pub rows_written: u64,
}

impl RefreshSummary {
    pub fn new(provider: &str, range: DateRange, tickers: Vec<TickerReport>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            provider: provider.to_string(),
            range,
            started_at: Utc::now(),
            tickers,
            rows_written: 0,
        }
    }

    pub fn loaded(&self) -> usize {
        self.count(|o| matches!(o, TickerOutcome::Loaded { .. }))
    }

    pub fn no_data(&self) -> usize {
        self.count(|o| matches!(o, TickerOutcome::NoData))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, TickerOutcome::Failed { .. }))
    }

    pub fn dropped_rows(&self) -> usize {
        self.tickers
            .iter()
            .map(|t| match &t.outcome {
                TickerOutcome::Loaded { quality, .. } => quality.malformed(),
                _ => 0,
            })
            .sum()
    }

    pub fn status(&self) -> RunStatus {
        match self.loaded() {
            0 => RunStatus::Error,
            n if n < self.tickers.len() => RunStatus::Partial,
            _ => RunStatus::Success,
        }
    }

    fn count(&self, pred: impl Fn(&TickerOutcome) -> bool) -> usize {
        self.tickers.iter().filter(|t| pred(&t.outcome)).count()
    }
}

/// Fetches and sanitizes each ticker in turn. A ticker that fails or has no data is reported and
/// skipped; it never stops the batch.
pub async fn fetch_histories(
    provider: &dyn PriceHistoryProvider,
    tickers: &[String],
    range: DateRange,
    spacing: Duration,
) -> FetchedBatch {
    let mut batch = FetchedBatch::default();
    let total = tickers.len();

    for (idx, raw_ticker) in tickers.iter().enumerate() {
        if idx != 0 && !spacing.is_zero() {
            tokio::time::sleep(spacing).await;
        }
        let ticker = normalize_ticker(raw_ticker);

        let outcome = match provider.fetch_daily_history(&ticker, range).await {
            Ok(bars) => {
                let (records, quality) = sanitize_bars(&ticker, bars, range);
                if records.is_empty() {
                    tracing::warn!(%ticker, %range, ?quality, "no usable price data; skipping ticker");
                    TickerOutcome::NoData
                } else {
                    tracing::info!(
                        idx,
                        total,
                        %ticker,
                        rows = records.len(),
                        dropped = quality.malformed(),
                        "fetched price history"
                    );
                    let rows = records.len();
                    batch.histories.push(PriceHistory {
                        ticker: ticker.clone(),
                        records,
                    });
                    TickerOutcome::Loaded { rows, quality }
                }
            }
            Err(err) => match ProviderErrorKind::of(&err) {
                ProviderErrorKind::NoData => {
                    tracing::warn!(%ticker, %range, error = %err, "provider has no data; skipping ticker");
                    TickerOutcome::NoData
                }
                kind => {
                    tracing::warn!(%ticker, ?kind, error = %err, "price fetch failed; skipping ticker");
                    TickerOutcome::Failed {
                        kind,
                        error: format!("{err:#}"),
                    }
                }
            },
        };

        batch.reports.push(TickerReport { ticker, outcome });
    }

    batch
}

/// Runs a full refresh under the refresh lease. The lease is released on every path.
pub async fn run_refresh(
    pool: &sqlx::PgPool,
    provider: &dyn PriceHistoryProvider,
    tickers: &[String],
    range: DateRange,
    spacing: Duration,
) -> anyhow::Result<RefreshSummary> {
    lock::with_refresh_lease(pool, || {
        refresh_under_lease(pool, provider, tickers, range, spacing)
    })
    .await
}

/// The refresh itself. Callers must already hold the refresh lease.
pub async fn refresh_under_lease(
    pool: &sqlx::PgPool,
    provider: &dyn PriceHistoryProvider,
    tickers: &[String],
    range: DateRange,
    spacing: Duration,
) -> anyhow::Result<RefreshSummary> {
    anyhow::ensure!(!tickers.is_empty(), "no tickers to refresh");

    let started_at = Utc::now();
    let batch = fetch_histories(provider, tickers, range, spacing).await;

    let mut summary = RefreshSummary::new(provider.provider_name(), range, batch.reports);
    summary.started_at = started_at;

    if batch.histories.is_empty() {
        let msg = format!("no price data fetched for any of {} tickers", tickers.len());
        runs::record_refresh_run(pool, &summary, RunStatus::Error, Some(&msg)).await?;
        anyhow::bail!(msg);
    }

    match prices::replace_histories(pool, range, &batch.histories).await {
        Ok(written) => summary.rows_written = written,
        Err(err) => {
            let msg = format!("{err:#}");
            if let Err(record_err) =
                runs::record_refresh_run(pool, &summary, RunStatus::Error, Some(&msg)).await
            {
                tracing::warn!(error = %record_err, "failed to record failed refresh run");
            }
            return Err(err);
        }
    }

    runs::record_refresh_run(pool, &summary, summary.status(), None).await?;
    Ok(summary)
}

/// Latest analytical row per fetched ticker, computed in memory. Ordered by ticker.
pub fn preview_latest(batch: &FetchedBatch, metadata: &[TickerMetadata]) -> Vec<AnalyticalRow> {
    let records: Vec<PriceRecord> = batch
        .histories
        .iter()
        .flat_map(|h| h.records.iter().cloned())
        .collect();

    let rows = analysis::compute_all(&records, metadata);
    let mut latest: Vec<AnalyticalRow> = Vec::with_capacity(batch.histories.len());
    for row in rows {
        match latest.last_mut() {
            Some(last) if last.ticker == row.ticker => *last = row,
            _ => latest.push(row),
        }
    }
    latest
}
