use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stockview_core::config::Settings;
use stockview_core::domain::price::normalize_ticker;
use stockview_core::ingest::provider::PriceHistoryProvider;
use stockview_core::ingest::yahoo::YahooChartClient;
use stockview_core::refresh::{self, RefreshSummary, TickerOutcome};
use stockview_core::storage::lock::with_refresh_lease;
use stockview_core::storage::{self, metadata};
use stockview_core::time::range::{resolve_refresh_range, DateRange};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod universe;

#[derive(Debug, Parser)]
#[command(name = "stockview_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the tables and the analytical view if missing and seed the default tickers.
    Provision,

    /// Upsert ticker metadata (company name, sector).
    Seed {
        /// JSON array of {ticker, company_name, sector}. Defaults to the built-in universe.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Fetch daily price history and replace it in the raw price store.
    Refresh {
        /// First trade date (YYYY-MM-DD). Defaults to 2021-01-01.
        #[arg(long)]
        start: Option<String>,

        /// Last trade date, inclusive (YYYY-MM-DD). Defaults to today's UTC date.
        #[arg(long)]
        end: Option<String>,

        /// Only refresh these tickers (repeatable). They must already have metadata.
        #[arg(long = "ticker")]
        tickers: Vec<String>,

        /// Fetch and compute a preview without touching the database.
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let result = match args.command {
        Command::Provision => provision(&settings).await,
        Command::Seed { file } => seed(&settings, file).await,
        Command::Refresh {
            start,
            end,
            tickers,
            dry_run,
        } => run_refresh(&settings, start, end, tickers, dry_run).await,
    };

    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %format!("{err:#}"), "worker failed");
    }
    result
}

async fn connect(settings: &Settings) -> anyhow::Result<sqlx::PgPool> {
    let opts = settings.pg_connect_options()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect_with(opts)
        .await
        .context("database connect failed")?;

    storage::migrate(&pool).await?;
    Ok(pool)
}

async fn provision(settings: &Settings) -> anyhow::Result<()> {
    let pool = connect(settings).await?;
    let defaults = universe::default_universe();
    let inserted =
        with_refresh_lease(&pool, || metadata::insert_missing_metadata(&pool, &defaults)).await?;
    tracing::info!(inserted, "schema provisioned; default ticker metadata seeded");
    Ok(())
}

async fn seed(settings: &Settings, file: Option<PathBuf>) -> anyhow::Result<()> {
    let items = match file.as_deref() {
        Some(path) => universe::load_universe_file(path)?,
        None => universe::default_universe(),
    };

    let pool = connect(settings).await?;
    let changed = with_refresh_lease(&pool, || metadata::upsert_metadata(&pool, &items)).await?;
    tracing::info!(tickers = items.len(), changed, "ticker metadata upserted");
    Ok(())
}

async fn run_refresh(
    settings: &Settings,
    start: Option<String>,
    end: Option<String>,
    only: Vec<String>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let range = resolve_refresh_range(start.as_deref(), end.as_deref(), chrono::Utc::now())?;
    let provider = YahooChartClient::from_settings(settings)?;
    let only: Vec<String> = only.iter().map(|t| normalize_ticker(t)).collect();

    if dry_run {
        let universe = universe::default_universe();
        let tickers = if only.is_empty() {
            universe.iter().map(|m| m.ticker.clone()).collect()
        } else {
            only
        };

        let batch =
            refresh::fetch_histories(&provider, &tickers, range, refresh::REQUEST_SPACING).await;
        for row in refresh::preview_latest(&batch, &universe) {
            tracing::info!(
                ticker = %row.ticker,
                trade_date = %row.trade_date,
                close = row.close,
                sma_50 = ?row.sma_50,
                sma_200 = ?row.sma_200,
                trend_signal = ?row.trend_signal,
                pct_from_52wk_high = row.pct_from_52wk_high,
                "dry-run preview"
            );
        }
        let summary = RefreshSummary::new(provider.provider_name(), range, batch.reports);
        log_summary(&summary, true);
        return Ok(());
    }

    let pool = connect(settings).await?;
    let summary =
        with_refresh_lease(&pool, || refresh_tracked(&pool, &provider, only, range)).await?;
    log_summary(&summary, false);
    Ok(())
}

/// Seeds missing default metadata, resolves the tracked tickers and refreshes them. Runs under
/// the refresh lease.
async fn refresh_tracked(
    pool: &sqlx::PgPool,
    provider: &YahooChartClient,
    only: Vec<String>,
    range: DateRange,
) -> anyhow::Result<RefreshSummary> {
    metadata::insert_missing_metadata(pool, &universe::default_universe()).await?;
    let tracked = metadata::list_tickers(pool).await?;
    let tickers = select_tickers(tracked, only)?;

    tracing::info!(%range, tickers = ?tickers, "starting refresh");
    refresh::refresh_under_lease(pool, provider, &tickers, range, refresh::REQUEST_SPACING).await
}

/// All tracked tickers, or the requested subset. Requested tickers must be tracked.
fn select_tickers(tracked: Vec<String>, only: Vec<String>) -> anyhow::Result<Vec<String>> {
    if only.is_empty() {
        return Ok(tracked);
    }
    let unknown: Vec<&String> = only.iter().filter(|t| !tracked.contains(t)).collect();
    anyhow::ensure!(
        unknown.is_empty(),
        "tickers without metadata: {unknown:?}; add them with `seed --file` first"
    );
    Ok(only)
}

fn log_summary(summary: &RefreshSummary, dry_run: bool) {
    for report in &summary.tickers {
        match &report.outcome {
            TickerOutcome::Loaded { .. } => {}
            TickerOutcome::NoData => {
                tracing::warn!(ticker = %report.ticker, "skipped: provider returned no data")
            }
            TickerOutcome::Failed { kind, error } => {
                tracing::warn!(ticker = %report.ticker, ?kind, %error, "skipped: fetch failed")
            }
        }
    }

    tracing::info!(
        run_id = %summary.run_id,
        range = %summary.range,
        status = summary.status().as_str(),
        dry_run,
        loaded = summary.loaded(),
        no_data = summary.no_data(),
        failed = summary.failed(),
        dropped_rows = summary.dropped_rows(),
        rows_written = summary.rows_written,
        "refresh finished"
    );
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_refresh_arguments() {
        let args = Args::try_parse_from([
            "stockview_worker",
            "refresh",
            "--start",
            "2024-01-01",
            "--ticker",
            "aapl",
            "--ticker",
            "MSFT",
            "--dry-run",
        ])
        .unwrap();

        match args.command {
            Command::Refresh {
                start,
                end,
                tickers,
                dry_run,
            } => {
                assert_eq!(start.as_deref(), Some("2024-01-01"));
                assert_eq!(end, None);
                assert_eq!(tickers, vec!["aapl", "MSFT"]);
                assert!(dry_run);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    fn owned(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn selects_all_tracked_tickers_by_default() {
        let tracked = owned(&["AAPL", "MSFT"]);
        assert_eq!(select_tickers(tracked.clone(), Vec::new()).unwrap(), tracked);
    }

    #[test]
    fn requested_tickers_must_be_tracked() {
        let tracked = owned(&["AAPL", "MSFT", "NVDA"]);
        assert_eq!(
            select_tickers(tracked.clone(), owned(&["NVDA"])).unwrap(),
            owned(&["NVDA"])
        );

        let err = select_tickers(tracked, owned(&["NVDA", "CRM"])).unwrap_err();
        assert!(err.to_string().contains("CRM"));
    }

    #[test]
    fn parses_seed_file() {
        let args =
            Args::try_parse_from(["stockview_worker", "seed", "--file", "universe.json"]).unwrap();
        assert!(matches!(args.command, Command::Seed { file: Some(_) }));
    }
}
