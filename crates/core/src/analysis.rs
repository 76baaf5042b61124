//! In-memory computation of the `v_stock_analysis` projection.
//!
//! The database view is the read interface for dashboards; this module computes the same rows
//! from a slice of price history so a refresh can be previewed without a database, and so the
//! view's definition has an executable reference in tests.
//!
//! All windows count rows, not calendar days: a missing trading day in the provider history is
//! skipped rather than filled.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::price::PriceRecord;
use crate::domain::ticker::{Sector, TickerMetadata};

pub const SMA_SHORT_WINDOW: usize = 50;
pub const SMA_LONG_WINDOW: usize = 200;
/// ~one year of trading days.
pub const HIGH_WINDOW: usize = 252;
pub const VOLATILITY_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendSignal {
    Bullish,
    Bearish,
}

impl TrendSignal {
    /// Two-average crossover. `None` until both averages have full windows.
    pub fn from_averages(sma_short: Option<f64>, sma_long: Option<f64>) -> Option<Self> {
        match (sma_short, sma_long) {
            (Some(short), Some(long)) if short > long => Some(TrendSignal::Bullish),
            (Some(_), Some(_)) => Some(TrendSignal::Bearish),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrendSignal::Bullish => "Bullish",
            TrendSignal::Bearish => "Bearish",
        }
    }
}

impl fmt::Display for TrendSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrendSignal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "Bullish" => Ok(TrendSignal::Bullish),
            "Bearish" => Ok(TrendSignal::Bearish),
            other => anyhow::bail!("unknown trend signal: {other:?}"),
        }
    }
}

/// One row of the analytical projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticalRow {
    pub ticker: String,
    pub trade_date: NaiveDate,
    pub company_name: Option<String>,
    pub sector: Option<Sector>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: f64,
    pub volume: i64,
    pub daily_return_pct: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    pub trend_signal: Option<TrendSignal>,
    pub high_52wk: f64,
    pub pct_from_52wk_high: f64,
    pub volatility_20d: Option<f64>,
}

/// Computes analytical rows for a single ticker's history. Input order does not matter.
pub fn compute_rows(history: &[PriceRecord], meta: Option<&TickerMetadata>) -> Vec<AnalyticalRow> {
    let mut sorted: Vec<&PriceRecord> = history.iter().collect();
    sorted.sort_by_key(|r| r.trade_date);
    debug_assert!(sorted.windows(2).all(|w| w[0].ticker == w[1].ticker));

    let closes: Vec<f64> = sorted.iter().map(|r| r.close).collect();

    let returns: Vec<Option<f64>> = (0..closes.len())
        .map(|i| {
            let prev = *closes.get(i.checked_sub(1)?)?;
            if prev == 0.0 {
                return None;
            }
            Some((closes[i] - prev) / prev * 100.0)
        })
        .collect();

    let mut out = Vec::with_capacity(sorted.len());
    for (i, rec) in sorted.iter().enumerate() {
        let sma_50 = trailing_mean(&closes, i, SMA_SHORT_WINDOW);
        let sma_200 = trailing_mean(&closes, i, SMA_LONG_WINDOW);

        let high_52wk = trailing_window(&closes, i, HIGH_WINDOW)
            .iter()
            .copied()
            .fold(f64::MIN, f64::max);
        let pct_from_52wk_high = (rec.close - high_52wk) / high_52wk * 100.0;

        out.push(AnalyticalRow {
            ticker: rec.ticker.clone(),
            trade_date: rec.trade_date,
            company_name: meta.map(|m| m.company_name.clone()),
            sector: meta.map(|m| m.sector),
            open: rec.open,
            high: rec.high,
            low: rec.low,
            close: rec.close,
            volume: rec.volume,
            daily_return_pct: returns[i],
            sma_50,
            sma_200,
            trend_signal: TrendSignal::from_averages(sma_50, sma_200),
            high_52wk,
            pct_from_52wk_high,
            volatility_20d: trailing_sample_stddev(&returns, i, VOLATILITY_WINDOW),
        });
    }

    out
}

/// Computes rows for a mixed history, grouped by ticker and ordered by (ticker, trade_date).
pub fn compute_all(history: &[PriceRecord], metadata: &[TickerMetadata]) -> Vec<AnalyticalRow> {
    let mut by_ticker: BTreeMap<&str, Vec<PriceRecord>> = BTreeMap::new();
    for rec in history {
        by_ticker
            .entry(rec.ticker.as_str())
            .or_default()
            .push(rec.clone());
    }

    let mut out = Vec::with_capacity(history.len());
    for (ticker, records) in by_ticker {
        let meta = metadata.iter().find(|m| m.ticker == ticker);
        out.extend(compute_rows(&records, meta));
    }
    out
}

fn trailing_window<T>(values: &[T], i: usize, n: usize) -> &[T] {
    let start = (i + 1).saturating_sub(n);
    &values[start..=i]
}

fn trailing_mean(values: &[f64], i: usize, n: usize) -> Option<f64> {
    if i + 1 < n {
        return None;
    }
    let window = trailing_window(values, i, n);
    Some(window.iter().sum::<f64>() / n as f64)
}

fn trailing_sample_stddev(values: &[Option<f64>], i: usize, n: usize) -> Option<f64> {
    if i + 1 < n || n < 2 {
        return None;
    }
    let window: Vec<f64> = trailing_window(values, i, n)
        .iter()
        .copied()
        .collect::<Option<Vec<f64>>>()?;
    let mean = window.iter().sum::<f64>() / n as f64;
    let var = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    Some(var.sqrt())
}
