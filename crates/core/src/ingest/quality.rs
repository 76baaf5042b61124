use crate::domain::price::{normalize_ticker, PriceRecord};
use crate::ingest::types::RawBar;
use crate::time::range::DateRange;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QualityReport {
    pub kept: usize,
    pub missing_date: usize,
    pub missing_close: usize,
    pub non_positive_close: usize,
    pub missing_volume: usize,
    pub negative_volume: usize,
    /// Later bars for an already-seen date replace the earlier one.
    pub duplicate_dates: usize,
    pub out_of_range: usize,
}

impl QualityReport {
    pub fn malformed(&self) -> usize {
        self.missing_date
            + self.missing_close
            + self.non_positive_close
            + self.missing_volume
            + self.negative_volume
    }
}

/// Drops malformed bars and bars outside `range`, collapsing duplicate dates to the last bar.
/// The output is ordered by trade date.
pub fn sanitize_bars(
    ticker: &str,
    bars: Vec<RawBar>,
    range: DateRange,
) -> (Vec<PriceRecord>, QualityReport) {
    let ticker = normalize_ticker(ticker);
    let mut report = QualityReport::default();
    let mut by_date: BTreeMap<NaiveDate, PriceRecord> = BTreeMap::new();

    for bar in bars {
        let Some(trade_date) = bar.trade_date else {
            report.missing_date += 1;
            continue;
        };
        let Some(close) = bar.close else {
            report.missing_close += 1;
            continue;
        };
        if !(close.is_finite() && close > 0.0) {
            report.non_positive_close += 1;
            continue;
        }
        let Some(volume) = bar.volume else {
            report.missing_volume += 1;
            continue;
        };
        if volume < 0 {
            report.negative_volume += 1;
            continue;
        }
        if !range.contains(trade_date) {
            report.out_of_range += 1;
            continue;
        }

        let record = PriceRecord {
            ticker: ticker.clone(),
            trade_date,
            open: bar.open.filter(|v| v.is_finite()),
            high: bar.high.filter(|v| v.is_finite()),
            low: bar.low.filter(|v| v.is_finite()),
            close,
            volume,
        };
        if by_date.insert(trade_date, record).is_some() {
            report.duplicate_dates += 1;
        }
    }

    let records: Vec<PriceRecord> = by_date.into_values().collect();
    report.kept = records.len();

    if report.malformed() > 0 {
        tracing::debug!(%ticker, ?report, "dropped malformed provider bars");
    }

    (records, report)
}
