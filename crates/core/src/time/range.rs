use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// First trading day pulled when no explicit start is given.
pub const DEFAULT_HISTORY_START: (i32, u32, u32) = (2021, 1, 1);

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> anyhow::Result<Self> {
        anyhow::ensure!(
            start <= end,
            "date range start {start} must not be after end {end}"
        );
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

pub fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid date {s:?}, expected YYYY-MM-DD"))
}

pub fn resolve_refresh_range(
    start_arg: Option<&str>,
    end_arg: Option<&str>,
    now_utc: DateTime<Utc>,
) -> anyhow::Result<DateRange> {
    let start = match start_arg {
        Some(s) => parse_date(s)?,
        None => {
            let (y, m, d) = DEFAULT_HISTORY_START;
            NaiveDate::from_ymd_opt(y, m, d).context("invalid default start date")?
        }
    };
    let end = match end_arg {
        Some(s) => parse_date(s)?,
        None => now_utc.date_naive(),
    };
    DateRange::new(start, end)
}
