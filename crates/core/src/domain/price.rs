use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One daily OHLCV row of the raw price store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub ticker: String,
    pub trade_date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: f64,
    pub volume: i64,
}

impl PriceRecord {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.ticker.trim().is_empty(), "ticker must be non-empty");
        anyhow::ensure!(
            self.close.is_finite() && self.close > 0.0,
            "close must be a positive number (got {})",
            self.close
        );
        anyhow::ensure!(
            self.volume >= 0,
            "volume must be non-negative (got {})",
            self.volume
        );
        Ok(())
    }
}

/// Cleaned history of one ticker, ordered by trade date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistory {
    pub ticker: String,
    pub records: Vec<PriceRecord>,
}

impl PriceHistory {
    pub fn validate(&self) -> anyhow::Result<()> {
        for record in &self.records {
            anyhow::ensure!(
                record.ticker == self.ticker,
                "record for {} found in history of {}",
                record.ticker,
                self.ticker
            );
            record.validate()?;
        }
        anyhow::ensure!(
            self.records
                .windows(2)
                .all(|w| w[0].trade_date < w[1].trade_date),
            "history of {} must be strictly ordered by trade_date",
            self.ticker
        );
        Ok(())
    }
}

/// Normalizes a ticker symbol as stored in both tables.
pub fn normalize_ticker(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(close: f64, volume: i64) -> PriceRecord {
        PriceRecord {
            ticker: "AAPL".to_string(),
            trade_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            open: None,
            high: None,
            low: None,
            close,
            volume,
        }
    }

    #[test]
    fn accepts_positive_close_and_zero_volume() {
        assert!(record(101.5, 0).validate().is_ok());
    }

    #[test]
    fn rejects_bad_close_and_volume() {
        assert!(record(0.0, 10).validate().is_err());
        assert!(record(-3.0, 10).validate().is_err());
        assert!(record(f64::NAN, 10).validate().is_err());
        assert!(record(10.0, -1).validate().is_err());
    }

    #[test]
    fn history_rejects_foreign_or_duplicate_rows() {
        let mut history = PriceHistory {
            ticker: "AAPL".to_string(),
            records: vec![record(1.0, 1), record(2.0, 1)],
        };
        assert!(history.validate().is_err());

        history.records[1].trade_date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        assert!(history.validate().is_ok());

        history.records[1].ticker = "MSFT".to_string();
        assert!(history.validate().is_err());
    }

    #[test]
    fn normalizes_symbols() {
        assert_eq!(normalize_ticker(" msft "), "MSFT");
        assert_eq!(normalize_ticker("brk-b"), "BRK-B");
    }
}
