use crate::analysis::{AnalyticalRow, TrendSignal};
use crate::domain::price::normalize_ticker;
use crate::domain::ticker::Sector;
use anyhow::Context;
use chrono::NaiveDate;
use serde::Deserialize;

pub const DEFAULT_LIMIT: i64 = 1_000;
pub const MAX_LIMIT: i64 = 10_000;

const VIEW_COLUMNS: &str = "ticker, trade_date, company_name, sector, open, high, low, close, volume, \
     daily_return_pct, sma_50, sma_200, trend_signal, high_52wk, pct_from_52wk_high, volatility_20d";

/// Projection filters on `v_stock_analysis`. Date bounds are inclusive.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisFilter {
    pub ticker: Option<String>,
    pub sector: Option<Sector>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub limit: Option<i64>,
}

impl AnalysisFilter {
    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ViewRow {
    ticker: String,
    trade_date: NaiveDate,
    company_name: Option<String>,
    sector: Option<String>,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: f64,
    volume: i64,
    daily_return_pct: Option<f64>,
    sma_50: Option<f64>,
    sma_200: Option<f64>,
    trend_signal: Option<String>,
    high_52wk: f64,
    pct_from_52wk_high: f64,
    volatility_20d: Option<f64>,
}

impl TryFrom<ViewRow> for AnalyticalRow {
    type Error = anyhow::Error;

    fn try_from(r: ViewRow) -> anyhow::Result<Self> {
        let sector = r.sector.as_deref().map(str::parse::<Sector>).transpose()?;
        let trend_signal = r
            .trend_signal
            .as_deref()
            .map(str::parse::<TrendSignal>)
            .transpose()?;

        Ok(AnalyticalRow {
            ticker: r.ticker,
            trade_date: r.trade_date,
            company_name: r.company_name,
            sector,
            open: r.open,
            high: r.high,
            low: r.low,
            close: r.close,
            volume: r.volume,
            daily_return_pct: r.daily_return_pct,
            sma_50: r.sma_50,
            sma_200: r.sma_200,
            trend_signal,
            high_52wk: r.high_52wk,
            pct_from_52wk_high: r.pct_from_52wk_high,
            volatility_20d: r.volatility_20d,
        })
    }
}

pub async fn query_analysis(
    pool: &sqlx::PgPool,
    filter: &AnalysisFilter,
) -> anyhow::Result<Vec<AnalyticalRow>> {
    if let (Some(from), Some(to)) = (filter.from, filter.to) {
        anyhow::ensure!(from <= to, "from ({from}) must not be after to ({to})");
    }

    let mut qb = sqlx::QueryBuilder::<sqlx::Postgres>::new(format!(
        "SELECT {VIEW_COLUMNS} FROM v_stock_analysis WHERE TRUE"
    ));
    if let Some(ticker) = filter.ticker.as_deref() {
        qb.push(" AND ticker = ").push_bind(normalize_ticker(ticker));
    }
    if let Some(sector) = filter.sector {
        qb.push(" AND sector = ").push_bind(sector.as_str());
    }
    if let Some(from) = filter.from {
        qb.push(" AND trade_date >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        qb.push(" AND trade_date <= ").push_bind(to);
    }
    qb.push(" ORDER BY ticker ASC, trade_date ASC LIMIT ")
        .push_bind(filter.effective_limit());

    let rows = qb
        .build_query_as::<ViewRow>()
        .persistent(false)
        .fetch_all(pool)
        .await
        .context("select v_stock_analysis failed")?;

    rows.into_iter().map(AnalyticalRow::try_from).collect()
}

pub async fn latest_for_ticker(
    pool: &sqlx::PgPool,
    ticker: &str,
) -> anyhow::Result<Option<AnalyticalRow>> {
    let sql = format!(
        "SELECT {VIEW_COLUMNS} FROM v_stock_analysis \
         WHERE ticker = $1 \
         ORDER BY trade_date DESC \
         LIMIT 1"
    );
    let row = sqlx::query_as::<_, ViewRow>(&sql)
        .persistent(false)
        .bind(normalize_ticker(ticker))
        .fetch_optional(pool)
        .await
        .with_context(|| format!("select latest v_stock_analysis row for {ticker} failed"))?;

    row.map(AnalyticalRow::try_from).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_clamped() {
        let mut f = AnalysisFilter::default();
        assert_eq!(f.effective_limit(), DEFAULT_LIMIT);
        f.limit = Some(0);
        assert_eq!(f.effective_limit(), 1);
        f.limit = Some(1_000_000);
        assert_eq!(f.effective_limit(), MAX_LIMIT);
    }

    #[test]
    fn view_rows_convert_into_analytical_rows() {
        let row = ViewRow {
            ticker: "AAPL".to_string(),
            trade_date: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
            company_name: Some("Apple Inc.".to_string()),
            sector: Some("Information Technology".to_string()),
            open: None,
            high: None,
            low: None,
            close: 190.0,
            volume: 10,
            daily_return_pct: Some(1.5),
            sma_50: Some(180.0),
            sma_200: Some(170.0),
            trend_signal: Some("Bullish".to_string()),
            high_52wk: 200.0,
            pct_from_52wk_high: -5.0,
            volatility_20d: None,
        };
        let out = AnalyticalRow::try_from(row).unwrap();
        assert_eq!(out.sector, Some(Sector::InformationTechnology));
        assert_eq!(out.trend_signal, Some(TrendSignal::Bullish));
    }

    #[test]
    fn filter_deserializes_from_query_shaped_json() {
        let f: AnalysisFilter = serde_json::from_value(serde_json::json!({
            "ticker": "msft",
            "sector": "Information Technology",
            "from": "2024-01-01",
            "limit": 50
        }))
        .unwrap();
        assert_eq!(f.sector, Some(Sector::InformationTechnology));
        assert_eq!(f.from, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(f.to, None);
    }
}
