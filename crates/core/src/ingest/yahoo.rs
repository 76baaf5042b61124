use crate::config::Settings;
use crate::ingest::provider::{PriceHistoryProvider, ProviderError, ProviderErrorKind};
use crate::ingest::types::{ChartResponse, RawBar};
use crate::time::range::DateRange;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use reqwest::StatusCode;
use std::time::Duration;

const PROVIDER_NAME: &str = "yahoo_chart";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const USER_AGENT: &str = "Mozilla/5.0 (compatible; stockview/0.1)";

#[derive(Debug, Clone)]
pub struct YahooChartClient {
    http: reqwest::Client,
    base_url: String,
}

impl YahooChartClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(settings.price_provider_base_url())
    }

    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build price provider http client")?;

        Ok(Self {
            http,
            base_url: base_url.to_string(),
        })
    }

    async fn fetch_chart(&self, ticker: &str, range: DateRange) -> Result<Vec<RawBar>> {
        let err = |kind, detail: String| ProviderError::new(PROVIDER_NAME, kind, ticker, detail);

        let url = chart_url(&self.base_url, ticker, range)?;
        let res = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| err(ProviderErrorKind::Transport, e.to_string()))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| err(ProviderErrorKind::Transport, e.to_string()))?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(err(ProviderErrorKind::RateLimited, format!("HTTP {status}")).into());
        }

        let parsed = serde_json::from_str::<ChartResponse>(&text);
        if !status.is_success() {
            // Unknown symbols come back as 404 with a chart error body.
            let kind = if status == StatusCode::NOT_FOUND {
                ProviderErrorKind::NoData
            } else {
                ProviderErrorKind::Http
            };
            let detail = match &parsed {
                Ok(body) => body
                    .chart
                    .error
                    .as_ref()
                    .map(|e| {
                        format!(
                            "HTTP {status}: {} {}",
                            e.code,
                            e.description.as_deref().unwrap_or("")
                        )
                    })
                    .unwrap_or_else(|| format!("HTTP {status}")),
                Err(_) => format!("HTTP {status}: {}", truncate(&text, 200)),
            };
            return Err(err(kind, detail).into());
        }

        let body = parsed.map_err(|e| err(ProviderErrorKind::Parse, e.to_string()))?;
        bars_from_chart(body).map_err(|e| err(ProviderErrorKind::Parse, e.to_string()).into())
    }
}

#[async_trait::async_trait]
impl PriceHistoryProvider for YahooChartClient {
    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn fetch_daily_history(&self, ticker: &str, range: DateRange) -> Result<Vec<RawBar>> {
        self.fetch_chart(ticker, range).await
    }
}

/// Daily chart url. `period2` is exclusive, so it points at midnight after `range.end`.
pub fn chart_url(base_url: &str, ticker: &str, range: DateRange) -> Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(base_url.trim_end_matches('/'))
        .with_context(|| format!("invalid price provider base url: {base_url}"))?;

    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("price provider base url cannot have a path: {base_url}"))?
        .pop_if_empty()
        .extend(["v8", "finance", "chart", ticker.trim()]);

    let period1 = midnight_utc(range.start)?;
    let period2 = midnight_utc(range.end + ChronoDuration::days(1))?;
    url.query_pairs_mut()
        .append_pair("period1", &period1.to_string())
        .append_pair("period2", &period2.to_string())
        .append_pair("interval", "1d")
        .append_pair("events", "history")
        .append_pair("includeAdjustedClose", "true");

    Ok(url)
}

fn midnight_utc(date: NaiveDate) -> Result<i64> {
    Ok(date
        .and_hms_opt(0, 0, 0)
        .context("invalid midnight")?
        .and_utc()
        .timestamp())
}

/// Flattens the column-oriented chart payload into bars. A result without timestamps is "no data".
pub fn bars_from_chart(body: ChartResponse) -> Result<Vec<RawBar>> {
    if let Some(error) = &body.chart.error {
        anyhow::bail!(
            "chart error {}: {}",
            error.code,
            error.description.as_deref().unwrap_or("")
        );
    }

    let Some(result) = body.chart.result.and_then(|r| r.into_iter().next()) else {
        return Ok(Vec::new());
    };
    if result.timestamp.is_empty() {
        return Ok(Vec::new());
    }

    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let offset = result.meta.gmtoffset;
    let pick = |col: &Vec<Option<f64>>, i: usize| col.get(i).copied().flatten();

    let bars = result
        .timestamp
        .iter()
        .enumerate()
        .map(|(i, &ts)| RawBar {
            trade_date: ts
                .checked_add(offset)
                .and_then(|local| DateTime::<Utc>::from_timestamp(local, 0))
                .map(|dt| dt.date_naive()),
            open: pick(&quote.open, i),
            high: pick(&quote.high, i),
            low: pick(&quote.low, i),
            close: pick(&quote.close, i),
            volume: quote.volume.get(i).copied().flatten(),
        })
        .collect();

    Ok(bars)
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn builds_chart_url_with_exclusive_end() {
        let range = DateRange::new(d(2024, 1, 2), d(2024, 1, 5)).unwrap();
        let url = chart_url("https://query1.finance.yahoo.com/", "AAPL", range).unwrap();
        assert_eq!(url.path(), "/v8/finance/chart/AAPL");

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("period1".into(), "1704153600".into())));
        // 2024-01-06T00:00:00Z
        assert!(pairs.contains(&("period2".into(), "1704499200".into())));
        assert!(pairs.contains(&("interval".into(), "1d".into())));
    }

    #[test]
    fn converts_session_timestamps_with_exchange_offset() {
        // 2024-01-02 14:30 UTC is 09:30 New York; -18000s keeps it on the 2nd.
        let v = json!({
            "chart": {
                "result": [{
                    "meta": {"symbol": "AAPL", "gmtoffset": -18000},
                    "timestamp": [1704205800, 1704292200],
                    "indicators": {"quote": [{
                        "open": [187.15, 184.22],
                        "high": [188.44, 185.88],
                        "low": [183.89, 183.43],
                        "close": [185.64, null],
                        "volume": [82488700, 58414500]
                    }]}
                }],
                "error": null
            }
        });

        let body: ChartResponse = serde_json::from_value(v).unwrap();
        let bars = bars_from_chart(body).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].trade_date, Some(d(2024, 1, 2)));
        assert_eq!(bars[0].close, Some(185.64));
        assert_eq!(bars[0].volume, Some(82_488_700));
        assert_eq!(bars[1].trade_date, Some(d(2024, 1, 3)));
        assert_eq!(bars[1].close, None);
    }

    #[test]
    fn empty_result_is_no_data() {
        let v = json!({
            "chart": {
                "result": [{"meta": {"gmtoffset": 0}, "indicators": {"quote": [{}]}}],
                "error": null
            }
        });
        let body: ChartResponse = serde_json::from_value(v).unwrap();
        assert!(bars_from_chart(body).unwrap().is_empty());
    }

    #[test]
    fn short_columns_yield_missing_fields() {
        let v = json!({
            "chart": {"result": [{
                "meta": {"gmtoffset": 0},
                "timestamp": [1704153600, 1704240000],
                "indicators": {"quote": [{"close": [10.0], "volume": [5]}]}
            }]}
        });
        let body: ChartResponse = serde_json::from_value(v).unwrap();
        let bars = bars_from_chart(body).unwrap();
        assert_eq!(bars[1].close, None);
        assert_eq!(bars[1].volume, None);
        assert_eq!(bars[0].open, None);
    }

    #[test]
    fn chart_error_body_is_an_error() {
        let v = json!({
            "chart": {
                "result": null,
                "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}
            }
        });
        let body: ChartResponse = serde_json::from_value(v).unwrap();
        let err = bars_from_chart(body).unwrap_err();
        assert!(err.to_string().contains("Not Found"));
    }
}
