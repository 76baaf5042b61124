use crate::ingest::types::RawBar;
use crate::time::range::DateRange;
use anyhow::Result;
use serde::Serialize;
use std::fmt;

#[async_trait::async_trait]
pub trait PriceHistoryProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Daily bars for `ticker` within `range`. An empty vec means the provider had no data.
    async fn fetch_daily_history(&self, ticker: &str, range: DateRange) -> Result<Vec<RawBar>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    NoData,
    RateLimited,
    Transport,
    Http,
    Parse,
    Other,
}

impl ProviderErrorKind {
    /// Classifies an error returned by a provider; errors that carry no `ProviderError` are `Other`.
    pub fn of(err: &anyhow::Error) -> Self {
        err.downcast_ref::<ProviderError>()
            .map(|e| e.kind)
            .unwrap_or(ProviderErrorKind::Other)
    }
}

#[derive(Debug, Clone)]
pub struct ProviderError {
    pub provider: &'static str,
    pub kind: ProviderErrorKind,
    pub ticker: String,
    pub detail: String,
}

impl ProviderError {
    pub fn new(
        provider: &'static str,
        kind: ProviderErrorKind,
        ticker: &str,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            kind,
            ticker: ticker.to_string(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "provider error (provider={}, kind={:?}, ticker={}): {}",
            self.provider, self.kind, self.ticker, self.detail
        )
    }
}

impl std::error::Error for ProviderError {}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn classifies_through_context_layers() {
        let err = anyhow::Error::new(ProviderError::new(
            "yahoo_chart",
            ProviderErrorKind::RateLimited,
            "AAPL",
            "HTTP 429",
        ));
        let wrapped = Err::<(), _>(err).context("fetch failed").unwrap_err();
        assert_eq!(ProviderErrorKind::of(&wrapped), ProviderErrorKind::RateLimited);
        assert!(format!("{wrapped:#}").contains("ticker=AAPL"));
    }

    #[test]
    fn untyped_errors_are_other() {
        let err = anyhow::anyhow!("boom");
        assert_eq!(ProviderErrorKind::of(&err), ProviderErrorKind::Other);
    }
}
