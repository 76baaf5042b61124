use anyhow::Context;
use std::path::Path;
use stockview_core::domain::ticker::{Sector, TickerMetadata};

/// The ten technology names tracked out of the box.
pub fn default_universe() -> Vec<TickerMetadata> {
    [
        ("AAPL", "Apple Inc.", Sector::InformationTechnology),
        ("MSFT", "Microsoft Corporation", Sector::InformationTechnology),
        ("NVDA", "NVIDIA Corporation", Sector::InformationTechnology),
        ("AMD", "Advanced Micro Devices, Inc.", Sector::InformationTechnology),
        ("ORCL", "Oracle Corporation", Sector::InformationTechnology),
        ("GOOGL", "Alphabet Inc.", Sector::CommunicationServices),
        ("META", "Meta Platforms, Inc.", Sector::CommunicationServices),
        ("NFLX", "Netflix, Inc.", Sector::CommunicationServices),
        ("AMZN", "Amazon.com, Inc.", Sector::ConsumerDiscretionary),
        ("TSLA", "Tesla, Inc.", Sector::ConsumerDiscretionary),
    ]
    .into_iter()
    .map(|(ticker, name, sector)| TickerMetadata::new(ticker, name, sector))
    .collect()
}

/// Reads a JSON array of `{ticker, company_name, sector}` objects.
pub fn load_universe_file(path: &Path) -> anyhow::Result<Vec<TickerMetadata>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_universe(&text).with_context(|| format!("invalid universe file {}", path.display()))
}

fn parse_universe(text: &str) -> anyhow::Result<Vec<TickerMetadata>> {
    let items: Vec<TickerMetadata> = serde_json::from_str(text)?;
    anyhow::ensure!(!items.is_empty(), "universe must list at least one ticker");

    let items: Vec<TickerMetadata> = items
        .into_iter()
        .map(|m| TickerMetadata::new(&m.ticker, &m.company_name, m.sector))
        .collect();
    for item in &items {
        item.validate()?;
    }
    Ok(items)
}
