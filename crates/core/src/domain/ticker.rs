use anyhow::ensure;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::price::normalize_ticker;

/// GICS sectors. Stored as their display name; the table carries a matching CHECK constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Sector {
    InformationTechnology,
    CommunicationServices,
    ConsumerDiscretionary,
    ConsumerStaples,
    Energy,
    Financials,
    HealthCare,
    Industrials,
    Materials,
    RealEstate,
    Utilities,
}

impl Sector {
    pub const ALL: [Sector; 11] = [
        Sector::InformationTechnology,
        Sector::CommunicationServices,
        Sector::ConsumerDiscretionary,
        Sector::ConsumerStaples,
        Sector::Energy,
        Sector::Financials,
        Sector::HealthCare,
        Sector::Industrials,
        Sector::Materials,
        Sector::RealEstate,
        Sector::Utilities,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sector::InformationTechnology => "Information Technology",
            Sector::CommunicationServices => "Communication Services",
            Sector::ConsumerDiscretionary => "Consumer Discretionary",
            Sector::ConsumerStaples => "Consumer Staples",
            Sector::Energy => "Energy",
            Sector::Financials => "Financials",
            Sector::HealthCare => "Health Care",
            Sector::Industrials => "Industrials",
            Sector::Materials => "Materials",
            Sector::RealEstate => "Real Estate",
            Sector::Utilities => "Utilities",
        }
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sector {
    type Err = anyhow::Error;

    // Case-insensitive; also accepts "information_technology" style spellings.
    fn from_str(s: &str) -> anyhow::Result<Self> {
        let wanted: String = s
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        Sector::ALL
            .into_iter()
            .find(|sector| {
                let name: String = sector
                    .as_str()
                    .chars()
                    .filter(|c| c.is_ascii_alphanumeric())
                    .collect();
                name.to_ascii_lowercase() == wanted
            })
            .ok_or_else(|| anyhow::anyhow!("unknown sector: {s:?}"))
    }
}

impl TryFrom<String> for Sector {
    type Error = anyhow::Error;

    fn try_from(value: String) -> anyhow::Result<Self> {
        value.parse()
    }
}

impl From<Sector> for String {
    fn from(value: Sector) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerMetadata {
    pub ticker: String,
    pub company_name: String,
    pub sector: Sector,
}

impl TickerMetadata {
    pub fn new(ticker: &str, company_name: &str, sector: Sector) -> Self {
        Self {
            ticker: normalize_ticker(ticker),
            company_name: company_name.trim().to_string(),
            sector,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.ticker.is_empty(), "ticker must be non-empty");
        ensure!(
            self.ticker == normalize_ticker(&self.ticker),
            "ticker must be trimmed upper-case (got {:?})",
            self.ticker
        );
        ensure!(
            !self.company_name.trim().is_empty(),
            "company_name must be non-empty for {}",
            self.ticker
        );
        Ok(())
    }
}
