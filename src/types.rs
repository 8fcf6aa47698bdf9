use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::colors;

// ---------------------------------------------------------------------------
// Product / Market
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub id: String,
    pub title_hint: Option<String>,
}

impl Product {
    pub fn new(id: &str, title_hint: &str) -> Self {
        Self {
            id: id.to_string(),
            title_hint: Some(title_hint.to_string()),
        }
    }

    /// Best human-readable name available before any fetch.
    pub fn display_name(&self) -> &str {
        self.title_hint.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Market {
    pub code: String,
    pub domain: String,
    pub label: String,
    pub currency: String,
}

impl Market {
    pub fn new(code: &str, domain: &str, label: &str, currency: &str) -> Self {
        Self {
            code: code.to_string(),
            domain: domain.to_string(),
            label: label.to_string(),
            currency: currency.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-run observation
// ---------------------------------------------------------------------------

/// What one storefront reported for one product this run.
/// `MarketInfo::default()` is the all-absent record used on fetch failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketInfo {
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub image: Option<String>,
    pub availability: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<u64>,
}

// ---------------------------------------------------------------------------
// Persisted state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub price: Option<f64>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    #[serde(rename = "t", deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "p")]
    pub price: f64,
}

/// Accepts RFC 3339 as well as naive `YYYY-MM-DDTHH:MM:SS[.f]` stamps, read as UTC.
fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

// ---------------------------------------------------------------------------
// Aggregation inputs / outputs
// ---------------------------------------------------------------------------

/// One market's current observation alongside the stored previous record.
#[derive(Debug, Clone)]
pub struct MarketQuote {
    pub market: Market,
    pub info: MarketInfo,
    pub previous: Option<PriceRecord>,
}

impl MarketQuote {
    pub fn current_price(&self) -> Option<f64> {
        self.info.price
    }

    pub fn previous_price(&self) -> Option<f64> {
        self.previous.as_ref().and_then(|r| r.price)
    }

    /// Reported currency, falling back to the market default.
    pub fn currency(&self) -> &str {
        self.info.currency.as_deref().unwrap_or(&self.market.currency)
    }

    /// Both prices present and current strictly below previous.
    pub fn dropped(&self) -> bool {
        matches!((self.previous_price(), self.current_price()), (Some(p), Some(c)) if c < p)
    }

    /// Both prices present and current strictly above previous.
    pub fn rose(&self) -> bool {
        matches!((self.previous_price(), self.current_price()), (Some(p), Some(c)) if c > p)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceDrop {
    pub market_code: String,
    /// Always negative.
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cheapest {
    pub market_code: String,
    pub label: String,
    pub price: f64,
    pub currency: String,
}

/// Everything the composer needs about one changed product.
#[derive(Debug, Clone)]
pub struct ProductUpdate {
    pub product: Product,
    pub title: String,
    /// One entry per tracked market, in market order.
    pub quotes: Vec<MarketQuote>,
    /// Primary-market price history after this run's append.
    pub primary_history: Vec<f64>,
}

impl ProductUpdate {
    pub fn quote(&self, market_code: &str) -> Option<&MarketQuote> {
        self.quotes.iter().find(|q| q.market.code == market_code)
    }
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// At least one market dropped.
    Decrease,
    /// No market moved between two known prices.
    Neutral,
    /// Something rose and nothing dropped.
    Increase,
}

impl Severity {
    pub fn from_quotes(quotes: &[MarketQuote]) -> Self {
        if quotes.iter().any(MarketQuote::dropped) {
            Severity::Decrease
        } else if quotes.iter().any(MarketQuote::rose) {
            Severity::Increase
        } else {
            Severity::Neutral
        }
    }

    pub fn color(self) -> u32 {
        match self {
            Severity::Decrease => colors::DECREASE,
            Severity::Neutral => colors::NEUTRAL,
            Severity::Increase => colors::INCREASE,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Decrease => "decrease",
            Severity::Neutral => "neutral",
            Severity::Increase => "increase",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Outbound notification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub title: String,
    pub url: Option<String>,
    pub description: String,
    pub color: u32,
    pub timestamp: DateTime<Utc>,
    pub sections: Vec<Section>,
    pub thumbnail: Option<String>,
    pub footer: Option<String>,
}
