use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::{EXCHANGE_RATE_API_URL, RATE_TIMEOUT_SECS};
use crate::error::{AppError, Result};

/// Rates from source currencies into one target currency, fixed for a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateTable {
    pub target: String,
    rates: HashMap<String, f64>,
}

impl RateTable {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            rates: HashMap::new(),
        }
    }

    pub fn with_rate(mut self, currency: &str, rate: f64) -> Self {
        self.insert(currency, rate);
        self
    }

    pub fn insert(&mut self, currency: &str, rate: f64) {
        self.rates.insert(currency.to_string(), rate);
    }

    pub fn rate(&self, currency: &str) -> Option<f64> {
        self.rates.get(currency).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }
}

/// Supplies the per-run rate table. Never fails: a currency that cannot be
/// looked up is simply missing from the table.
#[async_trait]
pub trait RateLookup: Send + Sync {
    async fn rates(&self, sources: &[String], target: &str) -> RateTable;
}

/// exchangerate.host client, one request per source currency.
pub struct ExchangeRateHost {
    client: reqwest::Client,
    base_url: String,
}

impl ExchangeRateHost {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(RATE_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: EXCHANGE_RATE_API_URL.to_string(),
        })
    }

    async fn fetch_rate(&self, source: &str, target: &str) -> Result<f64> {
        let body: serde_json::Value = self
            .client
            .get(&self.base_url)
            .query(&[("base", source), ("symbols", target)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        body.get("rates")
            .and_then(|r| r.get(target))
            .and_then(|r| r.as_f64())
            .filter(|r| *r > 0.0)
            .ok_or_else(|| AppError::Conversion(format!("no {source}->{target} rate in response")))
    }
}

#[async_trait]
impl RateLookup for ExchangeRateHost {
    async fn rates(&self, sources: &[String], target: &str) -> RateTable {
        let mut table = RateTable::new(target);
        for source in sources {
            match self.fetch_rate(source, target).await {
                Ok(rate) => table.insert(source, rate),
                Err(e) => warn!(source = %source, target_currency = target, "Currency conversion error: {e}"),
            }
        }
        info!(target_currency = target, rates = table.len(), "Loaded {} conversion rates into {target}", table.len());
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_reports_known_rates_only() {
        let table = RateTable::new("SAR").with_rate("USD", 3.75);
        assert_eq!(table.rate("USD"), Some(3.75));
        assert_eq!(table.rate("GBP"), None);
        assert_eq!(table.len(), 1);
        assert!(!table.is_empty());
    }

    #[test]
    fn default_table_is_empty() {
        assert!(RateTable::default().is_empty());
    }
}
