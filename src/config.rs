use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::{AppError, Result};
use crate::types::Market;

pub const RAINFOREST_API_URL: &str = "https://api.rainforestapi.com/request";
pub const EXCHANGE_RATE_API_URL: &str = "https://api.exchangerate.host/latest";

pub const USER_AGENT: &str = "Mozilla/5.0 (compatible; PriceTracker/1.0)";

/// Per-request timeout for storefront lookups (seconds).
pub const FETCH_TIMEOUT_SECS: u64 = 30;

/// Per-request timeout for currency rate lookups (seconds).
pub const RATE_TIMEOUT_SECS: u64 = 10;

/// Per-request timeout for webhook delivery (seconds).
pub const SINK_TIMEOUT_SECS: u64 = 20;

/// Courtesy delay after each fetch and each delivered notification.
pub const FETCH_THROTTLE_MS: u64 = 1000;

/// Datapoints kept per product per market.
pub const HISTORY_KEEP: usize = 10;

/// Embed limits enforced by the webhook target.
pub mod digest_limits {
    pub const SECTION_NAME_MAX: usize = 256;
    pub const SECTION_BODY_MAX: usize = 1024;
    pub const MAX_SECTIONS: usize = 25;
}

/// Embed colours per severity.
pub mod colors {
    pub const DECREASE: u32 = 0x2ECC71;
    pub const NEUTRAL: u32 = 0x95A5A6;
    pub const INCREASE: u32 = 0xE74C3C;
}

/// Storefronts tracked for every product. Order is the tie-break order for
/// cheapest / biggest-drop selection.
pub fn default_markets() -> Vec<Market> {
    vec![
        Market::new("sa", "amazon.sa", "Amazon.sa", "SAR"),
        Market::new("us", "amazon.com", "Amazon.com", "USD"),
        Market::new("uk", "amazon.co.uk", "Amazon.co.uk", "GBP"),
    ]
}

/// Command-line flags.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about = "Multi-storefront price tracker", long_about = None)]
pub struct Cli {
    /// Send a test notification and exit
    #[arg(long)]
    pub test: bool,

    /// Send a single digest notification instead of one per product
    #[arg(long)]
    pub digest: bool,

    /// Annotate prices with conversions into the target currency
    #[arg(long)]
    pub convert: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Storefront API credential (RAINFOREST_KEY)
    pub api_key: String,
    /// Webhook notification target (DISCORD_WEBHOOK)
    pub webhook_url: String,
    pub log_level: String,
    pub products_path: PathBuf,
    pub previous_path: PathBuf,
    pub history_path: PathBuf,
    pub history_keep: usize,
    pub markets: Vec<Market>,
    /// Market whose link, image, title and history lead every notification (PRIMARY_MARKET)
    pub primary_market: String,
    /// Currency conversions are expressed in (TARGET_CURRENCY)
    pub target_currency: String,
    pub throttle: Duration,
    pub test: bool,
    pub digest: bool,
    pub convert: bool,
}

impl Config {
    pub fn from_env(cli: &Cli) -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(cli, |key| vars.get(key).cloned())
    }

    pub fn from_vars<F>(cli: &Cli, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AppError::Config(format!("{key} must be set")))
        };

        let api_key = required("RAINFOREST_KEY")?;
        let webhook_url = required("DISCORD_WEBHOOK")?;

        let markets = default_markets();

        let primary_market = lookup("PRIMARY_MARKET")
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| markets[0].code.clone());
        let primary = markets
            .iter()
            .find(|m| m.code == primary_market)
            .ok_or_else(|| {
                AppError::Config(format!("PRIMARY_MARKET '{primary_market}' is not a tracked market"))
            })?;

        let target_currency = lookup("TARGET_CURRENCY")
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| primary.currency.clone());

        let history_keep = match lookup("HISTORY_KEEP") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| AppError::Config("HISTORY_KEEP must be a positive integer".to_string()))?,
            None => HISTORY_KEEP,
        };

        let throttle_ms = lookup("FETCH_THROTTLE_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(FETCH_THROTTLE_MS);

        Ok(Self {
            api_key,
            webhook_url,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            products_path: lookup("PRODUCTS_PATH")
                .unwrap_or_else(|| "products.csv".to_string())
                .into(),
            previous_path: lookup("PREVIOUS_PRICES_PATH")
                .unwrap_or_else(|| "previous_prices.json".to_string())
                .into(),
            history_path: lookup("PRICE_HISTORY_PATH")
                .unwrap_or_else(|| "price_history.json".to_string())
                .into(),
            history_keep,
            markets,
            primary_market,
            target_currency,
            throttle: Duration::from_millis(throttle_ms),
            test: cli.test,
            digest: cli.digest,
            convert: cli.convert,
        })
    }

    pub fn primary(&self) -> Option<&Market> {
        self.markets.iter().find(|m| m.code == self.primary_market)
    }

    /// Currencies that need a rate into the target currency.
    pub fn source_currencies(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for market in &self.markets {
            if market.currency != self.target_currency && !out.contains(&market.currency) {
                out.push(market.currency.clone());
            }
        }
        out
    }
}
