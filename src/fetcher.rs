use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{Config, FETCH_TIMEOUT_SECS, RAINFOREST_API_URL, USER_AGENT};
use crate::error::{AppError, Result};
use crate::types::MarketInfo;

/// Looks up one product on one storefront.
///
/// Implementations never fail past this boundary: any error is logged and
/// reported as `MarketInfo::default()`.
#[async_trait]
pub trait MarketInfoFetcher: Send + Sync {
    async fn fetch(&self, product_id: &str, market_domain: &str) -> MarketInfo;
}

/// Rainforest product API client.
pub struct RainforestFetcher {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RainforestFetcher {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url: RAINFOREST_API_URL.to_string(),
            api_key: cfg.api_key.clone(),
        })
    }

    async fn try_fetch(&self, product_id: &str, market_domain: &str) -> Result<MarketInfo> {
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("type", "product"),
                ("amazon_domain", market_domain),
                ("asin", product_id),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: serde_json::Value = resp.json().await?;
        let product = body
            .get("product")
            .ok_or_else(|| AppError::Fetch("response has no product object".to_string()))?;
        Ok(parse_product(product))
    }
}

#[async_trait]
impl MarketInfoFetcher for RainforestFetcher {
    async fn fetch(&self, product_id: &str, market_domain: &str) -> MarketInfo {
        match self.try_fetch(product_id, market_domain).await {
            Ok(info) => {
                debug!(product = product_id, market = market_domain, price = ?info.price, "fetched");
                info
            }
            Err(e) => {
                warn!(product = product_id, market = market_domain, "fetch error {product_id} @ {market_domain}: {e}");
                MarketInfo::default()
            }
        }
    }
}

/// Extract a `MarketInfo` from a Rainforest `product` object.
/// Price prefers the buy-box winner and falls back to the first offer.
pub fn parse_product(v: &serde_json::Value) -> MarketInfo {
    let (price, currency) = pick_price(v);

    MarketInfo {
        price,
        currency,
        title: str_field(v, "title"),
        link: str_field(v, "link"),
        image: link_field(v.get("image")).or_else(|| link_field(v.get("main_image"))),
        availability: v
            .get("availability")
            .and_then(|a| a.as_str().or_else(|| a.get("raw").and_then(|r| r.as_str())))
            .map(|s| s.to_string())
            .or_else(|| str_field(v, "availability_type")),
        rating: v.get("rating").and_then(as_number),
        review_count: v.get("ratings_total").and_then(|r| r.as_u64()),
    }
}

fn pick_price(v: &serde_json::Value) -> (Option<f64>, Option<String>) {
    let from_block = |block: Option<&serde_json::Value>| {
        let price = block?.get("price")?;
        let value = price.get("value").and_then(as_number)?;
        let currency = price
            .get("currency")
            .and_then(|c| c.as_str())
            .map(|s| s.to_string());
        Some((value, currency))
    };

    let buybox = from_block(v.get("buybox_winner"));
    let first_offer = || {
        from_block(
            v.get("offers")
                .and_then(|o| o.as_array())
                .and_then(|a| a.first()),
        )
    };

    match buybox.or_else(first_offer) {
        Some((price, currency)) => (Some(price), currency),
        None => (None, None),
    }
}

/// Numbers sometimes arrive as strings. Non-finite values are rejected.
fn as_number(v: &serde_json::Value) -> Option<f64> {
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
        .filter(|n: &f64| n.is_finite())
}

fn str_field(v: &serde_json::Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(|s| s.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Accepts either a bare URL string or an object carrying a `link`.
fn link_field(v: Option<&serde_json::Value>) -> Option<String> {
    let v = v?;
    v.as_str()
        .or_else(|| v.get("link").and_then(|l| l.as_str()))
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}
