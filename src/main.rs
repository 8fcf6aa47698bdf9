mod aggregator;
mod config;
mod detector;
mod error;
mod fetcher;
mod latency;
mod notify;
mod products;
mod rates;
mod sparkline;
mod state;
mod tracker;
mod types;

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{Cli, Config};
use crate::error::Result;
use crate::fetcher::RainforestFetcher;
use crate::notify::DiscordWebhook;
use crate::products::load_products;
use crate::rates::{ExchangeRateHost, RateLookup};
use crate::tracker::{NoRates, Tracker};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Credential and webhook are checked here, before anything is fetched.
    let cfg = match Config::from_env(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let fetcher = Arc::new(RainforestFetcher::new(&cfg)?);
    let sink = Arc::new(DiscordWebhook::new(&cfg.webhook_url)?);
    let rates: Arc<dyn RateLookup> = if cfg.convert {
        Arc::new(ExchangeRateHost::new()?)
    } else {
        Arc::new(NoRates)
    };

    let primary = cfg.primary().map(|m| m.label.clone()).unwrap_or_default();
    info!(
        markets = cfg.markets.len(),
        primary = %primary,
        digest = cfg.digest,
        convert = cfg.convert,
        "Tracking {} markets (primary: {primary}, target currency: {})",
        cfg.markets.len(),
        cfg.target_currency,
    );

    let tracker = Tracker::new(cfg.clone(), fetcher, rates, sink);

    if cfg.test {
        tracker.send_test().await;
        return Ok(());
    }

    let products = load_products(&cfg.products_path);
    let summary = tracker.run(&products).await;

    if summary.notifications_sent > 0 {
        info!("Updates sent.");
    } else if summary.notifications_failed > 0 {
        info!("No updates could be sent (delivery failures).");
    }
    Ok(())
}
