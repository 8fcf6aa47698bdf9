use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::detector::{product_changed, quote_changed};
use crate::fetcher::MarketInfoFetcher;
use crate::latency::FetchLatency;
use crate::notify::{test_notification, Composer, NotificationSink};
use crate::rates::{RateLookup, RateTable};
use crate::state::PriceStateStore;
use crate::types::{MarketQuote, Notification, Product, ProductUpdate, Severity};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub products_checked: usize,
    pub products_changed: usize,
    /// Market lookups that came back without a price.
    pub missing_prices: usize,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
    pub state_committed: bool,
}

/// One sequential pass over every product and market.
pub struct Tracker {
    cfg: Config,
    fetcher: Arc<dyn MarketInfoFetcher>,
    rates: Arc<dyn RateLookup>,
    sink: Arc<dyn NotificationSink>,
}

impl Tracker {
    pub fn new(
        cfg: Config,
        fetcher: Arc<dyn MarketInfoFetcher>,
        rates: Arc<dyn RateLookup>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self { cfg, fetcher, rates, sink }
    }

    /// Deliver the `--test` notification. Returns whether it was accepted.
    pub async fn send_test(&self) -> bool {
        match self.sink.deliver(&test_notification(Utc::now())).await {
            Ok(()) => {
                info!("Test notification sent.");
                true
            }
            Err(e) => {
                error!("Test notification failed: {e}");
                false
            }
        }
    }

    pub async fn run(&self, products: &[Product]) -> RunSummary {
        let mut summary = RunSummary::default();
        let mut store = PriceStateStore::load(
            &self.cfg.previous_path,
            &self.cfg.history_path,
            self.cfg.history_keep,
        );

        let rates = if self.cfg.convert {
            let sources = self.cfg.source_currencies();
            let table = self.rates.rates(&sources, &self.cfg.target_currency).await;
            if table.is_empty() {
                warn!("No conversion rates available; conversions omitted this run");
            }
            Some(table)
        } else {
            None
        };

        let mut latency = FetchLatency::new();
        let mut updates = Vec::new();

        for product in products {
            info!(product = %product.id, "Checking {} ({}) ...", product.display_name(), product.id);
            let quotes = self
                .check_product(product, &mut store, &mut latency, &mut summary)
                .await;
            summary.products_checked += 1;

            if product_changed(&quotes) {
                let changed: Vec<&str> = quotes
                    .iter()
                    .filter(|q| quote_changed(q))
                    .map(|q| q.market.code.as_str())
                    .collect();
                let severity = Severity::from_quotes(&quotes);
                info!(
                    product = %product.id,
                    markets = ?changed,
                    severity = %severity,
                    "Price change ({severity}) on {}",
                    changed.join(", ")
                );
                updates.push(self.build_update(product, quotes, &store));
            } else {
                info!(product = %product.id, "No price changes for this product.");
            }
        }
        summary.products_changed = updates.len();

        match store.commit() {
            Ok(()) => summary.state_committed = true,
            Err(e) => error!("State save failed: {e}"),
        }

        let composer = Composer::new(&self.cfg.primary_market, rates, Utc::now());
        if updates.is_empty() {
            info!("No updates to send.");
        } else if self.cfg.digest {
            if let Some(digest) = composer.compose_digest(&updates) {
                self.deliver(&digest, &mut summary).await;
            }
        } else {
            for notification in composer.compose_each(&updates) {
                self.deliver(&notification, &mut summary).await;
                self.throttle().await;
            }
        }

        self.log_summary(&summary, &latency);
        summary
    }

    /// Fetch every market for one product, stage the observations, and return
    /// them paired with the previous records.
    async fn check_product(
        &self,
        product: &Product,
        store: &mut PriceStateStore,
        latency: &mut FetchLatency,
        summary: &mut RunSummary,
    ) -> Vec<MarketQuote> {
        let mut quotes = Vec::with_capacity(self.cfg.markets.len());

        for market in &self.cfg.markets {
            let started = Instant::now();
            let info = self.fetcher.fetch(&product.id, &market.domain).await;
            latency.record(started.elapsed());
            self.throttle().await;

            if info.price.is_none() {
                summary.missing_prices += 1;
                warn!(product = %product.id, market = %market.code, "No price from {}", market.label);
            }

            let quote = MarketQuote {
                market: market.clone(),
                previous: store.get_previous(&product.id, &market.code).cloned(),
                info,
            };

            let price = quote.current_price();
            store.append_history(&product.id, &market.code, price, Utc::now());
            store.stage_current(
                &product.id,
                &market.code,
                price,
                price.map(|_| quote.currency().to_string()),
            );
            quotes.push(quote);
        }

        quotes
    }

    fn build_update(
        &self,
        product: &Product,
        quotes: Vec<MarketQuote>,
        store: &PriceStateStore,
    ) -> ProductUpdate {
        let title = quotes
            .iter()
            .find(|q| q.market.code == self.cfg.primary_market)
            .and_then(|q| q.info.title.clone())
            .unwrap_or_else(|| product.display_name().to_string());

        ProductUpdate {
            product: product.clone(),
            title,
            quotes,
            primary_history: store.history_prices(&product.id, &self.cfg.primary_market),
        }
    }

    async fn deliver(&self, notification: &Notification, summary: &mut RunSummary) {
        match self.sink.deliver(notification).await {
            Ok(()) => {
                summary.notifications_sent += 1;
                info!(title = %notification.title, "Sent notification: {}", notification.title);
            }
            Err(e) => {
                summary.notifications_failed += 1;
                error!(title = %notification.title, "Notification send failed: {e}");
            }
        }
    }

    async fn throttle(&self) {
        if !self.cfg.throttle.is_zero() {
            tokio::time::sleep(self.cfg.throttle).await;
        }
    }

    fn log_summary(&self, summary: &RunSummary, latency: &FetchLatency) {
        let (p50, p95, max) = latency.percentiles().unwrap_or_default();
        info!(
            checked = summary.products_checked,
            changed = summary.products_changed,
            missing_prices = summary.missing_prices,
            sent = summary.notifications_sent,
            failed = summary.notifications_failed,
            committed = summary.state_committed,
            fetches = latency.len(),
            fetch_p50_ms = p50,
            fetch_p95_ms = p95,
            fetch_max_ms = max,
            "Run complete: {} checked, {} changed, {} sent, {} failed | fetch p50={p50}ms p95={p95}ms max={max}ms",
            summary.products_checked,
            summary.products_changed,
            summary.notifications_sent,
            summary.notifications_failed,
        );
    }
}

/// Rate lookup for runs without `--convert`.
pub struct NoRates;

#[async_trait::async_trait]
impl RateLookup for NoRates {
    async fn rates(&self, _sources: &[String], target: &str) -> RateTable {
        RateTable::new(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use temp_dir::TempDir;

    use crate::config::Cli;
    use crate::error::{AppError, Result};
    use crate::types::MarketInfo;

    #[derive(Default)]
    struct FakeFetcher {
        /// (product_id, domain) → price; anything missing is a failed fetch.
        prices: Mutex<HashMap<(String, String), f64>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl FakeFetcher {
        fn set(&self, product: &str, domain: &str, price: f64) {
            self.prices
                .lock()
                .unwrap()
                .insert((product.to_string(), domain.to_string()), price);
        }

        fn clear(&self, product: &str, domain: &str) {
            self.prices
                .lock()
                .unwrap()
                .remove(&(product.to_string(), domain.to_string()));
        }
    }

    #[async_trait]
    impl MarketInfoFetcher for FakeFetcher {
        async fn fetch(&self, product_id: &str, market_domain: &str) -> MarketInfo {
            let key = (product_id.to_string(), market_domain.to_string());
            self.calls.lock().unwrap().push(key.clone());
            match self.prices.lock().unwrap().get(&key) {
                Some(price) => MarketInfo {
                    price: Some(*price),
                    title: Some(format!("Title {product_id}")),
                    link: Some(format!("https://www.{market_domain}/dp/{product_id}")),
                    ..Default::default()
                },
                None => MarketInfo::default(),
            }
        }
    }

    #[derive(Default)]
    struct FakeSink {
        sent: Mutex<Vec<Notification>>,
        attempts: Mutex<Vec<Instant>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationSink for FakeSink {
        async fn deliver(&self, notification: &Notification) -> Result<()> {
            self.attempts.lock().unwrap().push(Instant::now());
            if self.fail {
                return Err(AppError::Delivery("HTTP 500".to_string()));
            }
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    struct FixedRates;

    #[async_trait]
    impl RateLookup for FixedRates {
        async fn rates(&self, _sources: &[String], target: &str) -> RateTable {
            RateTable::new(target).with_rate("USD", 3.75)
        }
    }

    fn config(dir: &TempDir, cli: Cli) -> Config {
        let vars: HashMap<&str, String> = HashMap::from([
            ("RAINFOREST_KEY", "key".to_string()),
            ("DISCORD_WEBHOOK", "https://hook".to_string()),
            ("FETCH_THROTTLE_MS", "0".to_string()),
            ("HISTORY_KEEP", "5".to_string()),
            ("PREVIOUS_PRICES_PATH", dir.child("previous.json").display().to_string()),
            ("PRICE_HISTORY_PATH", dir.child("history.json").display().to_string()),
        ]);
        Config::from_vars(&cli, |k| vars.get(k).cloned()).unwrap()
    }

    fn tracker(
        cfg: Config,
        fetcher: &Arc<FakeFetcher>,
        sink: &Arc<FakeSink>,
        rates: Arc<dyn RateLookup>,
    ) -> Tracker {
        Tracker::new(cfg, fetcher.clone(), rates, sink.clone())
    }

    fn seed(fetcher: &FakeFetcher, product: &str, sa: f64, us: f64, uk: f64) {
        fetcher.set(product, "amazon.sa", sa);
        fetcher.set(product, "amazon.com", us);
        fetcher.set(product, "amazon.co.uk", uk);
    }

    fn reload(cfg: &Config) -> PriceStateStore {
        PriceStateStore::load(&cfg.previous_path, &cfg.history_path, cfg.history_keep)
    }

    #[tokio::test]
    async fn single_market_drop_produces_badged_notification() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, Cli::default());
        let fetcher = Arc::new(FakeFetcher::default());
        let sink = Arc::new(FakeSink::default());
        let products = vec![Product::new("X", "Product X")];

        seed(&fetcher, "X", 100.0, 10.0, 8.0);
        let first = tracker(cfg.clone(), &fetcher, &sink, Arc::new(NoRates)).run(&products).await;
        assert_eq!(first.products_changed, 1);
        sink.sent.lock().unwrap().clear();

        seed(&fetcher, "X", 90.0, 10.0, 8.0);
        let summary = tracker(cfg.clone(), &fetcher, &sink, Arc::new(NoRates)).run(&products).await;

        assert_eq!(summary.products_changed, 1);
        assert_eq!(summary.notifications_sent, 1);
        assert!(summary.state_committed);

        let sent = sink.sent.lock().unwrap();
        let n = &sent[0];
        assert_eq!(n.title, "Title X");
        assert!(n.description.contains("10% off"), "{}", n.description);
        assert!(n.description.contains("Cheapest: **Amazon.co.uk** — 8 GBP"));
        assert!(n.sections[0].value.contains("100 SAR → 90 SAR"), "{}", n.sections[0].value);
        assert!(n.sections[1].value.ends_with("(no change)"));
        assert!(n.sections[2].value.ends_with("(no change)"));

        let store = reload(&cfg);
        assert_eq!(store.get_previous("X", "sa").and_then(|r| r.price), Some(90.0));
        assert_eq!(store.history_prices("X", "sa"), vec![100.0, 90.0]);
    }

    #[tokio::test]
    async fn unchanged_product_sends_nothing_but_state_is_saved() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, Cli::default());
        let fetcher = Arc::new(FakeFetcher::default());
        let sink = Arc::new(FakeSink::default());
        let products = vec![Product::new("X", "Product X")];

        seed(&fetcher, "X", 100.0, 10.0, 8.0);
        tracker(cfg.clone(), &fetcher, &sink, Arc::new(NoRates)).run(&products).await;
        sink.sent.lock().unwrap().clear();

        let summary = tracker(cfg.clone(), &fetcher, &sink, Arc::new(NoRates)).run(&products).await;
        assert_eq!(summary.products_changed, 0);
        assert!(sink.sent.lock().unwrap().is_empty());
        assert_eq!(reload(&cfg).history_prices("X", "us"), vec![10.0, 10.0]);
    }

    #[tokio::test]
    async fn digest_with_no_changes_sends_nothing() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, Cli { digest: true, ..Default::default() });
        let fetcher = Arc::new(FakeFetcher::default());
        let sink = Arc::new(FakeSink::default());

        // Every fetch fails: nothing is ever "changed".
        let summary = tracker(cfg, &fetcher, &sink, Arc::new(NoRates))
            .run(&[Product::new("A", "A"), Product::new("B", "B")])
            .await;
        assert_eq!(summary.products_changed, 0);
        assert_eq!(summary.missing_prices, 6);
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn digest_consolidates_changed_products() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, Cli { digest: true, ..Default::default() });
        let fetcher = Arc::new(FakeFetcher::default());
        let sink = Arc::new(FakeSink::default());
        seed(&fetcher, "A", 50.0, 5.0, 4.0);
        seed(&fetcher, "B", 60.0, 6.0, 5.0);

        let summary = tracker(cfg, &fetcher, &sink, Arc::new(NoRates))
            .run(&[Product::new("A", "A"), Product::new("B", "B")])
            .await;
        assert_eq!(summary.products_changed, 2);
        assert_eq!(summary.notifications_sent, 1);

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].sections.len(), 2);
        assert_eq!(sent[0].sections[1].name, "Title B (B)");
    }

    #[tokio::test]
    async fn failed_market_does_not_stop_the_run() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, Cli::default());
        let fetcher = Arc::new(FakeFetcher::default());
        let sink = Arc::new(FakeSink::default());
        let products = vec![Product::new("A", "A"), Product::new("B", "B")];

        seed(&fetcher, "A", 50.0, 5.0, 4.0);
        seed(&fetcher, "B", 60.0, 6.0, 5.0);
        tracker(cfg.clone(), &fetcher, &sink, Arc::new(NoRates)).run(&products).await;

        fetcher.clear("A", "amazon.com");
        fetcher.set("B", "amazon.sa", 55.0);
        let summary = tracker(cfg.clone(), &fetcher, &sink, Arc::new(NoRates)).run(&products).await;

        assert_eq!(summary.products_checked, 2);
        assert_eq!(summary.missing_prices, 1);
        assert_eq!(summary.products_changed, 1);
        assert_eq!(fetcher.calls.lock().unwrap().len(), 12);

        let store = reload(&cfg);
        assert_eq!(store.get_previous("A", "us").and_then(|r| r.price), None);
        assert_eq!(store.history_prices("A", "us"), vec![5.0]);
        assert_eq!(store.get_previous("B", "sa").and_then(|r| r.price), Some(55.0));
    }

    #[tokio::test]
    async fn delivery_failure_is_recovered() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, Cli::default());
        let fetcher = Arc::new(FakeFetcher::default());
        let sink = Arc::new(FakeSink { fail: true, ..Default::default() });
        seed(&fetcher, "A", 50.0, 5.0, 4.0);
        seed(&fetcher, "B", 60.0, 6.0, 5.0);

        let summary = tracker(cfg.clone(), &fetcher, &sink, Arc::new(NoRates))
            .run(&[Product::new("A", "A"), Product::new("B", "B")])
            .await;
        assert_eq!(summary.notifications_failed, 2);
        assert_eq!(summary.notifications_sent, 0);
        assert!(summary.state_committed);
        assert!(reload(&cfg).get_previous("B", "uk").is_some());
    }

    #[tokio::test]
    async fn failed_deliveries_are_still_spaced_out() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir, Cli::default());
        cfg.throttle = Duration::from_millis(40);
        let fetcher = Arc::new(FakeFetcher::default());
        let sink = Arc::new(FakeSink { fail: true, ..Default::default() });
        seed(&fetcher, "A", 50.0, 5.0, 4.0);
        seed(&fetcher, "B", 60.0, 6.0, 5.0);

        let summary = tracker(cfg, &fetcher, &sink, Arc::new(NoRates))
            .run(&[Product::new("A", "A"), Product::new("B", "B")])
            .await;
        assert_eq!(summary.notifications_failed, 2);

        let attempts = sink.attempts.lock().unwrap();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[1].duration_since(attempts[0]) >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn conversion_annotates_lines_when_enabled() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, Cli { convert: true, ..Default::default() });
        let fetcher = Arc::new(FakeFetcher::default());
        let sink = Arc::new(FakeSink::default());
        seed(&fetcher, "A", 50.0, 10.0, 4.0);

        tracker(cfg, &fetcher, &sink, Arc::new(FixedRates))
            .run(&[Product::new("A", "A")])
            .await;
        let sent = sink.sent.lock().unwrap();
        assert!(sent[0].sections[1].value.ends_with(" · ≈ 37.50 SAR"), "{}", sent[0].sections[1].value);
        assert!(!sent[0].sections[2].value.contains('≈'));
    }

    #[tokio::test]
    async fn history_stays_bounded_over_many_runs() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, Cli::default());
        let fetcher = Arc::new(FakeFetcher::default());
        let sink = Arc::new(FakeSink::default());
        let products = vec![Product::new("A", "A")];

        for run in 0..12 {
            seed(&fetcher, "A", 100.0 + run as f64, 10.0, 8.0);
            tracker(cfg.clone(), &fetcher, &sink, Arc::new(NoRates)).run(&products).await;
            assert!(reload(&cfg).history("A", "sa").len() <= cfg.history_keep);
        }
        assert_eq!(
            reload(&cfg).history_prices("A", "sa"),
            vec![107.0, 108.0, 109.0, 110.0, 111.0]
        );
    }

    #[tokio::test]
    async fn test_mode_sends_one_notification() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, Cli { test: true, ..Default::default() });
        let fetcher = Arc::new(FakeFetcher::default());
        let sink = Arc::new(FakeSink::default());

        assert!(tracker(cfg, &fetcher, &sink, Arc::new(NoRates)).send_test().await);
        assert!(fetcher.calls.lock().unwrap().is_empty());
        assert_eq!(sink.sent.lock().unwrap()[0].title, "✅ Price Tracker — Test");
    }
}
