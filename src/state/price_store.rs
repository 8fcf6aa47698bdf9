use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::types::{HistoryPoint, PriceRecord};

/// product_id → market_code → last observed record
pub type PreviousPrices = BTreeMap<String, BTreeMap<String, PriceRecord>>;
/// product_id → market_code → oldest-first history
pub type PriceHistory = BTreeMap<String, BTreeMap<String, Vec<HistoryPoint>>>;

// ---------------------------------------------------------------------------
// PriceStateStore
// ---------------------------------------------------------------------------

/// Previous prices and bounded history, staged in memory for the whole run
/// and written out once by `commit`.
///
/// `previous` is the snapshot loaded at start-up and is never modified during
/// the run, so every comparison is against the last completed run.
pub struct PriceStateStore {
    previous_path: PathBuf,
    history_path: PathBuf,
    history_keep: usize,
    previous: PreviousPrices,
    staged: PreviousPrices,
    history: PriceHistory,
}

impl PriceStateStore {
    /// Load both documents. Missing or corrupt files yield empty maps.
    pub fn load(previous_path: &Path, history_path: &Path, history_keep: usize) -> Self {
        let previous: PreviousPrices = load_json(previous_path);
        let history: PriceHistory = load_json(history_path);
        info!(
            products_previous = previous.len(),
            products_history = history.len(),
            "State loaded: {} products with previous prices, {} with history",
            previous.len(),
            history.len(),
        );
        Self {
            previous_path: previous_path.to_path_buf(),
            history_path: history_path.to_path_buf(),
            history_keep: history_keep.max(1),
            previous,
            staged: PreviousPrices::new(),
            history,
        }
    }

    pub fn get_previous(&self, product_id: &str, market_code: &str) -> Option<&PriceRecord> {
        self.previous.get(product_id)?.get(market_code)
    }

    /// Replace the record written for this product/market at commit,
    /// whether or not the price changed.
    pub fn stage_current(
        &mut self,
        product_id: &str,
        market_code: &str,
        price: Option<f64>,
        currency: Option<String>,
    ) {
        self.staged
            .entry(product_id.to_string())
            .or_default()
            .insert(market_code.to_string(), PriceRecord { price, currency });
    }

    /// Append a datapoint when `price` is present and finite, then evict
    /// oldest-first down to the configured bound.
    pub fn append_history(
        &mut self,
        product_id: &str,
        market_code: &str,
        price: Option<f64>,
        timestamp: DateTime<Utc>,
    ) {
        let series = self
            .history
            .entry(product_id.to_string())
            .or_default()
            .entry(market_code.to_string())
            .or_default();

        let Some(price) = price.filter(|p| p.is_finite()) else { return };
        series.push(HistoryPoint { timestamp, price });
        if series.len() > self.history_keep {
            let excess = series.len() - self.history_keep;
            series.drain(..excess);
        }
    }

    pub fn history(&self, product_id: &str, market_code: &str) -> &[HistoryPoint] {
        self.history
            .get(product_id)
            .and_then(|m| m.get(market_code))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn history_prices(&self, product_id: &str, market_code: &str) -> Vec<f64> {
        self.history(product_id, market_code)
            .iter()
            .map(|p| p.price)
            .collect()
    }

    /// Snapshot that `commit` will write: loaded records overlaid per product
    /// with this run's staged records.
    pub fn merged_previous(&self) -> PreviousPrices {
        let mut merged = self.previous.clone();
        for (product_id, markets) in &self.staged {
            merged.insert(product_id.clone(), markets.clone());
        }
        merged
    }

    /// Persist history and the merged previous snapshot.
    pub fn commit(&self) -> Result<()> {
        save_json(&self.history_path, &self.history)?;
        save_json(&self.previous_path, &self.merged_previous())?;
        info!(
            staged_products = self.staged.len(),
            "State committed to {} and {}",
            self.previous_path.display(),
            self.history_path.display(),
        );
        Ok(())
    }
}

fn load_json<T: DeserializeOwned + Default>(path: &Path) -> T {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            debug!(path = %path.display(), "No state at {}: {e}", path.display());
            return T::default();
        }
    };
    match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %path.display(), "Ignoring unreadable state in {}: {e}", path.display());
            T::default()
        }
    }
}

/// Write to a sibling temp file and rename over the target, so a failed write
/// leaves the old document intact.
fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let persist_err = |e: std::io::Error| {
        AppError::Persistence(format!("writing {}: {e}", path.display()))
    };

    let text = serde_json::to_string_pretty(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, text).map_err(persist_err)?;
    std::fs::rename(&tmp, path).map_err(persist_err)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
