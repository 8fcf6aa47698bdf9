use crate::rates::RateTable;

/// Price expressed in the table's target currency, when a rate is known.
pub fn convert_currency(price: f64, currency: &str, rates: &RateTable) -> Option<f64> {
    rates.rate(currency).map(|rate| price * rate)
}
