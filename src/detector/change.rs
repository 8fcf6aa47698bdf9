use crate::types::MarketQuote;

/// Whether a fresh observation counts as a price change against the stored one.
///
/// A newly available price is a change; a price that disappears is not.
pub fn changed(previous: Option<f64>, current: Option<f64>) -> bool {
    match (previous, current) {
        (None, Some(_)) => true,
        (Some(p), Some(c)) => p != c,
        (_, None) => false,
    }
}

pub fn quote_changed(quote: &MarketQuote) -> bool {
    changed(quote.previous_price(), quote.current_price())
}

/// A product changed if any of its markets changed.
pub fn product_changed(quotes: &[MarketQuote]) -> bool {
    quotes.iter().any(quote_changed)
}
