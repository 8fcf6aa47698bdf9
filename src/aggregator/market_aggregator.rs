use crate::types::{Cheapest, MarketQuote, PriceDrop};

/// `(new - old) / old * 100`, undefined when either side is absent or old is zero.
pub fn percent_change(old: Option<f64>, new: Option<f64>) -> Option<f64> {
    let (old, new) = (old?, new?);
    if old == 0.0 {
        return None;
    }
    Some((new - old) / old * 100.0)
}

/// Lowest current price across markets, compared raw (no currency
/// normalisation). Ties keep the earliest market in iteration order.
pub fn find_cheapest(quotes: &[MarketQuote]) -> Option<Cheapest> {
    let mut best: Option<(&MarketQuote, f64)> = None;
    for quote in quotes {
        let Some(price) = quote.current_price() else { continue };
        match best {
            Some((_, best_price)) if price >= best_price => {}
            _ => best = Some((quote, price)),
        }
    }
    best.map(|(quote, price)| Cheapest {
        market_code: quote.market.code.clone(),
        label: quote.market.label.clone(),
        price,
        currency: quote.currency().to_string(),
    })
}

/// Market with the most negative percent change among those that dropped.
/// Ties keep the earliest market in iteration order.
pub fn find_biggest_drop(quotes: &[MarketQuote]) -> Option<PriceDrop> {
    let mut best: Option<PriceDrop> = None;
    for quote in quotes {
        let (Some(previous), Some(current)) = (quote.previous_price(), quote.current_price()) else {
            continue;
        };
        if current >= previous {
            continue;
        }
        let Some(percent) = percent_change(Some(previous), Some(current)) else { continue };
        if best.as_ref().is_some_and(|b| percent >= b.percent) {
            continue;
        }
        best = Some(PriceDrop {
            market_code: quote.market.code.clone(),
            percent,
        });
    }
    best
}
