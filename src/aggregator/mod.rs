pub mod currency;
pub mod market_aggregator;

pub use currency::convert_currency;
pub use market_aggregator::{find_biggest_drop, find_cheapest, percent_change};
