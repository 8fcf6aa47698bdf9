pub mod change;

pub use change::{product_changed, quote_changed};
