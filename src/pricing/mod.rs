pub mod market_value;
pub mod variant;

pub use market_value::{estimate, MarketValue};
pub use variant::VariantKey;
