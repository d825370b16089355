pub mod candle_aggregator;

// Re-exported for `use crate::market_data::Candle`.
pub use candle_aggregator::{Candle, CandleAggregator, TickOutcome};
