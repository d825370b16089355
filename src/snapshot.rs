// =============================================================================
// Snapshot — immutable per-cycle view handed to the renderer
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ingest_counters::CounterSnapshot;
use crate::market_data::Candle;
use crate::news::NewsPair;
use crate::status_monitor::StatusView;
use crate::types::TimeBasis;

/// One read-only view of candles, news and status for a single render cycle.
///
/// The three sub-views may come from slightly different instants; each one is
/// internally consistent.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// Sealed history followed by the open candle, ascending by bucket start.
    pub candles: Vec<Candle>,
    pub news: NewsPair,
    pub status: StatusView,
    /// Price of the last accepted tick (current index level).
    pub index_price: Option<f64>,

    pub ticker: Option<String>,
    pub time_basis: TimeBasis,
    pub interval: i64,
    pub counters: CounterSnapshot,
    pub state_version: u64,
    pub assembled_at: DateTime<Utc>,
}

impl Snapshot {
    /// The newest `max` candles, or all of them when `max` is `None`.
    pub fn visible_candles(&self, max: Option<usize>) -> &[Candle] {
        match max {
            Some(max) if self.candles.len() > max => &self.candles[self.candles.len() - max..],
            _ => &self.candles,
        }
    }

    pub fn open_candle(&self) -> Option<&Candle> {
        self.candles.last().filter(|c| !c.sealed)
    }

    /// Axis label for the time axis.
    pub fn time_axis_label(&self) -> &'static str {
        match self.time_basis {
            TimeBasis::SimTick => "Time (Ticks)",
            TimeBasis::WallClock => "Time (Seconds)",
        }
    }
}
