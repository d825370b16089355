// =============================================================================
// Session State — the single aggregation state of a board session
// =============================================================================
//
// One explicitly owned instance, shared as `Arc<SessionState>` between the
// ingest path (poll cycle) and any number of read paths (chart and snapshot
// requests).
//
// Thread safety:
//   - Each component sits behind its own parking_lot::RwLock, so a candle
//     mutation never blocks a news read.
//   - Atomic counters for lock-free version tracking and observability.
//   - No lock is ever held across an await point or any I/O.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::IngestRejection;
use crate::ingest_counters::IngestCounters;
use crate::market_data::{Candle, CandleAggregator, TickOutcome};
use crate::news::tracker::BatchTally;
use crate::news::{NewsOutcome, NewsPair, NewsTracker, RawNews};
use crate::runtime_config::RuntimeConfig;
use crate::snapshot::Snapshot;
use crate::status_monitor::{RawStatus, SimStatus, StatusMonitor, StatusView};
use crate::types::{FetchBatch, Tick, TimeBasis};

/// What one [`SessionState::apply_batch`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub ticks_accepted: u32,
    pub ticks_rejected: u32,
    pub news: BatchTally,
    pub status_updated: bool,
    /// Price was skipped because the case is not running (paused, not
    /// started or finished).
    pub frozen: bool,
}

pub struct SessionState {
    aggregator: RwLock<CandleAggregator>,
    news: RwLock<NewsTracker>,
    status: RwLock<StatusMonitor>,
    ticker: RwLock<Option<String>>,

    pub counters: IngestCounters,

    /// Incremented on every accepted mutation.
    state_version: AtomicU64,

    time_basis: TimeBasis,
    started_at: Instant,
}

impl SessionState {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            aggregator: RwLock::new(CandleAggregator::new(
                config.candle_interval,
                config.late_tick_policy,
                config.max_sealed_candles,
            )),
            news: RwLock::new(NewsTracker::new()),
            status: RwLock::new(StatusMonitor::new()),
            ticker: RwLock::new(config.ticker.clone()),
            counters: IngestCounters::new(),
            state_version: AtomicU64::new(1),
            time_basis: config.time_basis,
            started_at: Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Clock ───────────────────────────────────────────────────────────

    pub fn time_basis(&self) -> TimeBasis {
        self.time_basis
    }

    /// Current time in the session's basis: whole seconds since start, or the
    /// last upstream tick counter (`None` before any status arrived).
    pub fn clock_now(&self) -> Option<i64> {
        match self.time_basis {
            TimeBasis::WallClock => Some(self.started_at.elapsed().as_secs() as i64),
            TimeBasis::SimTick => self.status.read().last().map(|s| s.elapsed_ticks),
        }
    }

    // ── Ingest ──────────────────────────────────────────────────────────

    /// Fold one tick into the candle series, counting the result.
    pub fn ingest_tick(&self, tick: Tick) -> Result<TickOutcome, IngestRejection> {
        let result = self.aggregator.write().ingest(tick);
        match &result {
            Ok(outcome) => {
                self.counters.record_tick_accepted();
                match outcome {
                    TickOutcome::Rolled { evicted, .. } => {
                        self.counters.record_candle_sealed();
                        if *evicted {
                            self.counters.record_candle_evicted();
                        }
                    }
                    TickOutcome::Reopened { .. } => self.counters.record_late_reopened(),
                    _ => {}
                }
                self.increment_version();
            }
            Err(e) if e.is_late() => {
                self.counters.record_rejected_late();
                debug!(time = tick.time, price = tick.price, reason = %e, "tick rejected");
            }
            Err(e) => {
                self.counters.record_rejected_invalid();
                warn!(time = tick.time, reason = %e, "tick rejected");
            }
        }
        result
    }

    pub fn observe_news(&self, raw: RawNews) -> Result<NewsOutcome, IngestRejection> {
        let result = self.news.write().observe(raw);
        match &result {
            Ok(NewsOutcome::Shifted { .. }) => {
                self.counters.record_news_observed();
                self.increment_version();
            }
            Ok(NewsOutcome::Duplicate) => self.counters.record_duplicate_news(),
            Err(_) => self.counters.record_malformed_news(),
        }
        result
    }

    pub fn observe_news_batch(&self, items: Vec<RawNews>) -> BatchTally {
        let tally = self.news.write().observe_batch(items);
        for _ in 0..tally.shifted {
            self.counters.record_news_observed();
        }
        for _ in 0..tally.duplicates {
            self.counters.record_duplicate_news();
        }
        for _ in 0..tally.malformed {
            self.counters.record_malformed_news();
        }
        if tally.shifted > 0 {
            self.increment_version();
        }
        tally
    }

    pub fn update_status(&self, raw: RawStatus) -> Result<SimStatus, IngestRejection> {
        let result = self.status.write().update(raw);
        match &result {
            Ok(_) => {
                self.increment_version();
            }
            Err(_) => self.counters.record_malformed_status(),
        }
        result
    }

    /// Fold an already-fetched poll batch into the session. Status goes first
    /// so that a simulation-tick price is stamped with the fresh tick counter.
    pub fn apply_batch(&self, batch: FetchBatch) -> BatchReport {
        let mut report = BatchReport::default();

        if let Some(ticker) = batch.ticker {
            let mut current = self.ticker.write();
            if current.as_deref() != Some(ticker.as_str()) {
                *current = Some(ticker);
            }
        }

        if let Some(raw) = batch.status {
            report.status_updated = self.update_status(raw).is_ok();
        }

        for tick in batch.backfill {
            self.tally_tick(tick, &mut report);
        }

        if let Some(price) = batch.last_price {
            let live = self.derive_status().live;
            if !live {
                report.frozen = true;
            } else if let Some(now) = self.clock_now() {
                self.tally_tick(Tick::new(now, price), &mut report);
            } else {
                debug!(price, "no tick counter yet, price skipped");
            }
        }

        report.news = self.observe_news_batch(batch.news);
        report
    }

    fn tally_tick(&self, tick: Tick, report: &mut BatchReport) {
        match self.ingest_tick(tick) {
            Ok(_) => report.ticks_accepted += 1,
            Err(_) => report.ticks_rejected += 1,
        }
    }

    // ── Read paths ──────────────────────────────────────────────────────

    /// Sealed history plus the open candle. Like [`Self::assemble`], this
    /// seals an open candle whose bucket has ended.
    pub fn history_snapshot(&self) -> Vec<Candle> {
        let now = self.clock_now();
        let mut agg = self.aggregator.write();
        self.seal_if_elapsed(&mut agg, now);
        agg.history_snapshot()
    }

    /// True until the first tick is accepted.
    pub fn is_empty(&self) -> bool {
        self.aggregator.read().last_price().is_none()
    }

    fn seal_if_elapsed(&self, agg: &mut CandleAggregator, now: Option<i64>) {
        if let Some((bucket, evicted)) = now.and_then(|n| agg.seal_elapsed(n)) {
            debug!(bucket_start = bucket, "idle candle sealed on read");
            self.counters.record_candle_sealed();
            if evicted {
                self.counters.record_candle_evicted();
            }
            self.increment_version();
        }
    }

    pub fn latest_pair(&self) -> NewsPair {
        self.news.read().latest_pair()
    }

    pub fn derive_status(&self) -> StatusView {
        self.status.read().derive()
    }

    pub fn news_cursor(&self) -> Option<i64> {
        self.news.read().highest_seq()
    }

    pub fn ticker(&self) -> Option<String> {
        self.ticker.read().clone()
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Assemble a [`Snapshot`]. Each component is locked on its own, one after
    /// the other; an idle open candle whose bucket has ended is sealed first.
    pub fn assemble(&self) -> Snapshot {
        let now = self.clock_now();

        let (candles, index_price, interval) = {
            let mut agg = self.aggregator.write();
            self.seal_if_elapsed(&mut agg, now);
            (agg.history_snapshot(), agg.last_price(), agg.interval())
        };

        let news = self.latest_pair();
        let status = self.derive_status();

        Snapshot {
            candles,
            news,
            status,
            index_price,
            ticker: self.ticker(),
            time_basis: self.time_basis,
            interval,
            counters: self.counters.snapshot(),
            state_version: self.current_state_version(),
            assembled_at: Utc::now(),
        }
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("time_basis", &self.time_basis)
            .field("state_version", &self.current_state_version())
            .field("counters", &self.counters)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::types::SimPhase;

    fn sim_state(interval: i64) -> SessionState {
        let cfg = RuntimeConfig {
            time_basis: TimeBasis::SimTick,
            candle_interval: interval,
            ..RuntimeConfig::default()
        };
        SessionState::new(&cfg)
    }

    fn status(elapsed: i64, limit: i64) -> RawStatus {
        RawStatus {
            phase: Some(SimPhase::Active),
            elapsed_ticks: Some(elapsed),
            tick_limit: Some(limit),
        }
    }

    #[test]
    fn late_tick_counter_increments_once_per_event() {
        let state = sim_state(10);
        for (t, p) in [(0, 100.0), (3, 102.0), (11, 105.0)] {
            state.ingest_tick(Tick::new(t, p)).unwrap();
        }
        let before = state.history_snapshot();

        assert!(state.ingest_tick(Tick::new(4, 1.0)).is_err());
        assert_eq!(state.counters.rejected_late(), 1);
        assert!(state.ingest_tick(Tick::new(9, 1.0)).is_err());
        assert_eq!(state.counters.rejected_late(), 2);

        assert_eq!(state.history_snapshot(), before);
        assert_eq!(state.counters.snapshot().rejected_invalid, 0);
    }

    #[test]
    fn apply_batch_stamps_price_with_upstream_tick() {
        let state = sim_state(10);
        let report = state.apply_batch(FetchBatch {
            ticker: Some("RTM".into()),
            last_price: Some(25.5),
            status: Some(status(14, 300)),
            news: vec![RawNews::with_id(1, "Opening bell")],
            ..FetchBatch::default()
        });
        assert!(report.status_updated);
        assert_eq!(report.ticks_accepted, 1);
        assert_eq!(report.news.shifted, 1);

        let snap = state.assemble();
        assert_eq!(snap.ticker.as_deref(), Some("RTM"));
        assert_eq!(snap.candles.len(), 1);
        assert_eq!(snap.candles[0].bucket_start, 10);
        assert_eq!(snap.index_price, Some(25.5));
        assert_eq!(snap.status.remaining, 286);
        assert_eq!(
            snap.news.current.as_ref().map(|n| n.headline.as_str()),
            Some("Opening bell")
        );
    }

    #[test]
    fn sim_price_without_status_is_skipped() {
        let state = sim_state(10);
        let report = state.apply_batch(FetchBatch {
            last_price: Some(25.5),
            ..FetchBatch::default()
        });
        assert_eq!(report.ticks_accepted, 0);
        assert!(state.history_snapshot().is_empty());
    }

    #[test]
    fn finished_case_freezes_price_ingestion() {
        let state = sim_state(10);
        state.apply_batch(FetchBatch {
            last_price: Some(10.0),
            status: Some(status(5, 300)),
            ..FetchBatch::default()
        });
        let report = state.apply_batch(FetchBatch {
            last_price: Some(12.0),
            status: Some(status(300, 300)),
            ..FetchBatch::default()
        });
        assert!(report.frozen);
        assert_eq!(state.assemble().index_price, Some(10.0));
    }

    #[test]
    fn assemble_seals_idle_candle_once_bucket_elapsed() {
        let state = sim_state(10);
        state.update_status(status(3, 300)).unwrap();
        state.ingest_tick(Tick::new(3, 50.0)).unwrap();
        assert!(!state.assemble().candles[0].sealed);

        state.update_status(status(10, 300)).unwrap();
        let snap = state.assemble();
        assert_eq!(snap.candles.len(), 1);
        assert!(snap.candles[0].sealed);
        assert!(snap.open_candle().is_none());
        assert_eq!(snap.counters.candles_sealed, 1);
    }

    #[test]
    fn paused_case_skips_prices_until_resumed() {
        let state = sim_state(10);
        state.apply_batch(FetchBatch {
            last_price: Some(10.0),
            status: Some(status(5, 300)),
            ..FetchBatch::default()
        });

        let paused = state.apply_batch(FetchBatch {
            last_price: Some(11.0),
            status: Some(RawStatus {
                phase: Some(SimPhase::Paused),
                elapsed_ticks: Some(6),
                tick_limit: Some(300),
            }),
            ..FetchBatch::default()
        });
        assert!(paused.frozen);
        assert_eq!(paused.ticks_accepted, 0);

        let resumed = state.apply_batch(FetchBatch {
            last_price: Some(12.0),
            status: Some(status(7, 300)),
            ..FetchBatch::default()
        });
        assert!(!resumed.frozen);
        assert_eq!(state.assemble().index_price, Some(12.0));
    }

    #[test]
    fn history_query_seals_elapsed_candle() {
        let state = sim_state(10);
        state.update_status(status(3, 300)).unwrap();
        state.ingest_tick(Tick::new(3, 50.0)).unwrap();
        assert!(!state.history_snapshot()[0].sealed);
        assert!(!state.is_empty());

        state.update_status(status(12, 300)).unwrap();
        let history = state.history_snapshot();
        assert_eq!(history.len(), 1);
        assert!(history[0].sealed);
        assert_eq!(state.counters.snapshot().candles_sealed, 1);

        // A second query does not seal or count again.
        state.history_snapshot();
        assert_eq!(state.counters.snapshot().candles_sealed, 1);
    }

    #[test]
    fn malformed_inputs_are_counted_not_raised() {
        let state = sim_state(10);
        assert!(state.observe_news(RawNews::default()).is_err());
        assert!(state.update_status(RawStatus::default()).is_err());
        assert!(state.ingest_tick(Tick::new(0, f64::NAN)).is_err());

        let c = state.counters.snapshot();
        assert_eq!(c.malformed_news, 1);
        assert_eq!(c.malformed_status, 1);
        assert_eq!(c.rejected_invalid, 1);
    }

    #[test]
    fn snapshot_is_detached_from_later_ingestion() {
        let state = sim_state(10);
        state.ingest_tick(Tick::new(1, 10.0)).unwrap();
        let snap = state.assemble();
        state.ingest_tick(Tick::new(2, 99.0)).unwrap();
        assert!((snap.candles[0].high - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn concurrent_readers_never_see_broken_candles() {
        let state = Arc::new(sim_state(5));
        let writer = {
            let state = state.clone();
            std::thread::spawn(move || {
                for t in 0..2_000 {
                    let _ = state.ingest_tick(Tick::new(t, 100.0 + (t % 13) as f64));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let state = state.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let candles = state.history_snapshot();
                        for w in candles.windows(2) {
                            assert!(w[0].bucket_start < w[1].bucket_start);
                        }
                        for c in &candles {
                            assert!(c.low <= c.open && c.open <= c.high);
                            assert!(c.low <= c.close && c.close <= c.high);
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(state.history_snapshot().len(), 400);
    }
}
