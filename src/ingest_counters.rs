// =============================================================================
// Ingest Counters — lock-free tallies of accepted and rejected input
// =============================================================================
//
// Every drop decision made by the core is surfaced here rather than raised.
// Counters are plain atomics so any reader (health endpoint, snapshot builder)
// may query them without touching the component locks.
// =============================================================================

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counter set backed by atomics.
#[derive(Default)]
pub struct IngestCounters {
    ticks_accepted: AtomicU64,
    rejected_late: AtomicU64,
    rejected_invalid: AtomicU64,
    late_reopened: AtomicU64,
    candles_sealed: AtomicU64,
    candles_evicted: AtomicU64,
    news_observed: AtomicU64,
    duplicate_news: AtomicU64,
    malformed_news: AtomicU64,
    malformed_status: AtomicU64,
    fetch_failures: AtomicU64,
    cycles: AtomicU64,
}

/// Immutable copy of the counters, suitable for serialisation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub ticks_accepted: u64,
    pub rejected_late: u64,
    pub rejected_invalid: u64,
    pub late_reopened: u64,
    pub candles_sealed: u64,
    pub candles_evicted: u64,
    pub news_observed: u64,
    pub duplicate_news: u64,
    pub malformed_news: u64,
    pub malformed_status: u64,
    pub fetch_failures: u64,
    pub cycles: u64,
}

macro_rules! bump {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            pub fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl IngestCounters {
    pub fn new() -> Self {
        Self::default()
    }

    bump! {
        record_tick_accepted => ticks_accepted,
        record_rejected_late => rejected_late,
        record_rejected_invalid => rejected_invalid,
        record_late_reopened => late_reopened,
        record_candle_sealed => candles_sealed,
        record_candle_evicted => candles_evicted,
        record_news_observed => news_observed,
        record_duplicate_news => duplicate_news,
        record_malformed_news => malformed_news,
        record_malformed_status => malformed_status,
        record_cycle => cycles,
    }

    pub fn record_fetch_failures(&self, n: u64) {
        self.fetch_failures.fetch_add(n, Ordering::Relaxed);
    }

    pub fn rejected_late(&self) -> u64 {
        self.rejected_late.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            ticks_accepted: self.ticks_accepted.load(Ordering::Relaxed),
            rejected_late: self.rejected_late.load(Ordering::Relaxed),
            rejected_invalid: self.rejected_invalid.load(Ordering::Relaxed),
            late_reopened: self.late_reopened.load(Ordering::Relaxed),
            candles_sealed: self.candles_sealed.load(Ordering::Relaxed),
            candles_evicted: self.candles_evicted.load(Ordering::Relaxed),
            news_observed: self.news_observed.load(Ordering::Relaxed),
            duplicate_news: self.duplicate_news.load(Ordering::Relaxed),
            malformed_news: self.malformed_news.load(Ordering::Relaxed),
            malformed_status: self.malformed_status.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for IngestCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.snapshot();
        f.debug_struct("IngestCounters")
            .field("ticks_accepted", &s.ticks_accepted)
            .field("rejected_late", &s.rejected_late)
            .field("rejected_invalid", &s.rejected_invalid)
            .field("candles_sealed", &s.candles_sealed)
            .field("fetch_failures", &s.fetch_failures)
            .finish()
    }
}
