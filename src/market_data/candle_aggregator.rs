use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::IngestRejection;
use crate::types::{LateTickPolicy, Tick};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A fixed-width OHLC aggregate over the ticks that fell into one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub bucket_start: i64,
    pub bucket_end: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub tick_count: u64,
    pub sealed: bool,
}

impl Candle {
    fn opened_at(bucket_start: i64, interval: i64, price: f64) -> Self {
        Self {
            bucket_start,
            bucket_end: bucket_start + interval,
            open: price,
            high: price,
            low: price,
            close: price,
            tick_count: 1,
            sealed: false,
        }
    }

    fn apply(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.tick_count += 1;
    }
}

/// What an accepted tick did to the series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Started the first open candle (or the first after a time-driven seal).
    Opened { bucket_start: i64 },
    /// Folded into the open candle.
    Updated { bucket_start: i64 },
    /// Sealed the open candle and started a later one.
    Rolled {
        sealed_bucket: i64,
        bucket_start: i64,
        evicted: bool,
    },
    /// Late tick folded into a retained sealed candle.
    Reopened { bucket_start: i64 },
}

// ---------------------------------------------------------------------------
// CandleAggregator
// ---------------------------------------------------------------------------

/// Folds a tick stream into a sealed candle history plus at most one open
/// candle. Sealed candles are never mutated under [`LateTickPolicy::Discard`].
///
/// Gaps are not synthesized: if ticks skip buckets, the history has a time gap.
#[derive(Debug, Clone)]
pub struct CandleAggregator {
    interval: i64,
    late_policy: LateTickPolicy,
    max_sealed: Option<usize>,
    sealed: VecDeque<Candle>,
    open: Option<Candle>,
    last_sealed_bucket: Option<i64>,
    last_price: Option<f64>,
}

impl CandleAggregator {
    /// `interval` is the bucket width in the session's time units (clamped to
    /// at least 1). `max_sealed` bounds the retained sealed history.
    pub fn new(interval: i64, late_policy: LateTickPolicy, max_sealed: Option<usize>) -> Self {
        Self {
            interval: interval.max(1),
            late_policy,
            max_sealed,
            sealed: VecDeque::new(),
            open: None,
            last_sealed_bucket: None,
            last_price: None,
        }
    }

    pub fn interval(&self) -> i64 {
        self.interval
    }

    /// Floor `time` onto the bucket grid. Correct for negative times too.
    pub fn bucket_start(&self, time: i64) -> i64 {
        time.div_euclid(self.interval) * self.interval
    }

    /// Fold one tick into the series.
    pub fn ingest(&mut self, tick: Tick) -> Result<TickOutcome, IngestRejection> {
        if !tick.price.is_finite() {
            return Err(IngestRejection::NonFinitePrice(tick.price));
        }
        if tick.price <= 0.0 {
            return Err(IngestRejection::NonPositivePrice(tick.price));
        }

        let bucket = self.bucket_start(tick.time);

        let outcome = match self.open.as_mut() {
            Some(open) if bucket == open.bucket_start => {
                open.apply(tick.price);
                TickOutcome::Updated {
                    bucket_start: bucket,
                }
            }
            Some(open) if bucket > open.bucket_start => {
                let sealed_bucket = open.bucket_start;
                let evicted = self.seal_open();
                self.open = Some(Candle::opened_at(bucket, self.interval, tick.price));
                TickOutcome::Rolled {
                    sealed_bucket,
                    bucket_start: bucket,
                    evicted,
                }
            }
            Some(open) => {
                let newest = open.bucket_start;
                return self.handle_late(bucket, newest, tick.price);
            }
            None => match self.last_sealed_bucket {
                Some(last) if bucket <= last => {
                    return self.handle_late(bucket, last, tick.price);
                }
                _ => {
                    self.open = Some(Candle::opened_at(bucket, self.interval, tick.price));
                    TickOutcome::Opened {
                        bucket_start: bucket,
                    }
                }
            },
        };

        self.last_price = Some(tick.price);
        Ok(outcome)
    }

    fn handle_late(
        &mut self,
        bucket: i64,
        newest_bucket: i64,
        price: f64,
    ) -> Result<TickOutcome, IngestRejection> {
        if self.late_policy == LateTickPolicy::ReopenSealed {
            if let Ok(idx) = self.sealed.binary_search_by_key(&bucket, |c| c.bucket_start) {
                self.sealed[idx].apply(price);
                debug!(bucket_start = bucket, price, "late tick folded into sealed candle");
                return Ok(TickOutcome::Reopened {
                    bucket_start: bucket,
                });
            }
        }
        Err(IngestRejection::LateTick {
            bucket_start: bucket,
            newest_bucket,
        })
    }

    /// Move the open candle into history. Returns `true` if the ring bound
    /// evicted the oldest sealed candle.
    fn seal_open(&mut self) -> bool {
        let Some(mut candle) = self.open.take() else {
            return false;
        };
        candle.sealed = true;
        debug!(
            bucket_start = candle.bucket_start,
            open = candle.open,
            high = candle.high,
            low = candle.low,
            close = candle.close,
            "candle sealed"
        );
        self.last_sealed_bucket = Some(candle.bucket_start);
        self.sealed.push_back(candle);

        let mut evicted = false;
        if let Some(max) = self.max_sealed {
            while self.sealed.len() > max {
                self.sealed.pop_front();
                evicted = true;
            }
        }
        evicted
    }

    /// Time-driven seal: if the open candle's bucket has ended by `now`, seal
    /// it. Returns the sealed bucket start and whether an eviction happened.
    pub fn seal_elapsed(&mut self, now: i64) -> Option<(i64, bool)> {
        let bucket = match &self.open {
            Some(open) if open.bucket_end <= now => open.bucket_start,
            _ => return None,
        };
        let evicted = self.seal_open();
        Some((bucket, evicted))
    }

    /// Sealed candles plus the open candle, ascending by `bucket_start`.
    pub fn history_snapshot(&self) -> Vec<Candle> {
        let mut out = Vec::with_capacity(self.sealed.len() + 1);
        out.extend(self.sealed.iter().cloned());
        out.extend(self.open.iter().cloned());
        out
    }

    pub fn open_candle(&self) -> Option<&Candle> {
        self.open.as_ref()
    }

    /// Price of the most recently accepted tick.
    pub fn last_price(&self) -> Option<f64> {
        self.last_price
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn discard(interval: i64) -> CandleAggregator {
        CandleAggregator::new(interval, LateTickPolicy::Discard, None)
    }

    fn feed(agg: &mut CandleAggregator, ticks: &[(i64, f64)]) {
        for &(t, p) in ticks {
            agg.ingest(Tick::new(t, p)).expect("tick should be accepted");
        }
    }

    #[test]
    fn ten_unit_scenario() {
        let mut agg = discard(10);
        feed(
            &mut agg,
            &[(0, 100.0), (3, 102.0), (9, 101.0), (11, 105.0), (12, 103.0)],
        );

        let history = agg.history_snapshot();
        assert_eq!(history.len(), 2);

        let first = &history[0];
        assert_eq!(first.bucket_start, 0);
        assert_eq!(first.bucket_end, 10);
        assert!((first.open - 100.0).abs() < f64::EPSILON);
        assert!((first.high - 102.0).abs() < f64::EPSILON);
        assert!((first.low - 100.0).abs() < f64::EPSILON);
        assert!((first.close - 101.0).abs() < f64::EPSILON);
        assert!(first.sealed);

        let open = &history[1];
        assert_eq!(open.bucket_start, 10);
        assert!((open.open - 105.0).abs() < f64::EPSILON);
        assert!((open.high - 105.0).abs() < f64::EPSILON);
        assert!((open.low - 103.0).abs() < f64::EPSILON);
        assert!((open.close - 103.0).abs() < f64::EPSILON);
        assert!(!open.sealed);
    }

    #[test]
    fn same_bucket_extrema_are_monotone() {
        let mut agg = discard(100);
        let prices = [50.0, 52.0, 49.0, 53.5, 48.0, 51.0];
        let mut prev_high = f64::MIN;
        let mut prev_low = f64::MAX;

        for (i, p) in prices.iter().enumerate() {
            agg.ingest(Tick::new(i as i64, *p)).unwrap();
            let c = agg.open_candle().unwrap();
            assert!(c.high >= prev_high);
            assert!(c.low <= prev_low);
            assert!((c.close - p).abs() < f64::EPSILON);
            assert!((c.open - prices[0]).abs() < f64::EPSILON);
            prev_high = c.high;
            prev_low = c.low;
        }
        assert_eq!(agg.open_candle().unwrap().tick_count, prices.len() as u64);
    }

    #[test]
    fn n_buckets_leave_n_minus_one_sealed() {
        let mut agg = discard(5);
        let ticks: Vec<(i64, f64)> = (0..40)
            .map(|i| (i as i64, 100.0 + ((i * 7) % 11) as f64))
            .collect();
        feed(&mut agg, &ticks);

        let history = agg.history_snapshot();
        assert_eq!(history.len(), 8);
        assert_eq!(history.iter().filter(|c| c.sealed).count(), 7);
        for w in history.windows(2) {
            assert!(w[0].bucket_start < w[1].bucket_start);
        }
        for (i, c) in history.iter().enumerate() {
            assert_eq!(c.sealed, i < 7);
            assert!(c.low <= c.open && c.open <= c.high);
            assert!(c.low <= c.close && c.close <= c.high);
        }
    }

    #[test]
    fn gaps_are_not_synthesized() {
        let mut agg = discard(10);
        feed(&mut agg, &[(1, 10.0), (45, 11.0)]);
        let starts: Vec<i64> = agg.history_snapshot().iter().map(|c| c.bucket_start).collect();
        assert_eq!(starts, vec![0, 40]);
    }

    #[test]
    fn late_tick_is_rejected_without_mutation() {
        let mut agg = discard(10);
        feed(&mut agg, &[(0, 100.0), (5, 104.0), (12, 101.0)]);
        let before = agg.history_snapshot();

        let err = agg.ingest(Tick::new(7, 500.0)).unwrap_err();
        assert_eq!(
            err,
            IngestRejection::LateTick {
                bucket_start: 0,
                newest_bucket: 10
            }
        );
        assert_eq!(agg.history_snapshot(), before);
        assert_eq!(agg.last_price(), Some(101.0));
    }

    #[test]
    fn reopen_policy_folds_into_retained_candle() {
        let mut agg = CandleAggregator::new(10, LateTickPolicy::ReopenSealed, None);
        feed(&mut agg, &[(0, 100.0), (12, 101.0)]);

        let outcome = agg.ingest(Tick::new(4, 90.0)).unwrap();
        assert_eq!(outcome, TickOutcome::Reopened { bucket_start: 0 });

        let sealed = &agg.history_snapshot()[0];
        assert!(sealed.sealed);
        assert!((sealed.low - 90.0).abs() < f64::EPSILON);
        assert!((sealed.close - 90.0).abs() < f64::EPSILON);

        // Nothing retained for bucket -10, so it is still rejected.
        assert!(agg.ingest(Tick::new(-3, 90.0)).unwrap_err().is_late());
    }

    #[test]
    fn non_finite_and_non_positive_prices_are_rejected() {
        let mut agg = discard(10);
        assert!(matches!(
            agg.ingest(Tick::new(0, f64::NAN)),
            Err(IngestRejection::NonFinitePrice(_))
        ));
        assert!(matches!(
            agg.ingest(Tick::new(0, f64::INFINITY)),
            Err(IngestRejection::NonFinitePrice(_))
        ));
        assert_eq!(
            agg.ingest(Tick::new(0, 0.0)),
            Err(IngestRejection::NonPositivePrice(0.0))
        );
        assert!(agg.history_snapshot().is_empty());
        assert_eq!(agg.last_price(), None);
    }

    #[test]
    fn time_driven_seal_closes_idle_bucket() {
        let mut agg = discard(10);
        feed(&mut agg, &[(2, 100.0)]);

        assert_eq!(agg.seal_elapsed(9), None);
        assert_eq!(agg.seal_elapsed(10), Some((0, false)));
        assert!(agg.open_candle().is_none());
        assert!(agg.history_snapshot()[0].sealed);

        // The sealed bucket is now closed to further ticks.
        assert!(agg.ingest(Tick::new(8, 99.0)).unwrap_err().is_late());
        assert_eq!(
            agg.ingest(Tick::new(13, 99.0)).unwrap(),
            TickOutcome::Opened { bucket_start: 10 }
        );
    }

    #[test]
    fn ring_bound_evicts_oldest_but_keeps_open() {
        let mut agg = CandleAggregator::new(1, LateTickPolicy::Discard, Some(3));
        for t in 0..4 {
            agg.ingest(Tick::new(t, 10.0 + t as f64)).unwrap();
        }
        let outcome = agg.ingest(Tick::new(4, 20.0)).unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Rolled {
                sealed_bucket: 3,
                bucket_start: 4,
                evicted: true
            }
        );

        let starts: Vec<i64> = agg.history_snapshot().iter().map(|c| c.bucket_start).collect();
        assert_eq!(starts, vec![1, 2, 3, 4]);
        assert!(agg.open_candle().is_some());
    }

    #[test]
    fn negative_times_floor_downwards() {
        let agg = discard(10);
        assert_eq!(agg.bucket_start(-1), -10);
        assert_eq!(agg.bucket_start(-10), -10);
        assert_eq!(agg.bucket_start(19), 10);
    }
}
