// =============================================================================
// Poll Cycle — fetch → ingest → assemble → render
// =============================================================================
//
// The shell calls `poll_and_render` once per chart request (or `poll_once` on
// a fixed cadence when background polling is enabled). Per-endpoint cadences
// come from the poll schedule; the price is fetched on every cycle.
//
// No session lock is held while the tick source is awaited.
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::render::{ChartRenderer, RenderedChart};
use crate::rit::{FetchPlan, TickSource};
use crate::runtime_config::RuntimeConfig;
use crate::session_state::{BatchReport, SessionState};
use crate::snapshot::Snapshot;
use crate::types::{Endpoint, TimeBasis};

/// Failed history fetches tolerated before live prices flow without it.
pub const MAX_BACKFILL_ATTEMPTS: u32 = 3;

// =============================================================================
// PollSchedule
// =============================================================================

/// Decides which endpoints a cycle may hit. Timestamps are stored as
/// milliseconds since the schedule was created, in atomics, so concurrent
/// cycles claim a slot without locking.
pub struct PollSchedule {
    epoch: Instant,
    case_every_ms: u64,
    news_every_ms: u64,
    /// 0 = never polled.
    last_case_ms: AtomicU64,
    last_news_ms: AtomicU64,
    backfill_limit: Option<usize>,
    backfill_done: AtomicBool,
    backfill_failures: AtomicU32,
}

impl PollSchedule {
    pub fn new(case_every: Duration, news_every: Duration, backfill_limit: Option<usize>) -> Self {
        Self {
            epoch: Instant::now(),
            case_every_ms: case_every.as_millis() as u64,
            news_every_ms: news_every.as_millis() as u64,
            last_case_ms: AtomicU64::new(0),
            last_news_ms: AtomicU64::new(0),
            backfill_limit,
            backfill_done: AtomicBool::new(false),
            backfill_failures: AtomicU32::new(0),
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        let backfill = match config.time_basis {
            TimeBasis::SimTick if config.history_backfill_limit > 0 => {
                Some(config.history_backfill_limit)
            }
            _ => None,
        };
        Self::new(
            Duration::from_millis(config.case_poll_ms),
            Duration::from_millis(config.news_poll_ms),
            backfill,
        )
    }

    fn now_ms(&self) -> u64 {
        // +1 keeps 0 free as the "never" sentinel.
        self.epoch.elapsed().as_millis() as u64 + 1
    }

    /// Claim the endpoint if its cadence has elapsed. Only one concurrent
    /// caller wins a given slot.
    fn claim(slot: &AtomicU64, every_ms: u64, now: u64) -> bool {
        let last = slot.load(Ordering::Acquire);
        if last != 0 && now.saturating_sub(last) < every_ms {
            return false;
        }
        slot.compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Build the plan for one cycle from the session's current state.
    ///
    /// Status is always eligible. Price is pulled only while the case is live
    /// and news stops once it has finished. History is requested only while
    /// no tick has been accepted, so backfilled rows never land behind a live
    /// price.
    pub fn plan(&self, state: &SessionState) -> FetchPlan {
        let view = state.derive_status();
        let now = self.now_ms();
        let status = Self::claim(&self.last_case_ms, self.case_every_ms, now);
        let news = !view.finished && Self::claim(&self.last_news_ms, self.news_every_ms, now);
        let backfill = if self.backfill_done.load(Ordering::Acquire) || !state.is_empty() {
            None
        } else {
            self.backfill_limit
        };

        FetchPlan {
            status,
            price: view.live,
            news,
            news_since: state.news_cursor(),
            backfill,
        }
    }

    fn mark_backfilled(&self) {
        self.backfill_done.store(true, Ordering::Release);
    }

    /// Count a failed history fetch. Returns `true` once the attempts are
    /// used up, after which backfill is abandoned.
    fn backfill_failed(&self) -> bool {
        let failures = self.backfill_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= MAX_BACKFILL_ATTEMPTS {
            self.mark_backfilled();
            return true;
        }
        false
    }
}

// =============================================================================
// Cycle
// =============================================================================

/// Outcome of one ingest cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub plan: FetchPlan,
    pub applied: BatchReport,
    pub fetch_errors: Vec<String>,
    /// The live price was withheld because the history backfill failed.
    pub price_held: bool,
}

/// Fetch one batch and fold it into the session.
pub async fn poll_once<S: TickSource>(
    state: &SessionState,
    source: &S,
    schedule: &PollSchedule,
) -> CycleReport {
    let plan = schedule.plan(state);

    let mut report = CycleReport {
        plan,
        ..CycleReport::default()
    };

    let mut batch = match source.fetch_batch(plan).await {
        Ok(batch) => batch,
        Err(e) => {
            state.counters.record_fetch_failures(1);
            report.fetch_errors.push(format!("{e:#}"));
            state.counters.record_cycle();
            return report;
        }
    };

    if plan.backfill.is_some() {
        if !batch.failed(Endpoint::History) {
            info!(rows = batch.backfill.len(), "history backfill applied");
            schedule.mark_backfilled();
        } else if schedule.backfill_failed() {
            warn!(
                attempts = MAX_BACKFILL_ATTEMPTS,
                "history backfill abandoned, charting live prices only"
            );
        } else if batch.last_price.take().is_some() {
            debug!("live price held until history backfill succeeds");
            report.price_held = true;
        }
    }

    state.counters.record_fetch_failures(batch.errors.len() as u64);
    report.fetch_errors = batch.errors.iter().map(ToString::to_string).collect();
    report.applied = state.apply_batch(batch);
    state.counters.record_cycle();

    debug!(
        accepted = report.applied.ticks_accepted,
        rejected = report.applied.ticks_rejected,
        news = report.applied.news.shifted,
        errors = report.fetch_errors.len(),
        "poll cycle applied"
    );
    report
}

/// One full cycle for a chart request: ingest, then assemble and render.
/// Fetch failures never fail the cycle; the last good state is rendered.
pub async fn poll_and_render<S: TickSource>(
    state: &SessionState,
    source: &S,
    schedule: &PollSchedule,
    renderer: &ChartRenderer,
) -> Result<(Snapshot, RenderedChart)> {
    poll_once(state, source, schedule).await;
    render_current(state, renderer)
}

/// Assemble and render without polling the source.
pub fn render_current(
    state: &SessionState,
    renderer: &ChartRenderer,
) -> Result<(Snapshot, RenderedChart)> {
    let snapshot = state.assemble();
    let chart = renderer.render(&snapshot)?;
    Ok((snapshot, chart))
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::sync::Mutex;

    use anyhow::Result;

    use crate::rit::{FetchPlan, TickSource};
    use crate::types::FetchBatch;

    /// Tick source replaying canned batches and recording the plans it saw.
    #[derive(Default)]
    pub struct ScriptedSource {
        pub batches: Mutex<Vec<FetchBatch>>,
        pub plans: Mutex<Vec<FetchPlan>>,
        pub fail: bool,
    }

    impl ScriptedSource {
        pub fn new(mut batches: Vec<FetchBatch>) -> Self {
            batches.reverse();
            Self {
                batches: Mutex::new(batches),
                ..Self::default()
            }
        }
    }

    impl TickSource for ScriptedSource {
        async fn fetch_batch(&self, plan: FetchPlan) -> Result<FetchBatch> {
            self.plans.lock().unwrap().push(plan);
            if self.fail {
                anyhow::bail!("upstream unreachable");
            }
            Ok(self.batches.lock().unwrap().pop().unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::ScriptedSource;
    use super::*;
    use crate::news::RawNews;
    use crate::status_monitor::RawStatus;
    use crate::types::{EndpointFailure, FetchBatch, SimPhase, Tick};

    fn sim_config() -> RuntimeConfig {
        RuntimeConfig {
            time_basis: TimeBasis::SimTick,
            candle_interval: 10,
            ..RuntimeConfig::default()
        }
    }

    fn history_failure() -> EndpointFailure {
        EndpointFailure {
            endpoint: Endpoint::History,
            message: "GET /securities/history returned 503".into(),
        }
    }

    fn active(tick: i64) -> Option<RawStatus> {
        Some(RawStatus {
            phase: Some(SimPhase::Active),
            elapsed_ticks: Some(tick),
            tick_limit: Some(1800),
        })
    }

    fn with_status(phase: SimPhase, tick: i64) -> SessionState {
        let state = SessionState::new(&sim_config());
        state
            .update_status(RawStatus {
                phase: Some(phase),
                elapsed_ticks: Some(tick),
                tick_limit: Some(300),
            })
            .unwrap();
        state
    }

    #[test]
    fn schedule_throttles_case_and_news() {
        let state = SessionState::new(&sim_config());
        let schedule = PollSchedule::new(Duration::from_secs(60), Duration::from_secs(60), None);
        let first = schedule.plan(&state);
        assert!(first.status && first.news && first.price);

        state.observe_news_batch(vec![RawNews::with_id(4, "Rates cut")]);
        let second = schedule.plan(&state);
        assert!(!second.status);
        assert!(!second.news);
        assert!(second.price);
        assert_eq!(second.news_since, Some(4));
    }

    #[test]
    fn finished_schedule_stops_price_and_news() {
        let schedule = PollSchedule::new(Duration::ZERO, Duration::ZERO, None);
        let plan = schedule.plan(&with_status(SimPhase::Stopped, 120));
        assert!(plan.status);
        assert!(!plan.price);
        assert!(!plan.news);
    }

    #[test]
    fn paused_schedule_keeps_news_but_not_price() {
        let schedule = PollSchedule::new(Duration::ZERO, Duration::ZERO, None);
        let plan = schedule.plan(&with_status(SimPhase::Paused, 120));
        assert!(plan.status);
        assert!(!plan.price);
        assert!(plan.news);
    }

    #[test]
    fn backfill_only_planned_for_sim_tick_basis() {
        let state = SessionState::new(&sim_config());
        let wall = PollSchedule::from_config(&RuntimeConfig::default());
        assert_eq!(wall.plan(&state).backfill, None);

        let sim = PollSchedule::from_config(&sim_config());
        assert_eq!(sim.plan(&state).backfill, Some(15_000));
    }

    #[test]
    fn backfill_not_planned_once_ticks_exist() {
        let state = SessionState::new(&sim_config());
        state.ingest_tick(Tick::new(40, 10.0)).unwrap();
        let schedule = PollSchedule::new(Duration::ZERO, Duration::ZERO, Some(100));
        assert_eq!(schedule.plan(&state).backfill, None);
    }

    #[tokio::test]
    async fn backfill_runs_once_then_live_ticks_follow() {
        let config = sim_config();
        let state = SessionState::new(&config);
        let schedule = PollSchedule::new(Duration::ZERO, Duration::ZERO, Some(100));
        let source = ScriptedSource::new(vec![
            FetchBatch {
                status: active(21),
                backfill: vec![Tick::new(1, 10.0), Tick::new(5, 11.0), Tick::new(14, 9.0)],
                last_price: Some(9.5),
                ..FetchBatch::default()
            },
            FetchBatch {
                status: active(25),
                last_price: Some(9.8),
                ..FetchBatch::default()
            },
        ]);

        let first = poll_once(&state, &source, &schedule).await;
        assert_eq!(first.applied.ticks_accepted, 4);
        let second = poll_once(&state, &source, &schedule).await;
        assert_eq!(second.plan.backfill, None);

        let starts: Vec<i64> = state.history_snapshot().iter().map(|c| c.bucket_start).collect();
        assert_eq!(starts, vec![0, 10, 20]);
    }

    #[tokio::test]
    async fn failed_history_holds_live_price_until_backfill_lands() {
        let state = SessionState::new(&sim_config());
        let schedule = PollSchedule::new(Duration::ZERO, Duration::ZERO, Some(100));
        let source = ScriptedSource::new(vec![
            FetchBatch {
                status: active(500),
                last_price: Some(20.0),
                errors: vec![history_failure()],
                ..FetchBatch::default()
            },
            FetchBatch {
                status: active(502),
                backfill: vec![
                    Tick::new(480, 18.0),
                    Tick::new(495, 19.0),
                    Tick::new(501, 19.5),
                ],
                last_price: Some(20.5),
                ..FetchBatch::default()
            },
        ]);

        let first = poll_once(&state, &source, &schedule).await;
        assert!(first.price_held);
        assert_eq!(first.applied.ticks_accepted, 0);
        assert!(state.is_empty());

        let second = poll_once(&state, &source, &schedule).await;
        assert_eq!(second.plan.backfill, Some(100));
        assert!(!second.price_held);
        assert_eq!(second.applied.ticks_accepted, 4);

        let counters = state.counters.snapshot();
        assert_eq!(counters.rejected_late, 0);
        assert_eq!(counters.fetch_failures, 1);

        let candles = state.history_snapshot();
        let starts: Vec<i64> = candles.iter().map(|c| c.bucket_start).collect();
        assert_eq!(starts, vec![480, 490, 500]);
        assert!((candles[2].close - 20.5).abs() < f64::EPSILON);
        assert_eq!(schedule.plan(&state).backfill, None);
    }

    #[tokio::test]
    async fn backfill_is_abandoned_after_repeated_failures() {
        let state = SessionState::new(&sim_config());
        let schedule = PollSchedule::new(Duration::ZERO, Duration::ZERO, Some(100));
        let failing = |tick| FetchBatch {
            status: active(tick),
            last_price: Some(20.0),
            errors: vec![history_failure()],
            ..FetchBatch::default()
        };
        let source = ScriptedSource::new(vec![failing(10), failing(11), failing(12)]);

        for _ in 1..MAX_BACKFILL_ATTEMPTS {
            assert!(poll_once(&state, &source, &schedule).await.price_held);
        }
        let last = poll_once(&state, &source, &schedule).await;
        assert!(!last.price_held);
        assert_eq!(last.applied.ticks_accepted, 1);
        assert_eq!(schedule.plan(&state).backfill, None);
    }

    #[tokio::test]
    async fn news_cursor_is_forwarded_to_the_source() {
        let state = SessionState::new(&sim_config());
        let schedule = PollSchedule::new(Duration::ZERO, Duration::ZERO, None);
        let source = ScriptedSource::new(vec![FetchBatch {
            news: vec![RawNews::with_id(4, "Tariffs announced")],
            ..FetchBatch::default()
        }]);

        poll_once(&state, &source, &schedule).await;
        poll_once(&state, &source, &schedule).await;

        let plans = source.plans.lock().unwrap();
        assert_eq!(plans[0].news_since, None);
        assert_eq!(plans[1].news_since, Some(4));
    }

    #[tokio::test]
    async fn failed_fetch_still_renders_last_state() {
        let state = SessionState::new(&sim_config());
        state.ingest_tick(Tick::new(3, 100.0)).unwrap();

        let schedule = PollSchedule::from_config(&sim_config());
        let source = ScriptedSource {
            fail: true,
            ..ScriptedSource::default()
        };
        let renderer = ChartRenderer::new(RuntimeConfig::default().chart);

        let (snapshot, chart) = poll_and_render(&state, &source, &schedule, &renderer)
            .await
            .unwrap();
        assert_eq!(snapshot.candles.len(), 1);
        assert_eq!(snapshot.counters.fetch_failures, 1);
        assert_eq!(snapshot.counters.cycles, 1);
        assert!(!chart.bytes.is_empty());
    }
}
