// =============================================================================
// Status Monitor — projection of the upstream simulation status
// =============================================================================
//
// The upstream case is the only source of truth for simulation time. This
// component stores the last complete status verbatim and derives display
// values from it; it runs no clock of its own.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::IngestRejection;
use crate::types::SimPhase;

/// Status payload with every field optional. A payload missing any field is
/// rejected as a whole and the previous status is retained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawStatus {
    #[serde(default)]
    pub phase: Option<SimPhase>,
    #[serde(default)]
    pub elapsed_ticks: Option<i64>,
    #[serde(default)]
    pub tick_limit: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimStatus {
    pub phase: SimPhase,
    pub elapsed_ticks: i64,
    pub tick_limit: i64,
}

impl SimStatus {
    pub fn remaining(&self) -> i64 {
        self.tick_limit.saturating_sub(self.elapsed_ticks).max(0)
    }
}

/// Derived, render-ready view of the simulation status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusView {
    pub phase: SimPhase,
    pub elapsed_ticks: i64,
    pub tick_limit: i64,
    pub remaining: i64,
    /// `MM:SS`, one tick counted as one second.
    pub remaining_display: String,
    /// The case stopped or ran out of ticks; the board freezes.
    pub finished: bool,
    /// Prices are ingested. False while the case is paused, not yet started
    /// or finished; true before any status has been seen.
    pub live: bool,
    /// Whether any complete status has been observed yet.
    pub observed: bool,
}

#[derive(Debug, Default)]
pub struct StatusMonitor {
    last: Option<SimStatus>,
}

impl StatusMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, raw: RawStatus) -> Result<SimStatus, IngestRejection> {
        let status = match raw {
            RawStatus {
                phase: Some(phase),
                elapsed_ticks: Some(elapsed_ticks),
                tick_limit: Some(tick_limit),
            } => SimStatus {
                phase,
                elapsed_ticks,
                tick_limit,
            },
            RawStatus { phase: None, .. } => return Err(self.reject("phase")),
            RawStatus {
                elapsed_ticks: None,
                ..
            } => return Err(self.reject("elapsed_ticks")),
            RawStatus { tick_limit: None, .. } => return Err(self.reject("tick_limit")),
        };
        self.last = Some(status);
        Ok(status)
    }

    fn reject(&self, missing: &'static str) -> IngestRejection {
        warn!(missing, retained = ?self.last, "malformed status payload, keeping previous");
        IngestRejection::MalformedStatus(missing)
    }

    pub fn last(&self) -> Option<SimStatus> {
        self.last
    }

    pub fn derive(&self) -> StatusView {
        let status = self.last.unwrap_or(SimStatus {
            phase: SimPhase::PreStart,
            elapsed_ticks: 0,
            tick_limit: 0,
        });
        let remaining = status.remaining();
        let finished = self.last.is_some()
            && (status.phase == SimPhase::Stopped || (status.tick_limit > 0 && remaining == 0));

        StatusView {
            phase: status.phase,
            elapsed_ticks: status.elapsed_ticks,
            tick_limit: status.tick_limit,
            remaining,
            remaining_display: format_remaining(remaining),
            finished,
            live: self.last.is_none() || (status.phase == SimPhase::Active && !finished),
            observed: self.last.is_some(),
        }
    }
}

/// Render a tick count as `MM:SS`.
pub fn format_remaining(ticks: i64) -> String {
    let ticks = ticks.max(0);
    format!("{:02}:{:02}", ticks / 60, ticks % 60)
}
