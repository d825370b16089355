// =============================================================================
// Shared types used across the candle board
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::news::RawNews;
use crate::status_monitor::RawStatus;

/// One timestamped price observation from the upstream simulation.
///
/// `time` is expressed in the session's [`TimeBasis`] units: simulation ticks,
/// or whole seconds elapsed since the session started.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub time: i64,
    pub price: f64,
}

impl Tick {
    pub fn new(time: i64, price: f64) -> Self {
        Self { time, price }
    }
}

/// Simulation phase as reported by the case endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimPhase {
    PreStart,
    Active,
    Paused,
    Stopped,
}

impl Default for SimPhase {
    fn default() -> Self {
        Self::PreStart
    }
}

impl SimPhase {
    /// Map an upstream status string onto a phase. Unknown strings yield `None`
    /// so the caller can treat the payload as malformed.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" | "running" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "stopped" | "ended" | "finished" | "closed" => Some(Self::Stopped),
            "pre_start" | "not_started" | "pending" | "waiting" => Some(Self::PreStart),
            _ => None,
        }
    }
}

impl std::fmt::Display for SimPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PreStart => write!(f, "PRE_START"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Clock used to stamp ticks and to drive time-based candle sealing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBasis {
    /// Upstream simulation tick counter; candle interval is in ticks.
    SimTick,
    /// Seconds elapsed since the session started; candle interval is in seconds.
    WallClock,
}

impl Default for TimeBasis {
    fn default() -> Self {
        Self::WallClock
    }
}

impl std::fmt::Display for TimeBasis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SimTick => write!(f, "sim_tick"),
            Self::WallClock => write!(f, "wall_clock"),
        }
    }
}

/// What to do with a tick whose bucket precedes the open candle's bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LateTickPolicy {
    /// Drop the tick and count it.
    Discard,
    /// Fold the tick into the matching sealed candle if it is still retained.
    ReopenSealed,
}

impl Default for LateTickPolicy {
    fn default() -> Self {
        Self::Discard
    }
}

/// Upstream endpoint a [`FetchBatch`] part came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Case,
    Securities,
    News,
    History,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Case => write!(f, "case"),
            Self::Securities => write!(f, "securities"),
            Self::News => write!(f, "news"),
            Self::History => write!(f, "history"),
        }
    }
}

/// One endpoint that failed during an otherwise usable poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointFailure {
    pub endpoint: Endpoint,
    pub message: String,
}

impl std::fmt::Display for EndpointFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.endpoint, self.message)
    }
}

/// Everything one poll of the tick source produced, already fetched.
#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    /// Ticker the price belongs to.
    pub ticker: Option<String>,
    /// Latest traded price of the tracked ticker, stamped by the session clock.
    pub last_price: Option<f64>,
    /// Historical ticks (simulation-tick basis), oldest first.
    pub backfill: Vec<Tick>,
    pub status: Option<RawStatus>,
    /// News payloads, oldest first.
    pub news: Vec<RawNews>,
    /// Endpoint failures that did not abort the whole poll.
    pub errors: Vec<EndpointFailure>,
}

impl FetchBatch {
    pub fn failed(&self, endpoint: Endpoint) -> bool {
        self.errors.iter().any(|e| e.endpoint == endpoint)
    }
}
