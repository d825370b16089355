// =============================================================================
// Runtime Configuration — board settings with atomic save
// =============================================================================
//
// Every tunable lives here: upstream API location, candle bucketing, poll
// cadences and chart layout. All fields carry a serde default so that an
// older or partial config file always loads.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::{LateTickPolicy, TimeBasis};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_api_base_url() -> String {
    "http://localhost:9999/v1".to_string()
}

fn default_auth_header() -> String {
    "X-API-Key".to_string()
}

fn default_candle_interval() -> i64 {
    10
}

fn default_case_poll_ms() -> u64 {
    500
}

fn default_news_poll_ms() -> u64 {
    1000
}

fn default_history_backfill_limit() -> usize {
    15_000
}

fn default_request_timeout_ms() -> u64 {
    2000
}

fn default_bind_addr() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_refresh_ms() -> u64 {
    1000
}

fn default_chart_width() -> u32 {
    1600
}

fn default_chart_height() -> u32 {
    900
}

fn default_current_headline_len() -> usize {
    85
}

fn default_current_headline_lines() -> usize {
    4
}

fn default_previous_headline_len() -> usize {
    110
}

fn default_previous_headline_lines() -> usize {
    3
}

fn default_up_color() -> String {
    "#008b66".to_string()
}

fn default_down_color() -> String {
    "#d60000".to_string()
}

// =============================================================================
// ChartConfig
// =============================================================================

/// Layout parameters consumed by the chart renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartConfig {
    #[serde(default = "default_chart_width")]
    pub width: u32,

    #[serde(default = "default_chart_height")]
    pub height: u32,

    /// Draw only the newest N candles. `None` draws all of them.
    #[serde(default)]
    pub visible_max: Option<usize>,

    /// Column width of the current headline.
    #[serde(default = "default_current_headline_len")]
    pub current_headline_len: usize,

    #[serde(default = "default_current_headline_lines")]
    pub current_headline_lines: usize,

    #[serde(default = "default_previous_headline_len")]
    pub previous_headline_len: usize,

    #[serde(default = "default_previous_headline_lines")]
    pub previous_headline_lines: usize,

    /// Colour of candles closing at or above their open (`#rrggbb`).
    #[serde(default = "default_up_color")]
    pub up_color: String,

    #[serde(default = "default_down_color")]
    pub down_color: String,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            width: default_chart_width(),
            height: default_chart_height(),
            visible_max: None,
            current_headline_len: default_current_headline_len(),
            current_headline_lines: default_current_headline_lines(),
            previous_headline_len: default_previous_headline_len(),
            previous_headline_lines: default_previous_headline_lines(),
            up_color: default_up_color(),
            down_color: default_down_color(),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level configuration for the candle board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Upstream API --------------------------------------------------------

    /// Base URL of the simulation API, including the version prefix.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// API key sent in `auth_header` on every request. Empty disables it.
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_auth_header")]
    pub auth_header: String,

    /// Ticker to chart. `None` picks the first security the API reports.
    #[serde(default)]
    pub ticker: Option<String>,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    // --- Aggregation ---------------------------------------------------------

    #[serde(default)]
    pub time_basis: TimeBasis,

    /// Candle width in ticks (`sim_tick`) or seconds (`wall_clock`).
    #[serde(default = "default_candle_interval")]
    pub candle_interval: i64,

    #[serde(default)]
    pub late_tick_policy: LateTickPolicy,

    /// Retain at most this many sealed candles. `None` keeps the whole session.
    #[serde(default)]
    pub max_sealed_candles: Option<usize>,

    /// Tick limit used only when the case payload carries no period length.
    #[serde(default)]
    pub tick_limit_fallback: Option<i64>,

    // --- Polling -------------------------------------------------------------

    #[serde(default = "default_case_poll_ms")]
    pub case_poll_ms: u64,

    #[serde(default = "default_news_poll_ms")]
    pub news_poll_ms: u64,

    /// Rows requested when backfilling from the price history endpoint.
    #[serde(default = "default_history_backfill_limit")]
    pub history_backfill_limit: usize,

    /// Ingest on this fixed cadence in the background instead of on every
    /// chart request.
    #[serde(default)]
    pub background_poll_ms: Option<u64>,

    // --- Web shell -----------------------------------------------------------

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Page auto-refresh interval for the chart image.
    #[serde(default = "default_refresh_ms")]
    pub refresh_ms: u64,

    #[serde(default)]
    pub chart: ChartConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_key: String::new(),
            auth_header: default_auth_header(),
            ticker: None,
            request_timeout_ms: default_request_timeout_ms(),
            time_basis: TimeBasis::default(),
            candle_interval: default_candle_interval(),
            late_tick_policy: LateTickPolicy::default(),
            max_sealed_candles: None,
            tick_limit_fallback: None,
            case_poll_ms: default_case_poll_ms(),
            news_poll_ms: default_news_poll_ms(),
            history_backfill_limit: default_history_backfill_limit(),
            background_poll_ms: None,
            bind_addr: default_bind_addr(),
            refresh_ms: default_refresh_ms(),
            chart: ChartConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;
        config.validate();

        info!(
            path = %path.display(),
            api = %config.api_base_url,
            time_basis = %config.time_basis,
            candle_interval = config.candle_interval,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Apply `RIT_API_URL`, `RIT_API_KEY`, `CANDLE_BOARD_TICKER` and
    /// `CANDLE_BOARD_BIND_ADDR` from the environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("RIT_API_URL").filter(|s| !s.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(key) = lookup("RIT_API_KEY") {
            self.api_key = key;
        }
        if let Some(ticker) = lookup("CANDLE_BOARD_TICKER").filter(|s| !s.trim().is_empty()) {
            self.ticker = Some(ticker.trim().to_uppercase());
        }
        if let Some(addr) = lookup("CANDLE_BOARD_BIND_ADDR").filter(|s| !s.trim().is_empty()) {
            self.bind_addr = addr.trim().to_string();
        }
    }

    /// Clamp values that would make the board misbehave.
    pub fn validate(&mut self) {
        if self.candle_interval < 1 {
            warn!(candle_interval = self.candle_interval, "candle_interval below 1, clamping");
            self.candle_interval = 1;
        }
        if self.max_sealed_candles == Some(0) {
            warn!("max_sealed_candles = 0 would discard every sealed candle, disabling bound");
            self.max_sealed_candles = None;
        }
        let chart = &mut self.chart;
        chart.current_headline_len = chart.current_headline_len.max(1);
        chart.current_headline_lines = chart.current_headline_lines.max(1);
        chart.previous_headline_len = chart.previous_headline_len.max(1);
        chart.previous_headline_lines = chart.previous_headline_lines.max(1);
        chart.width = chart.width.max(320);
        chart.height = chart.height.max(240);
        self.api_base_url = self.api_base_url.trim_end_matches('/').to_string();
    }
}
