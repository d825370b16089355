// =============================================================================
// RIT payloads — strict optional-field records for upstream JSON
// =============================================================================
//
// Upstream shapes are not trusted: every field is optional and defaulted, and
// the conversions below decide what a usable record is.
// =============================================================================

use serde::Deserialize;

use crate::news::RawNews;
use crate::status_monitor::RawStatus;
use crate::types::{SimPhase, Tick};

/// `GET /case`. Fields the board does not read are left to serde to skip.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CasePayload {
    #[serde(default)]
    pub tick: Option<i64>,
    #[serde(default)]
    pub ticks_per_period: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
}

impl CasePayload {
    /// Upstream period length is authoritative; `fallback` only fills in when
    /// the payload carries none. An unrecognised status string leaves the
    /// phase unset so the monitor rejects the payload.
    pub fn into_raw_status(self, fallback: Option<i64>) -> RawStatus {
        RawStatus {
            phase: self.status.as_deref().and_then(SimPhase::parse),
            elapsed_ticks: self.tick,
            tick_limit: self.ticks_per_period.filter(|n| *n > 0).or(fallback),
        }
    }
}

/// One element of `GET /securities`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityPayload {
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub last: Option<f64>,
}

/// One element of `GET /news`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewsPayload {
    #[serde(default)]
    pub news_id: Option<i64>,
    #[serde(default)]
    pub headline: Option<String>,
}

impl From<NewsPayload> for RawNews {
    fn from(p: NewsPayload) -> Self {
        RawNews {
            id: p.news_id,
            headline: p.headline,
            seq: p.news_id,
        }
    }
}

/// Order news oldest first. Upstream lists newest first; items with an id
/// are sorted by it, the rest keep their reversed position.
pub fn news_oldest_first(mut items: Vec<NewsPayload>) -> Vec<RawNews> {
    items.reverse();
    if items.iter().all(|n| n.news_id.is_some()) {
        items.sort_by_key(|n| n.news_id);
    }
    items.into_iter().map(RawNews::from).collect()
}

/// One row of `GET /securities/history`. Rows may be OHLC bars or plain price
/// points.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryRow {
    #[serde(default, alias = "timestamp", alias = "time")]
    pub tick: Option<i64>,
    #[serde(default)]
    pub open: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub close: Option<f64>,
    #[serde(default)]
    pub last: Option<f64>,
    #[serde(default)]
    pub price: Option<f64>,
}

impl HistoryRow {
    /// A complete OHLC bar replays as open, high, low, close at the bar's
    /// tick; anything else yields a single tick at its closing price.
    pub fn to_ticks(&self) -> Vec<Tick> {
        let Some(time) = self.tick else {
            return Vec::new();
        };
        match (self.open, self.high, self.low, self.close) {
            (Some(o), Some(h), Some(l), Some(c)) => [o, h, l, c]
                .into_iter()
                .map(|p| Tick::new(time, p))
                .collect(),
            _ => self
                .close
                .or(self.last)
                .or(self.price)
                .map(|p| Tick::new(time, p))
                .into_iter()
                .collect(),
        }
    }
}

/// The history endpoint answers with a bare list or a wrapped one.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HistoryEnvelope {
    Rows(Vec<HistoryRow>),
    History { history: Vec<HistoryRow> },
    Data { data: Vec<HistoryRow> },
}

impl HistoryEnvelope {
    /// Usable rows as ticks, oldest first.
    pub fn into_ticks(self) -> Vec<Tick> {
        let rows = match self {
            Self::Rows(rows) | Self::History { history: rows } | Self::Data { data: rows } => rows,
        };
        let mut ticks: Vec<Tick> = rows.iter().flat_map(HistoryRow::to_ticks).collect();
        // Stable sort keeps each bar's open/high/low/close order.
        ticks.sort_by_key(|t| t.time);
        ticks
    }
}
