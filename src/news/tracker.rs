// =============================================================================
// News Tracker — two-slot buffer of the latest distinct headlines
// =============================================================================
//
// The tracker keeps `current` and `previous` only. A delivery whose identity
// matches `current` is a duplicate and changes nothing. Identity is the
// upstream id when present, otherwise the exact headline text.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::IngestRejection;

/// News payload as handed over by the tick source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawNews {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub headline: Option<String>,
    /// Upstream delivery sequence (monotonic per feed), used to skip items
    /// already delivered by an earlier poll.
    #[serde(default)]
    pub seq: Option<i64>,
}

impl RawNews {
    pub fn with_id(id: i64, headline: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            headline: Some(headline.into()),
            seq: Some(id),
        }
    }

    pub fn text(headline: impl Into<String>) -> Self {
        Self {
            id: None,
            headline: Some(headline.into()),
            seq: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum NewsIdentity {
    Id(i64),
    Text(String),
}

/// A recorded headline. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub identity: NewsIdentity,
    pub headline: String,
    pub observed_order: u64,
}

/// `current` is the most recently observed distinct item, `previous` the one
/// before it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewsPair {
    pub current: Option<NewsItem>,
    pub previous: Option<NewsItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewsOutcome {
    Shifted { observed_order: u64 },
    Duplicate,
}

/// Tally of one [`NewsTracker::observe_batch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchTally {
    pub shifted: u32,
    pub duplicates: u32,
    pub malformed: u32,
    pub stale: u32,
}

#[derive(Debug, Default)]
pub struct NewsTracker {
    current: Option<NewsItem>,
    previous: Option<NewsItem>,
    next_order: u64,
    highest_seq: Option<i64>,
}

impl NewsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, raw: RawNews) -> Result<NewsOutcome, IngestRejection> {
        let headline = match raw.headline {
            Some(h) if !h.trim().is_empty() => h,
            _ => return Err(IngestRejection::MalformedNewsItem),
        };

        let identity = match raw.id {
            Some(id) => NewsIdentity::Id(id),
            None => NewsIdentity::Text(headline.clone()),
        };

        if self
            .current
            .as_ref()
            .is_some_and(|cur| cur.identity == identity)
        {
            return Ok(NewsOutcome::Duplicate);
        }

        let observed_order = self.next_order;
        self.next_order += 1;

        debug!(observed_order, headline = %headline, "news headline observed");

        let item = NewsItem {
            identity,
            headline,
            observed_order,
        };
        self.previous = self.current.replace(item);
        Ok(NewsOutcome::Shifted { observed_order })
    }

    /// Observe a poll's worth of items, oldest first. Items whose `seq` is not
    /// above the highest already delivered are skipped as stale.
    pub fn observe_batch(&mut self, items: impl IntoIterator<Item = RawNews>) -> BatchTally {
        let mut tally = BatchTally::default();
        for raw in items {
            if let (Some(seq), Some(high)) = (raw.seq, self.highest_seq) {
                if seq <= high {
                    tally.stale += 1;
                    continue;
                }
            }
            let seq = raw.seq;
            match self.observe(raw) {
                Ok(NewsOutcome::Shifted { .. }) => tally.shifted += 1,
                Ok(NewsOutcome::Duplicate) => tally.duplicates += 1,
                Err(_) => tally.malformed += 1,
            }
            if let Some(seq) = seq {
                self.highest_seq = Some(self.highest_seq.map_or(seq, |h| h.max(seq)));
            }
        }
        tally
    }

    pub fn latest_pair(&self) -> NewsPair {
        NewsPair {
            current: self.current.clone(),
            previous: self.previous.clone(),
        }
    }

    /// Highest upstream sequence delivered so far; the poll cycle passes it as
    /// the `since` cursor.
    pub fn highest_seq(&self) -> Option<i64> {
        self.highest_seq
    }
}
