pub mod client;
pub mod payload;

use std::future::Future;

use anyhow::Result;

use crate::types::FetchBatch;

pub use client::RitClient;

/// Which endpoints one poll should hit. Decided by the poll schedule so the
/// source itself stays stateless about cadence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchPlan {
    pub status: bool,
    pub price: bool,
    pub news: bool,
    /// Only deliver news with a sequence above this cursor.
    pub news_since: Option<i64>,
    /// Pull up to this many history rows for backfill.
    pub backfill: Option<usize>,
}

/// Supplier of already-fetched tick batches. All network I/O and its timeouts
/// live behind this seam; the session never blocks on it.
pub trait TickSource: Send + Sync {
    fn fetch_batch(&self, plan: FetchPlan) -> impl Future<Output = Result<FetchBatch>> + Send;
}
