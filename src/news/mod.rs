pub mod headline;
pub mod tracker;

pub use headline::wrap_headline;
pub use tracker::{NewsItem, NewsOutcome, NewsPair, NewsTracker, RawNews};
