use thiserror::Error;

/// Local-recovery conditions raised while folding upstream data into the
/// session. None of these are fatal: the offending input is dropped and
/// counted, and the aggregate stays consistent.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestRejection {
    #[error("non-finite price {0}")]
    NonFinitePrice(f64),

    #[error("non-positive price {0}")]
    NonPositivePrice(f64),

    #[error("late tick for bucket {bucket_start} (newest bucket {newest_bucket})")]
    LateTick {
        bucket_start: i64,
        newest_bucket: i64,
    },

    #[error("news item has no headline")]
    MalformedNewsItem,

    #[error("status payload missing {0}")]
    MalformedStatus(&'static str),
}

impl IngestRejection {
    pub fn is_late(&self) -> bool {
        matches!(self, Self::LateTick { .. })
    }
}
