pub mod errors;
pub mod scheduler;
pub mod store;

use async_trait::async_trait;
use chrono::NaiveDate;

use errors::AggregationError;

/// One unit of aggregation work: the aggregated rows for a machine on the
/// day its records were inserted are stale.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PendingUpdateKey {
    pub insert_date: NaiveDate,
    pub machine_name: String,
}

impl PendingUpdateKey {
    pub fn new(insert_date: NaiveDate, machine_name: impl Into<String>) -> Self {
        Self {
            insert_date,
            machine_name: machine_name.into(),
        }
    }
}

impl std::fmt::Display for PendingUpdateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} / {}", self.insert_date, self.machine_name)
    }
}

/// Storage side of the aggregation update.
#[async_trait]
pub trait AggregationStore: Send + Sync {
    /// In one transaction, take the oldest pending key, recompute its
    /// aggregated rows and mark it done. Returns the processed key, or
    /// `None` when nothing is pending. On error the transaction is rolled
    /// back and the key stays pending.
    async fn update_next(&self) -> Result<Option<PendingUpdateKey>, AggregationError>;
}

/// Hook the insertion path calls after a committed insert.
pub trait InsertNotify: Send + Sync {
    fn notify_insert(&self);
}
