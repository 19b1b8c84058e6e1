//! Queue configuration

use serde::Deserialize;

/// Default queue capacity (events)
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default events per transaction
pub const DEFAULT_TRANSACTION_CAPACITY: usize = 100;

/// One memory queue
///
/// ```toml
/// [queues.main]
/// capacity = 10000
/// transaction-capacity = 500
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct QueueConfig {
    /// Committed plus in-flight events the queue holds
    pub capacity: usize,

    /// Maximum puts or takes in one transaction
    pub transaction_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            transaction_capacity: DEFAULT_TRANSACTION_CAPACITY,
        }
    }
}
