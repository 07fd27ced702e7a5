//! Scheduler configuration.

use serde::{Deserialize, Serialize};

/// Retries allowed after a session-expired failure before the item fails.
pub const DEFAULT_RETRY_LIMIT: u32 = 1;

/// Capacity of the transition broadcast channel.
pub const DEFAULT_TRANSITION_CAPACITY: usize = 1024;

/// Tunables for the work scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// An item whose attempt counter exceeds this when recovery begins is
    /// failed with "session not found".
    pub retry_limit: u32,

    /// Transitions buffered per subscriber before it starts lagging.
    pub transition_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry_limit: DEFAULT_RETRY_LIMIT,
            transition_capacity: DEFAULT_TRANSITION_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: SchedulerConfig = serde_json::from_str(r#"{"retry_limit": 3}"#).unwrap();
        assert_eq!(config.retry_limit, 3);
        assert_eq!(config.transition_capacity, DEFAULT_TRANSITION_CAPACITY);
    }
}
