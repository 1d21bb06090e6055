use std::time::Duration;

use crate::utils::RetryConfig;

use super::aggregator::AggregationPolicy;
use super::correlation_store::{DEFAULT_SHARDS, DEFAULT_TOMBSTONE_CAPACITY};

#[derive(Clone, Debug, PartialEq)]
pub struct FlowConfig {
    /// Size of the transformer worker pool
    pub max_concurrent_transforms: usize,
    pub policy: AggregationPolicy,
    pub retry: RetryConfig,
    /// How long a submitted order may wait for its children before the group
    /// is force-completed. `None` waits indefinitely.
    pub completion_timeout: Option<Duration>,
    pub store_shards: usize,
    /// Closed groups remembered per shard for late-arrival detection
    pub tombstone_capacity: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transforms: 8,
            policy: AggregationPolicy::RequireAll,
            retry: RetryConfig::default(),
            completion_timeout: None,
            store_shards: DEFAULT_SHARDS,
            tombstone_capacity: DEFAULT_TOMBSTONE_CAPACITY,
        }
    }
}

impl FlowConfig {
    /// Emit partial results instead of failing groups
    pub fn best_effort() -> Self {
        Self {
            policy: AggregationPolicy::BestEffort,
            ..Self::default()
        }
    }

    pub fn with_policy(mut self, policy: AggregationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_concurrent_transforms(mut self, workers: usize) -> Self {
        self.max_concurrent_transforms = workers.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_completion_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout = Some(timeout);
        self
    }

    pub fn with_store_shards(mut self, shards: usize) -> Self {
        self.store_shards = shards.max(1);
        self
    }

    pub fn with_tombstone_capacity(mut self, capacity: usize) -> Self {
        self.tombstone_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FlowConfig::default();
        assert_eq!(config.max_concurrent_transforms, 8);
        assert_eq!(config.policy, AggregationPolicy::RequireAll);
        assert_eq!(config.completion_timeout, None);
        assert_eq!(config.store_shards, DEFAULT_SHARDS);
    }

    #[test]
    fn test_builders() {
        let config = FlowConfig::best_effort()
            .with_max_concurrent_transforms(0)
            .with_retry(RetryConfig::none())
            .with_completion_timeout(Duration::from_millis(50));

        assert_eq!(config.policy, AggregationPolicy::BestEffort);
        assert_eq!(config.max_concurrent_transforms, 1);
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.completion_timeout, Some(Duration::from_millis(50)));
    }
}
