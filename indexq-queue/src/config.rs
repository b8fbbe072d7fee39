//! Processor configuration.

use crate::queue::DEFAULT_QUEUE_ROOT;
use std::time::Duration;

/// Configuration for an [`ActionProcessor`](crate::ActionProcessor).
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Root name the persistent queue lives under.
    pub queue_root: String,
    /// Wait between polls when running continuously.
    pub poll_interval: Duration,
    /// How often `engage`/`disengage` retry after a commit conflict.
    pub max_lifecycle_retries: u32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            queue_root: DEFAULT_QUEUE_ROOT.to_string(),
            poll_interval: Duration::from_secs(5),
            max_lifecycle_retries: 3,
        }
    }
}

impl ProcessorConfig {
    #[must_use]
    pub fn with_queue_root(mut self, root: impl Into<String>) -> Self {
        self.queue_root = root.into();
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_lifecycle_retries(mut self, retries: u32) -> Self {
        self.max_lifecycle_retries = retries;
        self
    }
}
