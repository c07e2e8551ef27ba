/// Configuration for a [`ReadbackEngine`](crate::ReadbackEngine).
///
/// # Example
///
/// ```rust
/// use readback_engine::EngineConfig;
///
/// let config = EngineConfig::new()
///     .with_queue_capacity(4)
///     .with_pool_limits(16 * 1024 * 1024, 8);
/// assert_eq!(config.queue_capacity, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Capacity of consumer queues created with [`ReadbackQueue::new`](crate::ReadbackQueue::new).
    pub queue_capacity: usize,
    /// Upper bound on bytes kept in the staging free list.
    pub max_pooled_bytes: usize,
    /// Upper bound on buffers kept in the staging free list.
    pub max_pooled_buffers: usize,
    /// Reject submissions from any thread other than the first one that submitted.
    pub enforce_submission_context: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 8,
            max_pooled_bytes: 64 * 1024 * 1024,
            max_pooled_buffers: 16,
            enforce_submission_context: true,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Bound the staging free list by total bytes and buffer count.
    pub fn with_pool_limits(mut self, max_bytes: usize, max_buffers: usize) -> Self {
        self.max_pooled_bytes = max_bytes;
        self.max_pooled_buffers = max_buffers;
        self
    }

    pub fn with_submission_context_check(mut self, enforce: bool) -> Self {
        self.enforce_submission_context = enforce;
        self
    }
}
