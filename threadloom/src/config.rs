use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_CORE_POOL_SIZE: usize = 2;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_millis(100);
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "threadloom-worker-";

/// Configuration for a `ThreadPool`.
///
/// The pool copies the configuration at construction and never changes it
/// afterwards. `ThreadPool::new` runs [`PoolConfig::validate`] and refuses
/// to start with an invalid configuration.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Workers created at construction and kept alive while idle.
    pub core_pool_size: usize,

    /// Hard ceiling on the number of workers.
    pub max_pool_size: usize,

    /// When fewer workers than this are busy, `execute` tries to add one.
    pub min_spare_threads: usize,

    /// How long a worker above the core size may sit idle before retiring.
    pub keep_alive: Duration,

    /// Capacity of each worker's dedicated queue.
    pub queue_capacity: usize,

    /// How long `execute` waits for space in a full queue before rejecting.
    pub enqueue_timeout: Duration,

    /// Prefix for worker thread names; a sequence number is appended.
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_pool_size: DEFAULT_CORE_POOL_SIZE,
            max_pool_size: num_cpus::get().max(DEFAULT_CORE_POOL_SIZE),
            min_spare_threads: 0,
            keep_alive: DEFAULT_KEEP_ALIVE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
        }
    }
}

impl PoolConfig {
    /// Configuration with the five sizing parameters set and the rest defaulted.
    pub fn new(
        core_pool_size: usize,
        max_pool_size: usize,
        min_spare_threads: usize,
        keep_alive: Duration,
        queue_capacity: usize,
    ) -> Self {
        Self {
            core_pool_size,
            max_pool_size,
            min_spare_threads,
            keep_alive,
            queue_capacity,
            ..Default::default()
        }
    }

    pub fn with_enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.enqueue_timeout = timeout;
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Check every invariant, reporting the first one that fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.core_pool_size == 0 {
            return Err(ConfigError::ZeroCorePoolSize);
        }
        if self.max_pool_size < self.core_pool_size {
            return Err(ConfigError::MaxBelowCore {
                core: self.core_pool_size,
                max: self.max_pool_size,
            });
        }
        if self.keep_alive.is_zero() {
            return Err(ConfigError::ZeroKeepAlive);
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.enqueue_timeout.is_zero() {
            return Err(ConfigError::ZeroEnqueueTimeout);
        }
        if self.thread_name_prefix.is_empty() {
            return Err(ConfigError::EmptyThreadNamePrefix);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = PoolConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.max_pool_size >= config.core_pool_size);
        assert_eq!(config.enqueue_timeout, Duration::from_millis(100));
    }

    #[test]
    fn test_first_violation_is_reported() {
        // Both core and queue capacity are wrong; core is checked first
        let config = PoolConfig::new(0, 4, 0, Duration::from_secs(1), 0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroCorePoolSize));
    }

    #[test]
    fn test_max_equal_to_core_is_allowed() {
        let config = PoolConfig::new(3, 3, 5, Duration::from_millis(1), 1);
        assert!(config.validate().is_ok());
    }
}
