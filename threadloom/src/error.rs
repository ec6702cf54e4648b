use std::io;
use std::time::Duration;

use thiserror::Error;

pub use threadloom_api::errors::{Cancelled, RejectedExecution};

/// A `PoolConfig` invariant that does not hold.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("core_pool_size must be greater than zero")]
    ZeroCorePoolSize,
    #[error("max_pool_size ({max}) must be at least core_pool_size ({core})")]
    MaxBelowCore { core: usize, max: usize },
    #[error("keep_alive must be a non-zero duration")]
    ZeroKeepAlive,
    #[error("queue_capacity must be greater than zero")]
    ZeroQueueCapacity,
    #[error("enqueue_timeout must be a non-zero duration")]
    ZeroEnqueueTimeout,
    #[error("thread_name_prefix must not be empty")]
    EmptyThreadNamePrefix,
}

/// Errors raised while constructing a pool.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Invalid pool configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Errors returned when retrieving the outcome of a submitted task.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task panicked: {0}")]
    Panicked(String),
    #[error("Task failed: {0}")]
    Failed(#[source] anyhow::Error),
    #[error("Task was cancelled before it ran")]
    Cancelled,
    #[error("Timed out after {0:?} waiting for task result")]
    Timeout(Duration),
    #[error("Task result was already retrieved")]
    Retrieved,
}

impl TaskError {
    /// True for failures raised by the task body itself.
    pub fn is_task_failure(&self) -> bool {
        matches!(self, TaskError::Panicked(_) | TaskError::Failed(_))
    }
}
