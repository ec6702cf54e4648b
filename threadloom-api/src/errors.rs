//! # Submission Error Types
//!
//! Errors a caller can get back synchronously when handing work to an
//! executor. All of them are recoverable from the caller's point of view:
//! retry later, back off, or drop the work.

use std::time::Duration;

use thiserror::Error;

/// Marker error for an operation abandoned because its cancellation token fired.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation was cancelled")]
pub struct Cancelled;

/// Why an executor refused a task.
///
/// A rejected task is never run and never partially enqueued.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectedExecution {
    /// The executor has been shut down and accepts no more work.
    #[error("Executor is shut down")]
    Shutdown,

    /// The destination queue stayed full for the whole enqueue wait.
    #[error("Queue #{index} is full; no space freed up within {waited:?}")]
    Overloaded {
        /// Index of the queue the task was routed to.
        index: usize,
        /// How long the caller waited for space.
        waited: Duration,
    },

    /// The caller's wait for queue space was cancelled.
    #[error("Interrupted while waiting for queue space")]
    Interrupted(#[source] Cancelled),

    /// The destination queue closed between routing and enqueueing.
    #[error("Queue #{index} closed before the task could be enqueued")]
    QueueClosed { index: usize },
}

impl RejectedExecution {
    /// Whether retrying the same submission later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Overloaded { .. } | Self::QueueClosed { .. })
    }
}
