//! # Lifecycle Events
//!
//! The pool reports what it does as discrete events instead of writing to a
//! global logger. A sink is injected at construction time; the pool only
//! defines the event shapes.

use std::fmt;

use tracing::Level;

use crate::errors::RejectedExecution;

/// Why a worker left the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireReason {
    /// Poll timed out with more workers than the core size.
    Idle,
    /// Queue was closed by a graceful shutdown and fully drained.
    Drained,
    /// Stop signal from a forced shutdown.
    Cancelled,
}

impl fmt::Display for RetireReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RetireReason::Idle => "idle",
            RetireReason::Drained => "drained",
            RetireReason::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A discrete lifecycle event emitted by the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// A worker thread was started.
    WorkerCreated { worker: String },

    /// A worker thread finished its loop and left the registry.
    WorkerRetired { worker: String, reason: RetireReason },

    /// A task was placed in a worker queue.
    TaskAccepted { queue_index: usize },

    /// A task was refused.
    TaskRejected { reason: RejectedExecution },

    /// A task submitted through `execute` panicked on a worker.
    TaskFailed { worker: String, message: String },

    /// Shutdown was initiated; `graceful` is false for a forced stop.
    ShutdownStarted { graceful: bool },
}

impl PoolEvent {
    /// Suggested severity for sinks that log events.
    pub fn level(&self) -> Level {
        match self {
            PoolEvent::TaskAccepted { .. } => Level::DEBUG,
            PoolEvent::WorkerCreated { .. }
            | PoolEvent::WorkerRetired { .. }
            | PoolEvent::ShutdownStarted { .. } => Level::INFO,
            PoolEvent::TaskRejected { .. } => Level::WARN,
            PoolEvent::TaskFailed { .. } => Level::ERROR,
        }
    }
}

impl fmt::Display for PoolEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolEvent::WorkerCreated { worker } => write!(f, "created worker {worker}"),
            PoolEvent::WorkerRetired { worker, reason } => {
                write!(f, "worker {worker} retired ({reason})")
            }
            PoolEvent::TaskAccepted { queue_index } => {
                write!(f, "task accepted into queue #{queue_index}")
            }
            PoolEvent::TaskRejected { reason } => write!(f, "task rejected: {reason}"),
            PoolEvent::TaskFailed { worker, message } => {
                write!(f, "task failed on {worker}: {message}")
            }
            PoolEvent::ShutdownStarted { graceful: true } => f.write_str("shutdown started"),
            PoolEvent::ShutdownStarted { graceful: false } => {
                f.write_str("immediate shutdown started")
            }
        }
    }
}

/// Receives pool events.
///
/// Called synchronously on whichever thread produced the event (a caller of
/// `execute`, or a worker thread), so implementations should be cheap and
/// must not block on the pool itself.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &PoolEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn on_event(&self, _event: &PoolEvent) {}
}
