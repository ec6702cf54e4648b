//! The generic execution capability.
//!
//! Anything that schedules work (an operator chain, a timer wheel, a test
//! harness) only needs somewhere to send a boxed closure. `Executor` is that
//! seam; the worker pool is one implementation.

use std::sync::Arc;

use crate::errors::RejectedExecution;

/// A unit of work with no result.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Something that can run a [`Task`] at some point, on some thread.
///
/// Implementations decide where and when the task runs. The only contract is
/// that an `Ok(())` return means the task has been accepted and will be run
/// at most once, and an `Err` means it will never run.
pub trait Executor: Send + Sync {
    /// Hand a boxed task to the executor.
    fn execute_task(&self, task: Task) -> Result<(), RejectedExecution>;

    /// Convenience wrapper that boxes the closure.
    fn execute_fn<F>(&self, f: F) -> Result<(), RejectedExecution>
    where
        F: FnOnce() + Send + 'static,
        Self: Sized,
    {
        self.execute_task(Box::new(f))
    }
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute_task(&self, task: Task) -> Result<(), RejectedExecution> {
        (**self).execute_task(task)
    }
}

impl<E: Executor + ?Sized> Executor for &E {
    fn execute_task(&self, task: Task) -> Result<(), RejectedExecution> {
        (**self).execute_task(task)
    }
}
