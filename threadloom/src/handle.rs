//! # Task Handles
//!
//! `submit` wraps a value-producing closure in a [`TaskRunner`] that the
//! worker executes, and gives the caller the matching [`TaskHandle`]. Both
//! halves share one state cell guarded by a mutex, with a condvar to wake
//! callers blocked in [`TaskHandle::get`].
//!
//! ## State Machine
//! ```text
//! NotStarted ──run──▶ Running ──▶ Completed | Failed
//!      │
//!      └──cancel / runner dropped──▶ Cancelled
//! ```
//! A runner that is dropped without running (rejected submission, forced
//! shutdown abandoning its queue) resolves the handle as `Cancelled`, so a
//! waiting caller is never left blocked forever.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::TaskError;

/// Observable state of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    NotStarted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

enum Slot<T> {
    NotStarted,
    Running,
    Completed(T),
    Failed(TaskError),
    Cancelled,
    /// The outcome was handed out by `get_timeout`.
    Retrieved(TaskState),
}

impl<T> Slot<T> {
    fn state(&self) -> TaskState {
        match self {
            Slot::NotStarted => TaskState::NotStarted,
            Slot::Running => TaskState::Running,
            Slot::Completed(_) => TaskState::Completed,
            Slot::Failed(_) => TaskState::Failed,
            Slot::Cancelled => TaskState::Cancelled,
            Slot::Retrieved(state) => *state,
        }
    }

    fn is_terminal(&self) -> bool {
        !matches!(self, Slot::NotStarted | Slot::Running)
    }

    /// Move the outcome out, leaving a `Retrieved` marker behind.
    fn take(&mut self) -> Result<T, TaskError> {
        let state = self.state();
        match std::mem::replace(self, Slot::Retrieved(state)) {
            Slot::Completed(value) => Ok(value),
            Slot::Failed(error) => Err(error),
            Slot::Cancelled => {
                *self = Slot::Cancelled;
                Err(TaskError::Cancelled)
            }
            Slot::Retrieved(_) => Err(TaskError::Retrieved),
            Slot::NotStarted | Slot::Running => unreachable!("take() on unresolved task"),
        }
    }
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    resolved: Condvar,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, outcome: Slot<T>) {
        *self.lock() = outcome;
        self.resolved.notify_all();
    }
}

type Job<T> = Box<dyn FnOnce() -> Result<T, TaskError> + Send + 'static>;

/// Caller-side half of a submitted task.
pub struct TaskHandle<T> {
    shared: Arc<Shared<T>>,
}

/// Worker-side half of a submitted task.
pub(crate) struct TaskRunner<T> {
    shared: Arc<Shared<T>>,
    job: Option<Job<T>>,
}

/// Create a linked runner/handle pair for a closure whose `Err` is a task failure.
pub(crate) fn task_pair<F, T, E>(f: F) -> (TaskRunner<T>, TaskHandle<T>)
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    E: Into<anyhow::Error>,
{
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot::NotStarted),
        resolved: Condvar::new(),
    });
    let job: Job<T> = Box::new(move || f().map_err(|e| TaskError::Failed(e.into())));
    (
        TaskRunner {
            shared: shared.clone(),
            job: Some(job),
        },
        TaskHandle { shared },
    )
}

impl<T> TaskRunner<T> {
    /// Run the job unless the handle was cancelled first.
    pub(crate) fn run(mut self) {
        {
            let mut slot = self.shared.lock();
            if !matches!(*slot, Slot::NotStarted) {
                return;
            }
            *slot = Slot::Running;
        }

        let Some(job) = self.job.take() else {
            return;
        };
        let outcome = match panic::catch_unwind(AssertUnwindSafe(job)) {
            Ok(Ok(value)) => Slot::Completed(value),
            Ok(Err(error)) => Slot::Failed(error),
            Err(payload) => Slot::Failed(TaskError::Panicked(crate::worker::panic_message(&*payload))),
        };
        self.shared.resolve(outcome);
    }
}

impl<T> Drop for TaskRunner<T> {
    fn drop(&mut self) {
        let mut slot = self.shared.lock();
        if matches!(*slot, Slot::NotStarted) {
            *slot = Slot::Cancelled;
            drop(slot);
            self.shared.resolved.notify_all();
        }
    }
}

impl<T> TaskHandle<T> {
    /// Block until the task resolves and return its outcome.
    pub fn get(self) -> Result<T, TaskError> {
        let mut slot = self.shared.lock();
        while !slot.is_terminal() {
            slot = self
                .shared
                .resolved
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
        slot.take()
    }

    /// Like [`get`](Self::get) but gives up after `timeout`.
    ///
    /// On timeout the task is left untouched and `TaskError::Timeout` is
    /// returned; the handle can be waited on again. A successful call moves
    /// the outcome out, and later retrievals return `TaskError::Retrieved`.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, TaskError> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.lock();
        while !slot.is_terminal() {
            let now = Instant::now();
            if now >= deadline {
                return Err(TaskError::Timeout(timeout));
            }
            slot = self
                .shared
                .resolved
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        slot.take()
    }

    /// Cancel the task if it has not started. Returns whether this call cancelled it.
    pub fn cancel(&self) -> bool {
        let mut slot = self.shared.lock();
        if matches!(*slot, Slot::NotStarted) {
            *slot = Slot::Cancelled;
            drop(slot);
            self.shared.resolved.notify_all();
            true
        } else {
            false
        }
    }

    pub fn state(&self) -> TaskState {
        self.shared.lock().state()
    }

    pub fn is_done(&self) -> bool {
        self.shared.lock().is_terminal()
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::thread;

    fn infallible<T: Send + 'static>(
        f: impl FnOnce() -> T + Send + 'static,
    ) -> (TaskRunner<T>, TaskHandle<T>) {
        task_pair(move || Ok::<_, Infallible>(f()))
    }

    #[test]
    fn test_run_then_get() {
        let (runner, handle) = infallible(|| 21 * 2);
        assert_eq!(handle.state(), TaskState::NotStarted);
        runner.run();
        assert_eq!(handle.state(), TaskState::Completed);
        assert_eq!(handle.get().unwrap(), 42);
    }

    #[test]
    fn test_get_blocks_until_resolved() {
        let (runner, handle) = infallible(|| "done");
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            runner.run();
        });
        assert_eq!(handle.get().unwrap(), "done");
        worker.join().unwrap();
    }

    #[test]
    fn test_error_is_captured() {
        let (runner, handle) = task_pair(|| Err::<u8, _>(anyhow::anyhow!("disk on fire")));
        runner.run();
        assert_eq!(handle.state(), TaskState::Failed);
        match handle.get() {
            Err(TaskError::Failed(e)) => assert_eq!(e.to_string(), "disk on fire"),
            other => panic!("unexpected outcome: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_panic_is_captured() {
        let (runner, handle) = infallible(|| -> u8 { panic!("kaboom") });
        runner.run();
        match handle.get() {
            Err(TaskError::Panicked(msg)) => assert_eq!(msg, "kaboom"),
            other => panic!("unexpected outcome: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_timeout_leaves_state_alone() {
        let (runner, handle) = infallible(|| 7);
        let err = handle.get_timeout(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, TaskError::Timeout(_)));
        assert_eq!(handle.state(), TaskState::NotStarted);

        runner.run();
        assert_eq!(handle.get_timeout(Duration::from_secs(1)).unwrap(), 7);
        assert!(matches!(
            handle.get_timeout(Duration::from_secs(1)),
            Err(TaskError::Retrieved)
        ));
        assert_eq!(handle.state(), TaskState::Completed);
    }

    #[test]
    fn test_cancel_before_run_skips_job() {
        let (runner, handle) = infallible(|| -> u8 { panic!("must not run") });
        assert!(handle.cancel());
        assert!(!handle.cancel());
        runner.run();
        assert_eq!(handle.state(), TaskState::Cancelled);
        assert!(matches!(handle.get(), Err(TaskError::Cancelled)));
    }

    #[test]
    fn test_dropped_runner_cancels() {
        let (runner, handle) = infallible(|| 1);
        drop(runner);
        assert!(handle.is_done());
        assert!(matches!(handle.get(), Err(TaskError::Cancelled)));
    }
}
