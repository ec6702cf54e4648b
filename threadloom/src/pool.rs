use std::convert::Infallible;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flume::{SendTimeoutError, Sender};
use threadloom_api::{Cancelled, EventSink, Executor, PoolEvent, RejectedExecution, Task};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::config::PoolConfig;
use crate::error::BuildError;
use crate::events::TracingSink;
use crate::handle::{task_pair, TaskHandle};
use crate::naming::ThreadFactory;
use crate::registry::{Registry, Slot, WorkerInfo, WorkerStatus};
use crate::worker::{Worker, WorkerContext};

/// Bounded worker pool with one dedicated queue per worker.
///
/// `ThreadPool` keeps between `core_pool_size` and `max_pool_size` workers.
/// Each worker owns a bounded FIFO queue and a dedicated OS thread. Tasks are
/// routed to queues round robin; a full queue makes the caller wait up to
/// `enqueue_timeout` before the task is rejected.
///
/// # Scaling
/// - Up: `execute` adds a worker when fewer than `min_spare_threads` workers
///   are busy and the pool is below `max_pool_size`
/// - Down: a worker idle for `keep_alive` retires while the pool is above
///   `core_pool_size`
///
/// # Shutdown
/// - [`shutdown`](Self::shutdown) closes the queues; every task already
///   queued still runs
/// - [`shutdown_now`](Self::shutdown_now) cancels the workers; running tasks
///   finish, queued ones are dropped and their handles resolve as cancelled
///
/// Dropping the pool performs a graceful `shutdown`.
///
/// # Ordering
/// FIFO holds within one worker's queue only. Tasks routed to different
/// queues can finish in any order.
pub struct ThreadPool {
    config: PoolConfig,
    ctx: WorkerContext,
    factory: ThreadFactory,
    /// Round-robin dispatch cursor
    cursor: AtomicUsize,
    is_shutdown: AtomicBool,
}

impl ThreadPool {
    /// Create a pool that reports its events through `tracing`.
    pub fn new(config: PoolConfig) -> Result<Self, BuildError> {
        Self::with_event_sink(config, Arc::new(TracingSink))
    }

    /// Create a pool with a custom event sink.
    ///
    /// `core_pool_size` workers are started before this returns.
    pub fn with_event_sink(
        config: PoolConfig,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, BuildError> {
        config.validate()?;

        let pool = Self {
            ctx: WorkerContext {
                pool_id: Uuid::new_v4(),
                registry: Arc::new(Registry::default()),
                active: Arc::new(AtomicUsize::new(0)),
                events,
                core_pool_size: config.core_pool_size,
                keep_alive: config.keep_alive,
            },
            factory: ThreadFactory::new(config.thread_name_prefix.clone()),
            cursor: AtomicUsize::new(0),
            is_shutdown: AtomicBool::new(false),
            config,
        };

        for _ in 0..pool.config.core_pool_size {
            pool.add_worker()?;
        }

        info!(
            pool = %pool.ctx.pool_id,
            core = pool.config.core_pool_size,
            max = pool.config.max_pool_size,
            "Thread pool started"
        );
        Ok(pool)
    }

    /// Start one more worker unless the pool is full or shut down.
    ///
    /// Returns whether a worker was added. Size check, spawn and registration
    /// all happen under the registry lock.
    fn add_worker(&self) -> io::Result<bool> {
        let mut workers = self.ctx.registry.lock();
        if self.is_shutdown() || workers.len() >= self.config.max_pool_size {
            return Ok(false);
        }

        let (queue_tx, queue_rx) = flume::bounded(self.config.queue_capacity);
        let cancel = CancelToken::new();
        let status = Arc::new(AtomicUsize::new(WorkerStatus::Active as usize));

        let worker_cancel = cancel.clone();
        let worker_status = status.clone();
        let ctx = self.ctx.clone();
        let spawned = self.factory.spawn(move |id, name| {
            Worker::new(id, name, queue_rx, worker_cancel, worker_status, ctx).run();
        })?;

        workers.push(Slot {
            id: spawned.id,
            name: spawned.name.clone(),
            queue: Some(queue_tx),
            cancel,
            status,
        });
        let size = workers.len();
        drop(workers);

        debug!(pool = %self.ctx.pool_id, worker = %spawned.name, size, "Worker registered");
        self.ctx.events.on_event(&PoolEvent::WorkerCreated {
            worker: spawned.name,
        });
        Ok(true)
    }

    /// Queue `f` for execution.
    ///
    /// Blocks for at most `enqueue_timeout` when the chosen queue is full.
    /// A panic inside `f` is caught on the worker and reported as a
    /// `TaskFailed` event; it is not returned here.
    pub fn execute<F>(&self, f: F) -> Result<(), RejectedExecution>
    where
        F: FnOnce() + Send + 'static,
    {
        self.dispatch(Box::new(f), None)
    }

    /// Like [`execute`](Self::execute), but gives up waiting for queue space
    /// as soon as `cancel` fires.
    pub fn execute_cancellable<F>(&self, f: F, cancel: &CancelToken) -> Result<(), RejectedExecution>
    where
        F: FnOnce() + Send + 'static,
    {
        self.dispatch(Box::new(f), Some(cancel))
    }

    /// Queue a value-producing closure and return a handle to its result.
    pub fn submit<F, T>(&self, f: F) -> Result<TaskHandle<T>, RejectedExecution>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.try_submit(move || Ok::<T, Infallible>(f()))
    }

    /// Queue a fallible closure; an `Err` is delivered through the handle as
    /// `TaskError::Failed`.
    pub fn try_submit<F, T, E>(&self, f: F) -> Result<TaskHandle<T>, RejectedExecution>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Into<anyhow::Error>,
    {
        let (runner, handle) = task_pair(f);
        self.execute(move || runner.run())?;
        Ok(handle)
    }

    fn dispatch(&self, task: Task, cancel: Option<&CancelToken>) -> Result<(), RejectedExecution> {
        if self.is_shutdown() {
            return Err(self.reject(RejectedExecution::Shutdown));
        }

        self.scale_up_if_needed();

        let ticket = self.cursor.fetch_add(1, Ordering::Relaxed);
        let Some((index, queue)) = self.ctx.registry.route(ticket) else {
            // Registry empty or its queues closed: only happens after shutdown
            return Err(self.reject(RejectedExecution::Shutdown));
        };

        let outcome = match cancel {
            Some(token) => self.enqueue_cancellable(&queue, index, task, token),
            None => self.enqueue(&queue, index, task),
        };

        match outcome {
            Ok(()) => {
                self.ctx.events.on_event(&PoolEvent::TaskAccepted { queue_index: index });
                Ok(())
            }
            Err(RejectedExecution::QueueClosed { .. }) if self.is_shutdown() => {
                Err(self.reject(RejectedExecution::Shutdown))
            }
            Err(reason) => Err(self.reject(reason)),
        }
    }

    /// Add a worker when too few are busy.
    ///
    /// The pre-check reads the counters without the lock and may be stale;
    /// `add_worker` re-checks the size under the lock, so the pool never
    /// exceeds `max_pool_size`. At worst a worker is added that a slightly
    /// later reading would have skipped.
    fn scale_up_if_needed(&self) {
        let active = self.ctx.active.load(Ordering::Relaxed);
        if active >= self.config.min_spare_threads
            || self.ctx.registry.len() >= self.config.max_pool_size
        {
            return;
        }
        if let Err(e) = self.add_worker() {
            warn!(pool = %self.ctx.pool_id, error = %e, "Failed to add worker");
        }
    }

    fn enqueue(&self, queue: &Sender<Task>, index: usize, task: Task) -> Result<(), RejectedExecution> {
        let waited = self.config.enqueue_timeout;
        match queue.send_timeout(task, waited) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(RejectedExecution::Overloaded { index, waited }),
            Err(SendTimeoutError::Disconnected(_)) => Err(RejectedExecution::QueueClosed { index }),
        }
    }

    fn enqueue_cancellable(
        &self,
        queue: &Sender<Task>,
        index: usize,
        task: Task,
        cancel: &CancelToken,
    ) -> Result<(), RejectedExecution> {
        if cancel.is_cancelled() {
            return Err(RejectedExecution::Interrupted(Cancelled));
        }
        let waited = self.config.enqueue_timeout;

        // The selector can hand a parked send to a draining worker in the
        // same instant the cancel arm or the timeout wins. The claim settles
        // who owns the task: the worker runs it only if it claims it first.
        let claim = Arc::new(AtomicU8::new(CLAIM_PENDING));
        let runner_claim = claim.clone();
        let guarded: Task = Box::new(move || {
            if settle(&runner_claim, CLAIM_STARTED) {
                task();
            }
        });

        let outcome = flume::Selector::new()
            .send(queue, guarded, move |sent| {
                sent.map_err(|_| RejectedExecution::QueueClosed { index })
            })
            .recv(cancel.signal(), |_| Err(RejectedExecution::Interrupted(Cancelled)))
            .wait_timeout(waited)
            .unwrap_or(Err(RejectedExecution::Overloaded { index, waited }));

        match outcome {
            Err(RejectedExecution::Interrupted(_) | RejectedExecution::Overloaded { .. })
                if !settle(&claim, CLAIM_REVOKED) =>
            {
                // A worker already started it
                Ok(())
            }
            other => other,
        }
    }

    fn reject(&self, reason: RejectedExecution) -> RejectedExecution {
        self.ctx.events.on_event(&PoolEvent::TaskRejected {
            reason: reason.clone(),
        });
        reason
    }

    /// Stop accepting work and let every queued task finish.
    ///
    /// Idempotent. Workers exit once their queue is drained.
    pub fn shutdown(&self) {
        if self
            .is_shutdown
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!(pool = %self.ctx.pool_id, "Initiating shutdown");
            self.ctx.events.on_event(&PoolEvent::ShutdownStarted { graceful: true });
            self.ctx.registry.shutdown_all();
        }
    }

    /// Stop accepting work and stop workers as soon as their current task ends.
    ///
    /// Queued tasks that have not started are dropped; handles returned by
    /// `submit` for them resolve as `TaskError::Cancelled`. Calling this after
    /// [`shutdown`](Self::shutdown) escalates the graceful drain.
    pub fn shutdown_now(&self) {
        let first = self
            .is_shutdown
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if first {
            info!(pool = %self.ctx.pool_id, "Initiating immediate shutdown");
            self.ctx.events.on_event(&PoolEvent::ShutdownStarted { graceful: false });
        }
        self.ctx.registry.shutdown_all_now();
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// True once shut down and every worker thread has exited.
    pub fn is_terminated(&self) -> bool {
        self.is_shutdown() && self.ctx.registry.live() == 0
    }

    /// Block until every worker has exited after a shutdown, or `timeout` passes.
    ///
    /// Returns `false` on timeout, or right away if the pool is still running.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        if !self.is_shutdown() {
            return false;
        }
        self.ctx.registry.wait_all_exited(timeout)
    }

    /// Workers currently in the dispatch rotation.
    pub fn pool_size(&self) -> usize {
        self.ctx.registry.len()
    }

    /// Workers currently running a task. Approximate.
    pub fn active_count(&self) -> usize {
        self.ctx.active.load(Ordering::Relaxed)
    }

    /// Tasks waiting in queues.
    pub fn queued_tasks(&self) -> usize {
        self.ctx.registry.queued()
    }

    pub fn workers(&self) -> Vec<WorkerInfo> {
        self.ctx.registry.snapshot()
    }

    /// Total workers ever started by this pool.
    pub fn workers_created(&self) -> usize {
        self.factory.created()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Identifier attached to this pool's log spans.
    pub fn id(&self) -> Uuid {
        self.ctx.pool_id
    }
}

const CLAIM_PENDING: u8 = 0;
const CLAIM_STARTED: u8 = 1;
const CLAIM_REVOKED: u8 = 2;

/// Move a pending claim to `to`. Exactly one of the worker and the caller wins.
fn settle(claim: &AtomicU8, to: u8) -> bool {
    claim
        .compare_exchange(CLAIM_PENDING, to, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}

impl Executor for ThreadPool {
    fn execute_task(&self, task: Task) -> Result<(), RejectedExecution> {
        self.dispatch(task, None)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("id", &self.ctx.pool_id)
            .field("pool_size", &self.pool_size())
            .field("active", &self.active_count())
            .field("is_shutdown", &self.is_shutdown())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use threadloom_api::NoopSink;

    fn quiet(config: PoolConfig) -> ThreadPool {
        ThreadPool::with_event_sink(config, Arc::new(NoopSink)).unwrap()
    }

    #[test]
    fn test_invalid_config_fails_construction() {
        let config = PoolConfig::new(2, 1, 0, Duration::from_secs(1), 4);
        let err = ThreadPool::new(config).unwrap_err();
        assert!(matches!(err, BuildError::Config(_)));
    }

    #[test]
    fn test_scale_up_is_capped_at_max() {
        let pool = quiet(PoolConfig::new(1, 3, 100, Duration::from_secs(5), 8));
        for _ in 0..20 {
            pool.execute(|| {}).unwrap();
        }
        assert_eq!(pool.pool_size(), 3);
        assert_eq!(pool.workers_created(), 3);
    }

    #[test]
    fn test_no_scale_up_without_spare_threshold() {
        let pool = quiet(PoolConfig::new(2, 8, 0, Duration::from_secs(5), 8));
        for _ in 0..20 {
            pool.execute(|| {}).unwrap();
        }
        assert_eq!(pool.pool_size(), 2);
    }

    #[test]
    fn test_cancelled_token_rejects_before_waiting() {
        let pool = quiet(PoolConfig::new(1, 1, 0, Duration::from_secs(5), 1));
        let token = CancelToken::new();
        token.cancel();

        let started = Instant::now();
        let err = pool.execute_cancellable(|| {}, &token).unwrap_err();
        assert_eq!(err, RejectedExecution::Interrupted(Cancelled));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_drop_shuts_down_gracefully() {
        let pool = quiet(PoolConfig::new(1, 1, 0, Duration::from_secs(5), 8));
        let (tx, rx) = flume::unbounded();
        for i in 0..5 {
            let tx = tx.clone();
            pool.execute(move || tx.send(i).unwrap()).unwrap();
        }
        drop(pool);
        let mut seen: Vec<i32> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }
}
