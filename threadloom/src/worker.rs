//! # Worker Thread Implementation
//!
//! Each worker owns the receiving end of one bounded queue and runs on one
//! dedicated OS thread for its whole life.
//!
//! ## Core Algorithm
//! 1. Wait on the queue for up to `keep_alive`, while also watching the
//!    worker's cancellation token
//! 2. Got a task: bump the active counter, run it with panic isolation,
//!    drop the counter again
//! 3. Timed out: if the pool is above its core size, ask the registry to
//!    retire this worker (the size check and removal are atomic there)
//! 4. Once retired or shut down gracefully, keep draining until the queue
//!    reports that every sender is gone, then exit
//! 5. Cancelled: exit right away, abandoning whatever is still queued
//!
//! A retiring worker does not drop its receiver while a caller may still be
//! inside `execute` holding a clone of the queue sender. It waits for the
//! queue to disconnect instead, so an accepted task is never silently lost.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flume::Receiver;
use threadloom_api::{EventSink, PoolEvent, RetireReason, Task};
use tracing::{debug, error, info_span, trace};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::registry::{Registry, WorkerStatus};

/// Pool state every worker is wired to.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub(crate) pool_id: Uuid,
    pub(crate) registry: Arc<Registry>,
    pub(crate) active: Arc<AtomicUsize>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) core_pool_size: usize,
    pub(crate) keep_alive: Duration,
}

/// Outcome of one poll of the queue.
enum Poll {
    Task(Task),
    /// Every sender is gone and the queue is empty.
    Closed,
    Cancelled,
    /// Nothing arrived within `keep_alive`.
    Idle,
}

pub(crate) struct Worker {
    id: usize,
    name: String,
    queue: Receiver<Task>,
    cancel: CancelToken,
    status: Arc<AtomicUsize>,
    ctx: WorkerContext,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &WorkerStatus::load(&self.status))
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        name: String,
        queue: Receiver<Task>,
        cancel: CancelToken,
        status: Arc<AtomicUsize>,
        ctx: WorkerContext,
    ) -> Self {
        Self {
            id,
            name,
            queue,
            cancel,
            status,
            ctx,
        }
    }

    /// Thread entry point.
    pub(crate) fn run(self) {
        let span = info_span!("worker", pool = %self.ctx.pool_id, name = %self.name);
        let _guard = span.enter();
        debug!("Worker started");

        let reason = self.run_loop();

        WorkerStatus::Terminated.store(&self.status);
        debug!(%reason, abandoned = self.queue.len(), "Worker exiting");
        self.ctx.events.on_event(&PoolEvent::WorkerRetired {
            worker: self.name.clone(),
            reason,
        });
        self.ctx.registry.exited(self.id);
    }

    fn run_loop(&self) -> RetireReason {
        let mut retired = false;

        loop {
            if self.cancel.is_cancelled() {
                return RetireReason::Cancelled;
            }

            match self.poll() {
                Poll::Task(task) => {
                    // Forced shutdown abandons anything not yet started
                    if self.cancel.is_cancelled() {
                        return RetireReason::Cancelled;
                    }
                    self.run_task(task);
                }
                Poll::Cancelled => return RetireReason::Cancelled,
                // Forced shutdown closes the queue too; either arm may win
                Poll::Closed if self.cancel.is_cancelled() => return RetireReason::Cancelled,
                Poll::Closed if retired => return RetireReason::Idle,
                Poll::Closed => return RetireReason::Drained,
                Poll::Idle => {
                    if !retired
                        && WorkerStatus::load(&self.status) == WorkerStatus::Active
                        && self
                            .ctx
                            .registry
                            .retire_if_above(self.id, self.ctx.core_pool_size)
                    {
                        debug!(keep_alive = ?self.ctx.keep_alive, "Idle past keep-alive, retiring");
                        retired = true;
                    }
                }
            }
        }
    }

    fn poll(&self) -> Poll {
        flume::Selector::new()
            .recv(&self.queue, |msg| match msg {
                Ok(task) => Poll::Task(task),
                Err(_) => Poll::Closed,
            })
            .recv(self.cancel.signal(), |_| Poll::Cancelled)
            .wait_timeout(self.ctx.keep_alive)
            .unwrap_or(Poll::Idle)
    }

    fn run_task(&self, task: Task) {
        self.ctx.active.fetch_add(1, Ordering::Relaxed);
        trace!("Running task");
        let outcome = panic::catch_unwind(AssertUnwindSafe(task));
        self.ctx.active.fetch_sub(1, Ordering::Relaxed);

        if let Err(payload) = outcome {
            let message = panic_message(&*payload);
            error!(%message, "Task panicked");
            self.ctx.events.on_event(&PoolEvent::TaskFailed {
                worker: self.name.clone(),
                message,
            });
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Slot;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Instant;
    use threadloom_api::NoopSink;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<PoolEvent>>);

    impl EventSink for Recorder {
        fn on_event(&self, event: &PoolEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    struct Harness {
        ctx: WorkerContext,
        senders: Vec<flume::Sender<Task>>,
        tokens: Vec<CancelToken>,
        threads: Vec<thread::JoinHandle<()>>,
    }

    impl Harness {
        fn new(core: usize, keep_alive: Duration, events: Arc<dyn EventSink>) -> Self {
            Self {
                ctx: WorkerContext {
                    pool_id: Uuid::new_v4(),
                    registry: Arc::new(Registry::default()),
                    active: Arc::new(AtomicUsize::new(0)),
                    events,
                    core_pool_size: core,
                    keep_alive,
                },
                senders: Vec::new(),
                tokens: Vec::new(),
                threads: Vec::new(),
            }
        }

        fn start(&mut self, id: usize) {
            let (tx, rx) = flume::bounded(8);
            let cancel = CancelToken::new();
            let status = Arc::new(AtomicUsize::new(WorkerStatus::Active as usize));
            self.ctx.registry.lock().push(Slot {
                id,
                name: format!("w-{}", id),
                queue: Some(tx.clone()),
                cancel: cancel.clone(),
                status: status.clone(),
            });
            let worker = Worker::new(id, format!("w-{}", id), rx, cancel.clone(), status, self.ctx.clone());
            self.threads.push(thread::spawn(move || worker.run()));
            self.senders.push(tx);
            self.tokens.push(cancel);
        }

        fn join(self) {
            drop(self.senders);
            for t in self.threads {
                t.join().unwrap();
            }
        }
    }

    fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(&"static str"), "static str");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u32), "Unknown panic");
    }

    #[test]
    fn test_runs_tasks_in_fifo_order() {
        let mut harness = Harness::new(1, Duration::from_secs(5), Arc::new(NoopSink));
        harness.start(1);

        let (done_tx, done_rx) = flume::unbounded();
        for i in 0..5 {
            let done_tx = done_tx.clone();
            harness.senders[0]
                .send(Box::new(move || done_tx.send(i).unwrap()))
                .unwrap();
        }
        let seen: Vec<i32> = (0..5).map(|_| done_rx.recv().unwrap()).collect();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);

        harness.tokens[0].cancel();
        harness.join();
    }

    #[test]
    fn test_panicking_task_does_not_kill_worker() {
        let recorder = Arc::new(Recorder::default());
        let mut harness = Harness::new(1, Duration::from_secs(5), recorder.clone());
        harness.start(7);

        let (done_tx, done_rx) = flume::bounded(1);
        harness.senders[0].send(Box::new(|| panic!("task blew up"))).unwrap();
        harness.senders[0]
            .send(Box::new(move || done_tx.send(()).unwrap()))
            .unwrap();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert!(recorder.0.lock().unwrap().contains(&PoolEvent::TaskFailed {
            worker: "w-7".into(),
            message: "task blew up".into(),
        }));
        assert_eq!(harness.ctx.active.load(Ordering::Relaxed), 0);

        harness.tokens[0].cancel();
        harness.join();
    }

    #[test]
    fn test_idle_worker_above_core_retires() {
        let recorder = Arc::new(Recorder::default());
        let mut harness = Harness::new(1, Duration::from_millis(30), recorder.clone());
        harness.start(1);
        harness.start(2);

        // Test senders keep the queues connected; release them so the
        // retired worker can observe its queue closing
        let registry = harness.ctx.registry.clone();
        let senders = std::mem::take(&mut harness.senders);
        drop(senders);

        assert!(wait_until(Duration::from_secs(5), || registry.len() == 1));
        assert!(wait_until(Duration::from_secs(5), || registry.live() == 1));
        let retired = recorder
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, PoolEvent::WorkerRetired { reason: RetireReason::Idle, .. }))
            .count();
        assert_eq!(retired, 1);

        // The core worker stays until it is cancelled
        for token in &harness.tokens {
            token.cancel();
        }
        harness.join();
        assert_eq!(registry.live(), 0);
    }

    #[test]
    fn test_cancel_abandons_queued_tasks() {
        let mut harness = Harness::new(1, Duration::from_secs(5), Arc::new(NoopSink));
        harness.start(1);

        let ran = Arc::new(AtomicUsize::new(0));
        let (gate_tx, gate_rx) = flume::bounded::<()>(0);
        let (started_tx, started_rx) = flume::bounded(1);
        harness.senders[0]
            .send(Box::new(move || {
                started_tx.send(()).unwrap();
                let _ = gate_rx.recv();
            }))
            .unwrap();
        for _ in 0..3 {
            let ran = ran.clone();
            harness.senders[0]
                .send(Box::new(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }

        started_rx.recv().unwrap();
        harness.tokens[0].cancel();
        drop(gate_tx);

        let registry = harness.ctx.registry.clone();
        harness.join();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(registry.len(), 0);
    }
}
