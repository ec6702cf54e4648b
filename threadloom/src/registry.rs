//! # Worker Registry
//!
//! Ordered list of live workers, owned by the pool coordinator. Each slot
//! pairs a worker's bookkeeping with the sending end of its queue, so the
//! "workers" and "queues" views can never drift out of index alignment:
//! removing a worker removes its queue in the same statement.
//!
//! ## Locking
//! Every structural change (add, retire, remove) and every read that depends
//! on the length (dispatch routing, size checks) goes through the one mutex.
//! Workers never touch the list directly; they report retirement through
//! [`Registry::retire_if_above`] and [`Registry::exited`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use flume::Sender;
use threadloom_api::Task;

use crate::cancel::CancelToken;

/// Status codes for a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Polling or executing
    Active = 0,

    /// Left the dispatch rotation; draining what is already queued
    Retiring = 1,

    /// Loop has exited
    Terminated = 2,
}

impl WorkerStatus {
    pub(crate) fn load(cell: &AtomicUsize) -> Self {
        match cell.load(Ordering::Acquire) {
            0 => WorkerStatus::Active,
            1 => WorkerStatus::Retiring,
            _ => WorkerStatus::Terminated,
        }
    }

    pub(crate) fn store(self, cell: &AtomicUsize) {
        cell.store(self as usize, Ordering::Release);
    }
}

/// One registered worker and its queue.
pub(crate) struct Slot {
    pub(crate) id: usize,
    pub(crate) name: String,
    /// `None` once the queue has been closed for a graceful shutdown.
    pub(crate) queue: Option<Sender<Task>>,
    pub(crate) cancel: CancelToken,
    pub(crate) status: Arc<AtomicUsize>,
}

impl Slot {
    /// Close the queue: the worker drains what is buffered, then exits.
    fn shutdown(&mut self) {
        self.queue = None;
        if WorkerStatus::load(&self.status) == WorkerStatus::Active {
            WorkerStatus::Retiring.store(&self.status);
        }
    }

    /// Wake the worker immediately and have it abandon its queue.
    fn shutdown_now(&mut self) {
        self.cancel.cancel();
        self.queue = None;
    }
}

/// Snapshot of one slot, for observers and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub id: usize,
    pub name: String,
    pub status: WorkerStatus,
    pub queued: usize,
}

/// The registry's guarded state.
#[derive(Default)]
pub(crate) struct Workers {
    slots: Vec<Slot>,
    /// Worker threads still inside their loop, including retired ones that
    /// are finishing their queue after leaving `slots`.
    live: usize,
}

impl Workers {
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn push(&mut self, slot: Slot) {
        self.slots.push(slot);
        self.live += 1;
    }

    fn take(&mut self, id: usize) -> bool {
        match self.slots.iter().position(|slot| slot.id == id) {
            Some(index) => {
                let slot = self.slots.remove(index);
                if WorkerStatus::load(&slot.status) == WorkerStatus::Active {
                    WorkerStatus::Retiring.store(&slot.status);
                }
                // Dropping the slot drops the registry's queue sender.
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    workers: Mutex<Workers>,
    all_exited: Condvar,
}

impl Registry {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Workers> {
        // Every critical section leaves the state consistent, so a panic
        // elsewhere while holding the lock does not invalidate it.
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Worker threads that have not finished their loop yet.
    pub(crate) fn live(&self) -> usize {
        self.lock().live
    }

    /// Pick the queue for dispatch ticket `ticket`.
    ///
    /// The index is computed against the length seen under the lock, so a
    /// concurrent resize only skews the rotation, never misroutes.
    pub(crate) fn route(&self, ticket: usize) -> Option<(usize, Sender<Task>)> {
        let workers = self.lock();
        if workers.slots.is_empty() {
            return None;
        }
        let index = ticket % workers.slots.len();
        workers.slots[index].queue.clone().map(|queue| (index, queue))
    }

    /// Remove worker `id` if the registry holds more than `floor` workers.
    ///
    /// Check and removal happen under one lock, so idle workers timing out
    /// together cannot take the pool below `floor`.
    pub(crate) fn retire_if_above(&self, id: usize, floor: usize) -> bool {
        let mut workers = self.lock();
        workers.len() > floor && workers.take(id)
    }

    /// Called by a worker as the last step of its thread.
    pub(crate) fn exited(&self, id: usize) {
        let mut workers = self.lock();
        workers.take(id);
        workers.live = workers.live.saturating_sub(1);
        let none_left = workers.live == 0;
        drop(workers);
        if none_left {
            self.all_exited.notify_all();
        }
    }

    /// Close every queue for a graceful drain.
    pub(crate) fn shutdown_all(&self) {
        for slot in self.lock().slots.iter_mut() {
            slot.shutdown();
        }
    }

    /// Cancel every worker.
    pub(crate) fn shutdown_all_now(&self) {
        for slot in self.lock().slots.iter_mut() {
            slot.shutdown_now();
        }
    }

    /// Tasks currently buffered across all registered queues.
    pub(crate) fn queued(&self) -> usize {
        self.lock()
            .slots
            .iter()
            .filter_map(|slot| slot.queue.as_ref())
            .map(Sender::len)
            .sum()
    }

    pub(crate) fn snapshot(&self) -> Vec<WorkerInfo> {
        self.lock()
            .slots
            .iter()
            .map(|slot| WorkerInfo {
                id: slot.id,
                name: slot.name.clone(),
                status: WorkerStatus::load(&slot.status),
                queued: slot.queue.as_ref().map_or(0, Sender::len),
            })
            .collect()
    }

    /// Block until every worker thread has exited, or `timeout` passes.
    pub(crate) fn wait_all_exited(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut workers = self.lock();
        while workers.live > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            workers = self
                .all_exited
                .wait_timeout(workers, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(id: usize) -> (Slot, flume::Receiver<Task>) {
        let (tx, rx) = flume::bounded(4);
        let slot = Slot {
            id,
            name: format!("test-{}", id),
            queue: Some(tx),
            cancel: CancelToken::new(),
            status: Arc::new(AtomicUsize::new(WorkerStatus::Active as usize)),
        };
        (slot, rx)
    }

    fn registry_with(ids: &[usize]) -> (Registry, Vec<flume::Receiver<Task>>) {
        let registry = Registry::default();
        let mut receivers = Vec::new();
        for &id in ids {
            let (s, rx) = slot(id);
            registry.lock().push(s);
            receivers.push(rx);
        }
        (registry, receivers)
    }

    #[test]
    fn test_route_wraps_around() {
        let (registry, _rx) = registry_with(&[1, 2, 3]);
        let picked: Vec<usize> = (0..6).map(|t| registry.route(t).unwrap().0).collect();
        assert_eq!(picked, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_route_on_empty_registry() {
        let registry = Registry::default();
        assert!(registry.route(0).is_none());
    }

    #[test]
    fn test_retire_respects_floor() {
        let (registry, _rx) = registry_with(&[1, 2]);
        assert!(registry.retire_if_above(2, 1));
        assert!(!registry.retire_if_above(1, 1));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_retirement_drops_queue_with_worker() {
        let (registry, receivers) = registry_with(&[1, 2, 3]);
        assert!(registry.retire_if_above(2, 1));
        assert!(!registry.retire_if_above(2, 1));

        // Worker 2's queue left with it; the others are still connected
        assert!(receivers[1].is_disconnected());
        assert!(!receivers[0].is_disconnected());
        assert!(!receivers[2].is_disconnected());

        let names: Vec<String> = registry.snapshot().into_iter().map(|w| w.name).collect();
        assert_eq!(names, vec!["test-1", "test-3"]);
    }

    #[test]
    fn test_shutdown_all_closes_queues() {
        let (registry, receivers) = registry_with(&[1, 2]);
        registry.shutdown_all();
        assert!(receivers.iter().all(|rx| rx.is_disconnected()));
        assert!(registry.route(0).is_none());
        assert!(registry
            .snapshot()
            .iter()
            .all(|w| w.status == WorkerStatus::Retiring));
    }

    #[test]
    fn test_shutdown_all_now_cancels() {
        let (registry, _rx) = registry_with(&[1]);
        let token = registry.lock().slots[0].cancel.clone();
        registry.shutdown_all_now();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_retired_worker_stays_live_until_exit() {
        let (registry, _rx) = registry_with(&[1, 2]);
        assert!(registry.retire_if_above(1, 1));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.live(), 2);

        registry.exited(1);
        registry.exited(2);
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.live(), 0);
    }

    #[test]
    fn test_wait_all_exited() {
        let (registry, _rx) = registry_with(&[1]);
        assert!(!registry.wait_all_exited(Duration::from_millis(10)));
        registry.exited(1);
        assert!(registry.wait_all_exited(Duration::from_millis(10)));
    }
}
