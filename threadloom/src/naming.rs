use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use tracing::debug;

/// Produces named worker threads.
///
/// Names are `<prefix><n>` with `n` counting up from 1 for the lifetime of
/// the factory, so a name is never reused within a pool even after the
/// worker that carried it retires.
#[derive(Debug)]
pub struct ThreadFactory {
    prefix: String,
    next_id: AtomicUsize,
}

/// Identity given to a freshly started thread. The thread itself runs
/// detached; it signals its own exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnedThread {
    pub id: usize,
    pub name: String,
}

impl ThreadFactory {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next_id: AtomicUsize::new(1),
        }
    }

    /// Start a thread running `run_loop`.
    ///
    /// The closure receives the id and name assigned to the thread. The only
    /// failure is the OS refusing to create a thread.
    pub fn spawn<F>(&self, run_loop: F) -> io::Result<SpawnedThread>
    where
        F: FnOnce(usize, String) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}{}", self.prefix, id);
        let thread_name = name.clone();

        thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_loop(id, thread_name))?;

        debug!(thread = %name, "Created new thread");
        Ok(SpawnedThread { id, name })
    }

    /// Number of threads handed out so far.
    pub fn created(&self) -> usize {
        self.next_id.load(Ordering::Relaxed) - 1
    }
}
