//! One-way cancellation signal.
//!
//! Built on a flume channel that never carries a message: cancelling drops
//! the only sender, which disconnects every receiver at once. Anything that
//! blocks on the receiver (a worker poll, a caller's enqueue wait) wakes up
//! immediately, and it composes with other channels in a `flume::Selector`.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use flume::{Receiver, Sender};

/// Cloneable cancellation token. All clones observe the same signal.
#[derive(Clone)]
pub struct CancelToken {
    trigger: Arc<Mutex<Option<Sender<()>>>>,
    signal: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (trigger, signal) = flume::bounded(0);
        Self {
            trigger: Arc::new(Mutex::new(Some(trigger))),
            signal,
        }
    }

    /// Fire the token. Returns `false` if it was already cancelled.
    pub fn cancel(&self) -> bool {
        self.trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_disconnected()
    }

    /// Receiver that disconnects when the token fires, for use in selectors.
    pub(crate) fn signal(&self) -> &Receiver<()> {
        &self.signal
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
