//! Close-once broadcast signals
//!
//! A [`Signal`] has exactly one transition, from "pending" to "fired".
//! Every clone observes the same transition, any number of tasks may wait on
//! it, and firing more than once is a no-op. Stop requests, "done"
//! notifications and cancellation scopes are all built from it.
//!
//! Internally the signal is a `flume` channel on which nothing is ever sent:
//! firing drops the only sender, and a disconnected channel wakes every
//! pending receiver.

use flume::{Receiver, Sender};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Cloneable, thread-safe close-once signal
#[derive(Clone)]
pub struct Signal {
    inner: Arc<SignalInner>,
}

struct SignalInner {
    trigger: Mutex<Option<Sender<()>>>,
    listener: Receiver<()>,
}

impl Signal {
    /// Create a signal in the pending state
    pub fn new() -> Self {
        let (trigger, listener) = flume::bounded(1);
        Self {
            inner: Arc::new(SignalInner {
                trigger: Mutex::new(Some(trigger)),
                listener,
            }),
        }
    }

    /// Fire the signal.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn fire(&self) -> bool {
        let trigger = self
            .inner
            .trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        trigger.is_some()
    }

    /// Whether the signal has fired
    pub fn is_fired(&self) -> bool {
        self.inner.listener.is_disconnected()
    }

    /// Wait until the signal fires. Returns immediately if it already has.
    pub async fn wait(&self) {
        // Nothing is ever sent, so this only resolves on disconnect.
        let _ = self.inner.listener.recv_async().await;
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("fired", &self.is_fired())
            .finish()
    }
}
