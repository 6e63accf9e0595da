//! Process-wide cooperative cancellation.
//!
//! Long-lived background work (reconciler loops, volume migrations, the
//! HTTP server stopper) subscribes to a [`ShutdownBroadcaster`] and polls
//! its [`ShutdownSignal`] between units of work. The broadcast is one-shot:
//! once fired, every present and future subscriber observes it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};

#[derive(Default)]
struct Inner {
    fired: AtomicBool,
    subscribers: Mutex<Vec<Sender<()>>>,
}

/// Fans a single stop request out to every subscribed signal.
#[derive(Clone, Default)]
pub struct ShutdownBroadcaster {
    inner: Arc<Inner>,
}

impl ShutdownBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        let (sender, receiver) = bounded(1);
        if self.inner.fired.load(Ordering::SeqCst) {
            // Late subscriber: deliver the stop immediately.
            let _ = sender.try_send(());
        } else {
            self.inner
                .subscribers
                .lock()
                .expect("shutdown subscriber list poisoned")
                .push(sender);
        }
        ShutdownSignal { receiver }
    }

    pub fn broadcast(&self) {
        self.inner.fired.store(true, Ordering::SeqCst);
        let subscribers = self
            .inner
            .subscribers
            .lock()
            .expect("shutdown subscriber list poisoned");
        for subscriber in subscribers.iter() {
            // A full or disconnected channel means the subscriber already
            // stopped; nothing to do.
            let _ = subscriber.try_send(());
        }
    }
}

/// Receiving half held by a background task.
pub struct ShutdownSignal {
    receiver: Receiver<()>,
}

impl ShutdownSignal {
    /// Blocks for at most `wait` and reports whether shutdown was requested.
    /// A disconnected broadcaster also counts as a stop request.
    pub fn is_cancelled(&self, wait: Duration) -> bool {
        !matches!(
            self.receiver.recv_timeout(wait),
            Err(RecvTimeoutError::Timeout)
        )
    }

    /// Non-blocking check, used between serial migration steps.
    pub fn now(&self) -> bool {
        self.is_cancelled(Duration::ZERO)
    }
}
