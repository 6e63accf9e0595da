//! Named background threads bound to the process shutdown signal.

use std::thread::JoinHandle;

use tracing::warn;

use super::shutdown::ShutdownSignal;
use super::threads::spawn_named_thread;

/// A running background thread. The callback receives a [`ShutdownSignal`]
/// and is expected to return once it observes cancellation.
pub struct BackgroundTask {
    name: String,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    pub fn spawn<F>(name: &str, signal: ShutdownSignal, callback: F) -> Self
    where
        F: FnOnce(ShutdownSignal) + Send + 'static,
    {
        Self {
            name: name.to_string(),
            handle: spawn_named_thread(name, move || callback(signal)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the thread to return. Callers broadcast shutdown first.
    pub fn join(self) {
        if self.handle.join().is_err() {
            warn!(task = %self.name, "background task panicked");
        }
    }
}
