//! Shutdown signaling shared by all three binaries.
//!
//! No graceful shutdown signal is defined for the server core by the
//! original design — termination by process signal is acceptable there. The
//! client and controller, however, benefit from a clean `ctrl_c` path during
//! development and testing, so this module provides one broadcast-based
//! mechanism all three binaries can opt into.

use tokio::sync::broadcast;

/// The sending half: call [`Shutdown::signal`] once to wake every
/// [`Watcher`] cloned from this instance.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

/// The receiving half, handed to a task that should stop when shutdown is
/// signaled.
#[derive(Debug)]
pub struct Watcher {
    rx: broadcast::Receiver<()>,
}

impl Clone for Watcher {
    /// `broadcast::Receiver` isn't `Clone`; a clone subscribes fresh via
    /// `resubscribe`, which is fine here since a `Watcher` only ever waits
    /// for the next shutdown signal, never replays history.
    fn clone(&self) -> Self {
        Watcher {
            rx: self.rx.resubscribe(),
        }
    }
}

impl Shutdown {
    /// Create a fresh shutdown broadcaster with no watchers yet.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(1);
        Self { tx }
    }

    /// Obtain a new watcher subscribed to this shutdown's signal.
    #[must_use]
    pub fn watcher(&self) -> Watcher {
        Watcher {
            rx: self.tx.subscribe(),
        }
    }

    /// Signal every outstanding watcher. Idempotent: a watcher that has
    /// already observed the signal, or is created after this call, will not
    /// hang waiting for a second one.
    pub fn signal(&self) {
        // A closed channel (no watchers left) is not an error here.
        let _ = self.tx.send(());
    }

    /// Wait for `ctrl_c` and then signal shutdown. Intended to be spawned
    /// once near process startup.
    pub async fn watch_ctrl_c(self) {
        if tokio::signal::ctrl_c().await.is_ok() {
            self.signal();
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Watcher {
    /// Resolve once shutdown has been signaled. Cloning a `Watcher` after
    /// the signal has already fired still resolves immediately, since a
    /// lagged/closed receiver is treated the same as a received signal:
    /// either way, shutdown is underway and the caller should stop.
    pub async fn recv(&mut self) {
        let _ = self.rx.recv().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn watcher_resolves_after_signal() {
        let shutdown = Shutdown::new();
        let mut watcher = shutdown.watcher();
        shutdown.signal();
        watcher.recv().await;
    }

    #[tokio::test]
    async fn multiple_watchers_all_resolve() {
        let shutdown = Shutdown::new();
        let mut a = shutdown.watcher();
        let mut b = shutdown.watcher();
        shutdown.signal();
        a.recv().await;
        b.recv().await;
    }
}
