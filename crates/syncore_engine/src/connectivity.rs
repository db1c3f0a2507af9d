//! Network reachability signal.

use tokio::sync::watch;

/// Reports whether the remote is believed reachable.
///
/// Subscribers receive a `watch::Receiver`; dropping it unsubscribes.
pub trait ConnectivityMonitor: Send + Sync {
    /// Current reachability.
    fn current_status(&self) -> bool;

    /// Subscribes to reachability changes.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

impl<C: ConnectivityMonitor + ?Sized> ConnectivityMonitor for std::sync::Arc<C> {
    fn current_status(&self) -> bool {
        (**self).current_status()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        (**self).subscribe()
    }
}

/// A connectivity signal driven by the host application.
///
/// Useful when the platform reports reachability through callbacks, and
/// as a test double.
#[derive(Debug)]
pub struct ManualConnectivity {
    tx: watch::Sender<bool>,
}

impl ManualConnectivity {
    /// Creates a monitor with the given initial state.
    pub fn new(connected: bool) -> Self {
        let (tx, _rx) = watch::channel(connected);
        Self { tx }
    }

    /// Updates reachability, notifying subscribers on change.
    pub fn set_connected(&self, connected: bool) {
        self.tx.send_if_modified(|current| {
            if *current == connected {
                false
            } else {
                *current = connected;
                true
            }
        });
    }
}

impl Default for ManualConnectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityMonitor for ManualConnectivity {
    fn current_status(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
