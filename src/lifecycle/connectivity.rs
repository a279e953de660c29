//! Connectivity change notifications.
//!
//! The WiFi/network manager is an external collaborator; this module models
//! its notification callback as an explicit observer relationship. The
//! manager holds a [`ConnectivityMonitor`] and pushes discrete state-change
//! events; interested parties subscribe and receive them over a broadcast
//! channel. Nothing here stores connectivity state; events only trigger
//! transitions in their consumers.

use tokio::sync::broadcast;

/// A discrete connectivity state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    /// The device lost its network link.
    Disconnected,
    /// The device acquired an IP address and has a usable network path.
    IpAcquired,
    /// Any other notification; consumers ignore these.
    Other,
}

/// Publisher handle for connectivity notifications.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: broadcast::Sender<ConnectivityEvent>,
}

impl ConnectivityMonitor {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    /// Publish a state change. Lost messages from slow subscribers are
    /// acceptable: only the latest state matters to consumers.
    pub fn notify(&self, event: ConnectivityEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}
