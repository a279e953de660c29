//! Tunnel reconnect gating.
//!
//! The tunnel transport is free to redial after a drop, but redialing before
//! the device has any usable network path wastes power and produces noisy
//! failures. The gate is a two-state machine driven by connectivity
//! notifications; the tunnel's redial loop awaits permission before every
//! dial attempt.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use crate::lifecycle::connectivity::ConnectivityEvent;

/// Gate state. `Suppressed` forbids redialing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Suppressed,
    Allowed,
}

/// Reconnect permission for one tunnel endpoint.
#[derive(Debug)]
pub struct ReconnectGate {
    tx: watch::Sender<GateState>,
}

impl ReconnectGate {
    /// A gate for a WiFi-managed device: connectivity cannot be assumed at
    /// boot, so redialing starts out suppressed.
    pub fn suppressed() -> Self {
        Self::new(GateState::Suppressed)
    }

    /// A gate that never suppresses; used when no connectivity manager is
    /// wired in.
    pub fn open() -> Self {
        Self::new(GateState::Allowed)
    }

    fn new(initial: GateState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn state(&self) -> GateState {
        *self.tx.borrow()
    }

    /// Apply a connectivity notification.
    ///
    /// `IpAcquired` allows redialing, `Disconnected` suppresses it, anything
    /// else leaves the state untouched.
    pub fn apply(&self, event: ConnectivityEvent) {
        let next = match event {
            ConnectivityEvent::IpAcquired => GateState::Allowed,
            ConnectivityEvent::Disconnected => GateState::Suppressed,
            ConnectivityEvent::Other => return,
        };
        if *self.tx.borrow() != next {
            tracing::info!(state = ?next, "Tunnel reconnect gate");
            let _ = self.tx.send(next);
        }
    }

    /// Wait until redialing is permitted.
    pub async fn permitted(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so `wait_for` cannot fail here.
        let _ = rx.wait_for(|s| *s == GateState::Allowed).await;
    }

    /// Feed connectivity notifications into the gate from a subscription.
    /// Only called when a tunnel endpoint exists; without one, nothing
    /// subscribes to the monitor at all.
    pub fn drive(
        gate: Arc<Self>,
        mut events: broadcast::Receiver<ConnectivityEvent>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => gate.apply(event),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table() {
        let gate = ReconnectGate::suppressed();
        assert_eq!(gate.state(), GateState::Suppressed);

        gate.apply(ConnectivityEvent::IpAcquired);
        assert_eq!(gate.state(), GateState::Allowed);

        gate.apply(ConnectivityEvent::Disconnected);
        assert_eq!(gate.state(), GateState::Suppressed);

        gate.apply(ConnectivityEvent::IpAcquired);
        assert_eq!(gate.state(), GateState::Allowed);
    }

    #[test]
    fn other_events_ignored() {
        let gate = ReconnectGate::suppressed();
        gate.apply(ConnectivityEvent::Other);
        assert_eq!(gate.state(), GateState::Suppressed);

        gate.apply(ConnectivityEvent::IpAcquired);
        gate.apply(ConnectivityEvent::Other);
        assert_eq!(gate.state(), GateState::Allowed);
    }

    #[test]
    fn repeated_disconnects_stay_suppressed() {
        let gate = ReconnectGate::suppressed();
        for _ in 0..3 {
            gate.apply(ConnectivityEvent::Disconnected);
            assert_eq!(gate.state(), GateState::Suppressed);
        }
    }

    #[tokio::test]
    async fn permitted_unblocks_on_ip_acquired() {
        let gate = Arc::new(ReconnectGate::suppressed());
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.permitted().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.apply(ConnectivityEvent::IpAcquired);
        waiter.await.unwrap();
    }
}
