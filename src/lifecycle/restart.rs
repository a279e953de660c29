//! Deferred restart coordination.
//!
//! A handler that wants the device rebooted must not call the restart
//! primitive directly: the response for the triggering request is still
//! sitting in the transport's send buffer, and restarting now would orphan
//! the client with a connection reset and no body. Instead the handler marks
//! the connection, and the dispatcher performs the restart when that
//! connection reaches the closed state, after the transport has taken the
//! queued response bytes.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::net::connection::ConnectionId;

/// The system restart primitive, an external collaborator.
pub trait SystemRestart: Send + Sync {
    /// Restart the device after `delay`.
    fn restart(&self, delay: Duration);
}

/// Production restart: exit the process and let the platform supervisor
/// bring it back up.
#[derive(Debug, Default)]
pub struct ProcessRestart;

impl SystemRestart for ProcessRestart {
    fn restart(&self, delay: Duration) {
        tracing::warn!(delay_ms = delay.as_millis() as u64, "System restart");
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        std::process::exit(0);
    }
}

/// Tracks restart-pending flags per connection and performs the restart on
/// connection close.
#[derive(Clone)]
pub struct RestartCoordinator {
    pending: Arc<DashMap<ConnectionId, ()>>,
    restarter: Arc<dyn SystemRestart>,
}

impl RestartCoordinator {
    pub fn new(restarter: Arc<dyn SystemRestart>) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            restarter,
        }
    }

    /// Mark `conn` for a restart once its connection closes. Does not
    /// restart anything by itself.
    pub fn request_restart(&self, conn: ConnectionId) {
        tracing::debug!(conn = %conn, "Restart requested, deferred to connection close");
        self.pending.insert(conn, ());
    }

    /// Whether a restart is pending for `conn`.
    pub fn is_pending(&self, conn: ConnectionId) -> bool {
        self.pending.contains_key(&conn)
    }

    /// Connection-closed hook: if `conn` was marked, clear the flag and
    /// invoke the restart primitive. This is the only restart path, which
    /// guarantees the response was handed to the transport before teardown.
    /// Returns whether a restart was triggered.
    pub fn on_connection_closed(&self, conn: ConnectionId) -> bool {
        if self.pending.remove(&conn).is_some() {
            self.restarter.restart(Duration::ZERO);
            true
        } else {
            false
        }
    }
}
