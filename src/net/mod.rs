//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (optional TLS handshake, cipher-suite policy)
//!     → connection.rs (identity, lifetime tracking)
//!     → Hand off to HTTP layer
//!
//! Outbound tunnel
//!     → tunnel.rs (dial relay, frame multiplexing, gated redial)
//! ```

pub mod connection;
pub mod listener;
pub mod tls;
pub mod tunnel;

pub use connection::{ConnectionId, ConnectionTracker};
pub use listener::{Listener, ListenerError};
pub use tunnel::{TunnelClient, TunnelError, TunnelFrame};
