//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Restart (restart.rs):
//!     Handler marks connection → response flushed → connection closes
//!     → coordinator clears flag → restart primitive
//!
//! Reconnect gate (gate.rs):
//!     Connectivity manager → monitor broadcast (connectivity.rs)
//!     → gate transition (Suppressed ⇄ Allowed)
//!     → tunnel redial loop awaits permission
//! ```
//!
//! # Design Decisions
//! - The coordinator's close hook is the only restart path
//! - Gate state lives in a watch channel so the tunnel can await it
//! - Nothing subscribes to connectivity when no tunnel is configured

pub mod connectivity;
pub mod gate;
pub mod restart;

pub use connectivity::{ConnectivityEvent, ConnectivityMonitor};
pub use gate::{GateState, ReconnectGate};
pub use restart::{ProcessRestart, RestartCoordinator, SystemRestart};
