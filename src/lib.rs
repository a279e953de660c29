//! Embedded device HTTP management surface.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌────────────────────────────────────────────────┐
//!                       │                DEVICE CONSOLE                   │
//!                       │                                                 │
//!    Local client       │  ┌─────────┐    ┌──────────┐    ┌───────────┐  │
//!    ───────────────────┼─▶│   net   │───▶│   http   │───▶│ endpoint  │  │
//!                       │  │listener │    │dispatcher│    │ registry  │  │
//!                       │  └─────────┘    └──────────┘    └─────┬─────┘  │
//!                       │                                       │        │
//!    Relay (outbound WS)│  ┌─────────┐                          ▼        │
//!    ◀──────────────────┼─▶│ tunnel  │──────────────▶  ┌──────────────┐  │
//!                       │  │ client  │                 │  management  │  │
//!                       │  └────┬────┘                 │   handlers   │  │
//!                       │       │                      └──────┬───────┘  │
//!                       │  ┌────▼────────┐             ┌──────▼───────┐  │
//!                       │  │ reconnect   │             │   deferred   │  │
//!                       │  │ gate        │             │   restart    │  │
//!                       │  └─────────────┘             └──────────────┘  │
//!                       │                                                 │
//!                       │  ┌────────────────────────────────────────────┐ │
//!                       │  │   config store · connectivity · logging    │ │
//!                       │  └────────────────────────────────────────────┘ │
//!                       └────────────────────────────────────────────────┘
//! ```
//!
//! One handler set serves both interception surfaces: the local HTTP(S)
//! listener and the outbound WebSocket tunnel to a relay. A reconnect gate
//! keeps the tunnel from redialing while the device has no usable network
//! path, and the restart coordinator defers reboots until the triggering
//! response has been handed to the transport.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::DeviceConfig;
pub use config::store::ConfigStore;
pub use http::server::ManagementServer;
pub use lifecycle::restart::SystemRestart;
