//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection (local) or WS frame (tunnel)
//!     → server.rs (per-connection serving, dispatch)
//!     → registry.rs (endpoint match, per-endpoint auth)
//!     → handlers.rs (management endpoints)
//!     → fallback: static files or 404
//!
//! Connection close
//!     → restart coordinator hook (deferred reboot)
//! ```

pub mod auth;
pub mod handlers;
pub mod registry;
pub mod server;

pub use registry::{EndpointOptions, EndpointRegistry};
pub use server::{Ctx, ManagementServer, ServerContext, ServerError};
