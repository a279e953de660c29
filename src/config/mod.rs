//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! built-in defaults (schema.rs)
//!     → store.rs load (overlay persisted user file, ACL-checked)
//!     → DeviceConfig (effective, immutable for the process lifetime)
//!     → shared via Arc to all subsystems
//!
//! On /conf/save:
//!     defaults → scratch copy
//!     → overlay request body (ACL from defaults)
//!     → persist delta vs defaults
//!     → deferred restart picks up the new file
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a device restart
//! - All fields have defaults to allow minimal configs
//! - Persisted files contain only the delta from the defaults

pub mod acl;
pub mod schema;
pub mod store;

pub use schema::DeviceConfig;
pub use schema::RoVars;
pub use store::{ConfigError, ConfigStore};
