//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the device
//! console. All types derive Serde traits; unknown keys are rejected so a
//! bad `/conf/save` body fails parsing instead of being silently dropped.

use serde::{Deserialize, Serialize};

/// Root configuration for the device.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    /// Device identity (id + password, used for the tunnel handshake).
    pub device: DeviceIdentity,

    /// HTTP management surface configuration.
    pub http: HttpConfig,

    /// ACL applied to keys in `/conf/save` bodies. Taken from the defaults,
    /// never from the incoming document.
    pub conf_acl: String,
}

/// Device identity.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceIdentity {
    /// Unique device id. Required (together with the password) for the
    /// tunnel to be brought up.
    pub id: String,

    /// Device password presented to the tunnel relay.
    pub password: String,
}

/// HTTP listener and endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    /// Master switch for the whole management surface.
    pub enable: bool,

    /// Bind address (e.g., "0.0.0.0:8080"). `None` disables the server
    /// without being an error.
    pub listen_addr: Option<String>,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Static file root. `None` disables file serving; unmatched requests
    /// then get a 404.
    pub document_root: Option<String>,

    /// Glob of paths the file server must pretend not to have.
    pub hidden_files: Option<String>,

    /// Realm sent in basic-auth challenges.
    pub auth_domain: String,

    /// Credentials file (`user:password` lines). `None` means no
    /// authentication on the management endpoints.
    pub auth_file: Option<String>,

    /// Directory uploaded files are written into.
    pub upload_dir: String,

    /// ACL applied to uploaded filenames.
    pub upload_acl: String,

    /// Optional TLS material for the local listener.
    pub tls: Option<TlsConfig>,

    /// Tunnel listener configuration.
    pub tunnel: TunnelConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enable: true,
            listen_addr: Some("0.0.0.0:8080".to_string()),
            max_connections: 256,
            document_root: None,
            hidden_files: None,
            auth_domain: "device".to_string(),
            auth_file: None,
            upload_dir: "uploads".to_string(),
            upload_acl: "*".to_string(),
            tls: None,
            tunnel: TunnelConfig::default(),
        }
    }
}

/// TLS configuration for the local listener.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert: String,

    /// Path to private key file (PEM).
    pub key: String,

    /// Optional CA bundle; when set, clients must present a certificate
    /// signed by it.
    pub ca: Option<String>,

    /// The device is a constrained platform variant: narrow the cipher-suite
    /// list instead of using the provider defaults.
    pub constrained_platform: bool,

    /// Hardware-accelerated elliptic-curve crypto is available. Only
    /// consulted when `constrained_platform` is set.
    pub hardware_crypto: bool,
}

/// Tunnel (outbound relay connection) configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TunnelConfig {
    /// Enable the tunnel listener.
    pub enable: bool,

    /// Relay address template; the dialed host is `<device_id>.<addr>`.
    pub addr: String,

    /// Base delay for redial backoff in milliseconds.
    pub reconnect_base_ms: u64,

    /// Maximum delay for redial backoff in milliseconds.
    pub reconnect_max_ms: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            enable: false,
            addr: String::new(),
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 60_000,
        }
    }
}

/// Read-only diagnostic variables, emitted through the same JSON path as the
/// configuration schema.
#[derive(Debug, Clone, Serialize)]
pub struct RoVars {
    pub fw_version: &'static str,
    pub fw_id: String,
    pub arch: &'static str,
    pub device_id: String,
    pub uptime_secs: u64,
}

impl DeviceConfig {
    /// Whether both halves of the tunnel credential pair are present.
    pub fn tunnel_credentials_present(&self) -> bool {
        !self.device.id.is_empty() && !self.device.password.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_serializable() {
        let cfg = DeviceConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: DeviceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn unknown_keys_rejected() {
        let err = serde_json::from_str::<DeviceConfig>(r#"{"no_such_section":{}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn tunnel_credentials() {
        let mut cfg = DeviceConfig::default();
        assert!(!cfg.tunnel_credentials_present());
        cfg.device.id = "dev0".into();
        assert!(!cfg.tunnel_credentials_present());
        cfg.device.password = "secret".into();
        assert!(cfg.tunnel_credentials_present());
    }
}
