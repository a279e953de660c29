//! Configuration storage.
//!
//! The store owns the path of the persisted user configuration file and
//! implements the four operations the management endpoints need: produce
//! defaults, load the effective boot configuration, overlay a JSON document
//! onto a scratch copy (honoring the key ACL), and persist/reset the user
//! file. Persisted files contain only the keys that differ from the
//! defaults, so factory values can evolve between firmware versions without
//! being pinned by old saves.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::config::acl::AccessList;
use crate::config::schema::DeviceConfig;

/// Error type for configuration operations.
///
/// The numeric statuses mirror the wire envelope: -10 for load/persist
/// problems, -11 for documents that fail schema parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("defaults unavailable: {0}")]
    Defaults(String),

    #[error("invalid configuration: {0}")]
    Parse(String),

    #[error("failed to persist configuration: {0}")]
    Persist(String),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Numeric status reported in the JSON error envelope.
    pub fn status(&self) -> i32 {
        match self {
            ConfigError::Parse(_) => -11,
            _ => -10,
        }
    }
}

/// Handle to the persisted user configuration.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    user_path: PathBuf,
}

impl ConfigStore {
    pub fn new(user_path: impl Into<PathBuf>) -> Self {
        Self {
            user_path: user_path.into(),
        }
    }

    /// Path of the persisted user configuration file.
    pub fn user_path(&self) -> &Path {
        &self.user_path
    }

    /// Built-in configuration defaults, with no device overrides applied.
    pub fn defaults(&self) -> Result<DeviceConfig, ConfigError> {
        // Compiled-in defaults; the fallible signature is the collaborator
        // contract (a schema revision may make them unloadable).
        Ok(DeviceConfig::default())
    }

    /// Effective boot configuration: defaults overlaid with the persisted
    /// user file, if one exists. The overlay honors the ACL from the
    /// defaults, same as `/conf/save`.
    pub fn load(&self) -> Result<DeviceConfig, ConfigError> {
        let mut cfg = self.defaults()?;
        let acl = AccessList::parse(&cfg.conf_acl);
        match fs::read(&self.user_path) {
            Ok(bytes) => {
                Self::overlay(&mut cfg, &bytes, &acl)?;
                tracing::info!(path = %self.user_path.display(), "User configuration applied");
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.user_path.display(), "No user configuration");
            }
            Err(err) => return Err(err.into()),
        }
        Ok(cfg)
    }

    /// Overlay a JSON document onto `cfg`. Every leaf key in the document is
    /// checked against `acl` as a dotted path; a disallowed key fails the
    /// whole parse, leaving persisted state untouched.
    pub fn overlay(
        cfg: &mut DeviceConfig,
        body: &[u8],
        acl: &AccessList,
    ) -> Result<(), ConfigError> {
        let doc: Value =
            serde_json::from_slice(body).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let Value::Object(doc) = doc else {
            return Err(ConfigError::Parse("top-level value must be an object".into()));
        };
        let mut tree = serde_json::to_value(&*cfg)
            .map_err(|e| ConfigError::Defaults(e.to_string()))?;
        merge_checked(&mut tree, &doc, "", acl)?;
        *cfg = serde_json::from_value(tree).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(())
    }

    /// Persist `cfg` as the user configuration: only keys differing from the
    /// defaults are written.
    pub fn persist(&self, cfg: &DeviceConfig) -> Result<(), ConfigError> {
        let defaults = serde_json::to_value(self.defaults()?)
            .map_err(|e| ConfigError::Defaults(e.to_string()))?;
        let current =
            serde_json::to_value(cfg).map_err(|e| ConfigError::Persist(e.to_string()))?;
        let delta = diff(&defaults, &current).unwrap_or_else(|| Value::Object(Map::new()));
        let body = serde_json::to_vec_pretty(&delta)
            .map_err(|e| ConfigError::Persist(e.to_string()))?;
        if let Some(parent) = self.user_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.user_path, body)
            .map_err(|e| ConfigError::Persist(format!("{}: {e}", self.user_path.display())))?;
        tracing::info!(path = %self.user_path.display(), "Configuration saved");
        Ok(())
    }

    /// Delete the persisted user configuration, if present. Returns whether
    /// a file was actually removed.
    pub fn reset(&self) -> Result<bool, ConfigError> {
        match fs::remove_file(&self.user_path) {
            Ok(()) => {
                tracing::info!(path = %self.user_path.display(), "User configuration removed");
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// Recursively merge `overlay` into `target`, checking each leaf's dotted
/// path against the ACL.
fn merge_checked(
    target: &mut Value,
    overlay: &Map<String, Value>,
    prefix: &str,
    acl: &AccessList,
) -> Result<(), ConfigError> {
    for (key, value) in overlay {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        let slot = target
            .as_object_mut()
            .ok_or_else(|| ConfigError::Parse(format!("{path}: parent is not an object")))?
            .entry(key.clone())
            .or_insert(Value::Null);
        match value {
            Value::Object(inner) if slot.is_object() => {
                merge_checked(slot, inner, &path, acl)?;
            }
            _ => {
                if !acl.allows(&path) {
                    return Err(ConfigError::Parse(format!("{path}: access denied")));
                }
                *slot = value.clone();
            }
        }
    }
    Ok(())
}

/// Structural diff: the subset of `current` that differs from `defaults`.
/// Returns `None` when the values are equal.
fn diff(defaults: &Value, current: &Value) -> Option<Value> {
    match (defaults, current) {
        (Value::Object(d), Value::Object(c)) => {
            let mut out = Map::new();
            for (key, cur) in c {
                match d.get(key) {
                    Some(def) => {
                        if let Some(changed) = diff(def, cur) {
                            out.insert(key.clone(), changed);
                        }
                    }
                    None => {
                        out.insert(key.clone(), cur.clone());
                    }
                }
            }
            if out.is_empty() {
                None
            } else {
                Some(Value::Object(out))
            }
        }
        _ if defaults == current => None,
        _ => Some(current.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("conf.json"));
        (dir, store)
    }

    #[test]
    fn current_roundtrips_through_save_parser() {
        let (_dir, store) = store();
        let cfg = store.defaults().unwrap();
        let serialized = serde_json::to_vec(&cfg).unwrap();
        let mut scratch = store.defaults().unwrap();
        ConfigStore::overlay(&mut scratch, &serialized, &AccessList::parse("*")).unwrap();
        assert_eq!(cfg, scratch);
    }

    #[test]
    fn overlay_sets_nested_key() {
        let mut cfg = DeviceConfig::default();
        ConfigStore::overlay(
            &mut cfg,
            br#"{"http":{"enable":false},"device":{"id":"dev42"}}"#,
            &AccessList::parse("*"),
        )
        .unwrap();
        assert!(!cfg.http.enable);
        assert_eq!(cfg.device.id, "dev42");
    }

    #[test]
    fn overlay_rejects_denied_key() {
        let mut cfg = DeviceConfig::default();
        let err = ConfigStore::overlay(
            &mut cfg,
            br#"{"device":{"password":"pwned"}}"#,
            &AccessList::parse("-device.password,*"),
        )
        .unwrap_err();
        assert_eq!(err.status(), -11);
        assert_eq!(cfg.device.password, "");
    }

    #[test]
    fn overlay_rejects_bad_types() {
        let mut cfg = DeviceConfig::default();
        let err = ConfigStore::overlay(
            &mut cfg,
            br#"{"http":{"enable":"yes please"}}"#,
            &AccessList::parse("*"),
        )
        .unwrap_err();
        assert_eq!(err.status(), -11);
    }

    #[test]
    fn persist_writes_only_delta() {
        let (_dir, store) = store();
        let mut cfg = store.defaults().unwrap();
        cfg.device.id = "dev7".into();
        store.persist(&cfg).unwrap();

        let written: Value =
            serde_json::from_slice(&fs::read(store.user_path()).unwrap()).unwrap();
        assert_eq!(written, serde_json::json!({"device": {"id": "dev7"}}));
    }

    #[test]
    fn load_applies_persisted_overrides() {
        let (_dir, store) = store();
        let mut cfg = store.defaults().unwrap();
        cfg.http.max_connections = 7;
        store.persist(&cfg).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.http.max_connections, 7);
        assert_eq!(loaded.http.enable, true);
    }

    #[test]
    fn reset_removes_file_once() {
        let (_dir, store) = store();
        store.persist(&store.defaults().unwrap()).unwrap();
        assert!(store.reset().unwrap());
        assert!(!store.reset().unwrap());
    }
}
