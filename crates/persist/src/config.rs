use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::store::{LocalStorage, MemoryStorage, SessionStorage, StorageAdapter, StorageError};

/// Storage key used when none is configured.
pub const DEFAULT_STORAGE_KEY: &str = "app_state";

/// Errors from loading persistence configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Which backend the manager should build when none is injected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageKind {
    #[default]
    Memory,
    /// One JSON file per key under `dir`.
    Local { dir: PathBuf },
    /// A fresh session scope. Share a scope between engines by injecting a
    /// cloned `SessionStorage` instead.
    Session,
}

impl StorageKind {
    pub fn build(&self) -> Result<Box<dyn StorageAdapter>, StorageError> {
        Ok(match self {
            Self::Memory => Box::new(MemoryStorage::new()),
            Self::Local { dir } => Box::new(LocalStorage::open(dir)?),
            Self::Session => Box::new(SessionStorage::new()),
        })
    }
}

/// Every recognized persistence option, with its default.
///
/// | field | default |
/// |---|---|
/// | `key` | `"app_state"` |
/// | `enabled` | `false` |
/// | `persistent_keys` | `None` (persist the whole tree) |
/// | `storage` | `memory` |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub key: String,
    pub enabled: bool,
    #[serde(deserialize_with = "lenient_persistent_keys")]
    pub persistent_keys: Option<Vec<String>>,
    pub storage: StorageKind,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_STORAGE_KEY.to_owned(),
            enabled: false,
            persistent_keys: None,
            storage: StorageKind::default(),
        }
    }
}

impl PersistenceConfig {
    /// Enabled persistence under the default key.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }
}

/// Interpret loosely typed persistent-key input.
///
/// Only an array of strings is accepted. Anything else means "persist
/// everything" so a typo can never cause partial persistence.
pub(crate) fn normalize_persistent_keys(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Null => None,
        Value::Array(items) => {
            let keys: Option<Vec<String>> = items
                .iter()
                .map(|item| item.as_str().map(str::to_owned))
                .collect();
            if keys.is_none() {
                tracing::warn!(?value, "persistent keys must all be strings, persisting everything");
            }
            keys
        }
        other => {
            tracing::warn!(value = ?other, "persistent keys must be an array, persisting everything");
            None
        }
    }
}

fn lenient_persistent_keys<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(normalize_persistent_keys))
}
