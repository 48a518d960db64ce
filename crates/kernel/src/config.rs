use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use statesync_persist::{ConfigError, PersistenceConfig};
use std::path::Path;

/// Everything needed to construct a `StateEngine`.
///
/// `initial_state` defaults to an empty mapping and must be a mapping;
/// `persistence` defaults to disabled in-memory storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub initial_state: Value,
    pub persistence: PersistenceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_state: Value::Object(Map::new()),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use statesync_persist::StorageKind;

    #[test]
    fn default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.initial_state, json!({}));
        assert!(!config.persistence.enabled);
    }

    #[test]
    fn yaml_config_with_initial_state() {
        let config = EngineConfig::from_yaml_str(
            r#"
initial_state:
  counter: 0
  user:
    name: ""
persistence:
  enabled: true
  key: demo
  persistent_keys: [user.name]
  storage:
    kind: session
"#,
        )
        .unwrap();
        assert_eq!(config.initial_state, json!({"counter": 0, "user": {"name": ""}}));
        assert!(config.persistence.enabled);
        assert_eq!(config.persistence.key, "demo");
        assert_eq!(config.persistence.storage, StorageKind::Session);
    }

    #[test]
    fn yaml_file_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("engine.yaml");
        std::fs::write(&path, "persistence:\n  persistent_keys: not-a-list\n").unwrap();
        let config = EngineConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.persistence.persistent_keys, None);
        assert_eq!(config.initial_state, json!({}));
    }
}
