use serde_json::Value;
use statesync_common::PathResolver;

use crate::config::{normalize_persistent_keys, PersistenceConfig, DEFAULT_STORAGE_KEY};
use crate::store::{StorageAdapter, StorageError};

/// Writes the state tree, or the configured parts of it, to one storage
/// adapter under one key.
///
/// All storage failures stop here: they are logged and turned into a
/// `false` / `None` result so an in-memory write never fails because the
/// backend did.
pub struct PersistenceManager {
    key: String,
    enabled: bool,
    persistent_keys: Option<Vec<String>>,
    adapter: Box<dyn StorageAdapter>,
}

impl PersistenceManager {
    /// A disabled manager over `adapter` using the default storage key.
    pub fn new(adapter: Box<dyn StorageAdapter>) -> Self {
        Self {
            key: DEFAULT_STORAGE_KEY.to_owned(),
            enabled: false,
            persistent_keys: None,
            adapter,
        }
    }

    /// Build the adapter named by `config.storage` and apply the rest of the
    /// configuration.
    pub fn from_config(config: &PersistenceConfig) -> Result<Self, StorageError> {
        let adapter = config.storage.build()?;
        Ok(Self::with_adapter(config, adapter))
    }

    /// Apply `config` but use the given adapter instead of building one.
    pub fn with_adapter(config: &PersistenceConfig, adapter: Box<dyn StorageAdapter>) -> Self {
        Self {
            key: config.key.clone(),
            enabled: config.enabled,
            persistent_keys: config.persistent_keys.clone(),
            adapter,
        }
    }

    /// Persist `state`. Returns whether the adapter accepted the write.
    pub fn save(&mut self, state: &Value) -> bool {
        if !self.enabled {
            return false;
        }
        let filtered;
        let payload = match &self.persistent_keys {
            Some(paths) => {
                filtered = PathResolver::select(state, paths);
                &filtered
            }
            None => state,
        };
        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(key = %self.key, error = %e, "failed to serialize state");
                return false;
            }
        };
        match self.adapter.set_item(&self.key, &text) {
            Ok(()) => {
                tracing::debug!(key = %self.key, adapter = self.adapter.name(), bytes = text.len(), "state saved");
                true
            }
            Err(e) => {
                tracing::error!(key = %self.key, adapter = self.adapter.name(), error = %e, "failed to save state");
                false
            }
        }
    }

    /// Read back the stored tree, if any.
    pub fn load(&self) -> Option<Value> {
        if !self.enabled {
            return None;
        }
        let text = match self.adapter.get_item(&self.key) {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!(key = %self.key, adapter = self.adapter.name(), error = %e, "failed to read stored state");
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(key = %self.key, error = %e, "stored state is not valid JSON");
                None
            }
        }
    }

    /// Remove the stored entry.
    pub fn clear(&mut self) -> bool {
        if !self.enabled {
            return false;
        }
        match self.adapter.remove_item(&self.key) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(key = %self.key, adapter = self.adapter.name(), error = %e, "failed to clear stored state");
                false
            }
        }
    }

    /// Whether `load` would return something.
    pub fn exists(&self) -> bool {
        self.load().is_some()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn set_key(&mut self, key: impl Into<String>) {
        self.key = key.into();
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Configured paths, or `None` when the whole tree is persisted.
    pub fn persistent_keys(&self) -> Option<&[String]> {
        self.persistent_keys.as_deref()
    }

    pub fn set_persistent_keys(&mut self, keys: Option<Vec<String>>) {
        self.persistent_keys = keys;
    }

    /// Set persistent keys from loosely typed input. Anything other than an
    /// array of strings resets to `None`.
    pub fn set_persistent_keys_value(&mut self, keys: &Value) {
        self.persistent_keys = normalize_persistent_keys(keys);
    }

    pub fn adapter(&self) -> &dyn StorageAdapter {
        self.adapter.as_ref()
    }

    /// Swap the backend and return the previous one. Data already stored in
    /// the old backend stays there.
    pub fn set_adapter(&mut self, adapter: Box<dyn StorageAdapter>) -> Box<dyn StorageAdapter> {
        tracing::debug!(from = self.adapter.name(), to = adapter.name(), "storage adapter swapped");
        std::mem::replace(&mut self.adapter, adapter)
    }
}

impl std::fmt::Debug for PersistenceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceManager")
            .field("key", &self.key)
            .field("enabled", &self.enabled)
            .field("persistent_keys", &self.persistent_keys)
            .field("adapter", &self.adapter.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStorage, SessionStorage};
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Counts every call and delegates to a memory store.
    struct SpyStorage {
        calls: Rc<Cell<usize>>,
        inner: MemoryStorage,
    }

    impl StorageAdapter for SpyStorage {
        fn name(&self) -> &str {
            "spy"
        }

        fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.calls.set(self.calls.get() + 1);
            self.inner.get_item(key)
        }

        fn set_item(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
            self.calls.set(self.calls.get() + 1);
            self.inner.set_item(key, value)
        }

        fn remove_item(&mut self, key: &str) -> Result<(), StorageError> {
            self.calls.set(self.calls.get() + 1);
            self.inner.remove_item(key)
        }
    }

    /// Fails every call.
    struct BrokenStorage;

    impl StorageAdapter for BrokenStorage {
        fn name(&self) -> &str {
            "broken"
        }

        fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable("backend offline".into()))
        }

        fn set_item(&mut self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("backend offline".into()))
        }

        fn remove_item(&mut self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("backend offline".into()))
        }
    }

    fn enabled_memory() -> PersistenceManager {
        PersistenceManager::with_adapter(
            &PersistenceConfig::enabled(),
            Box::new(MemoryStorage::new()),
        )
    }

    #[test]
    fn save_and_load_whole_tree() {
        let mut manager = enabled_memory();
        let state = json!({"counter": 3, "user": {"name": "A"}});
        assert!(manager.save(&state));
        assert_eq!(manager.load(), Some(state));
        assert!(manager.exists());
    }

    #[test]
    fn filtered_save_keeps_only_listed_paths() {
        let mut manager = enabled_memory();
        manager.set_persistent_keys(Some(vec!["user.name".into()]));
        let state = json!({"user": {"name": "A", "email": "b@x.com"}, "counter": 0});
        assert!(manager.save(&state));
        assert_eq!(manager.load(), Some(json!({"user": {"name": "A"}})));
    }

    #[test]
    fn stored_text_is_plain_json() {
        let session = SessionStorage::new();
        let mut manager =
            PersistenceManager::with_adapter(&PersistenceConfig::enabled(), Box::new(session.clone()));
        manager.save(&json!({"a": [1, 2]}));
        assert_eq!(
            session.get_item(DEFAULT_STORAGE_KEY).unwrap().as_deref(),
            Some(r#"{"a":[1,2]}"#)
        );
    }

    #[test]
    fn clear_removes_entry() {
        let mut manager = enabled_memory();
        manager.save(&json!({"a": 1}));
        assert!(manager.clear());
        assert!(!manager.exists());
        assert_eq!(manager.load(), None);
    }

    #[test]
    fn disabled_manager_never_touches_adapter() {
        let calls = Rc::new(Cell::new(0));
        let mut manager = PersistenceManager::new(Box::new(SpyStorage {
            calls: calls.clone(),
            inner: MemoryStorage::new(),
        }));
        assert!(!manager.is_enabled());
        assert!(!manager.save(&json!({"a": 1})));
        assert_eq!(manager.load(), None);
        assert!(!manager.clear());
        assert!(!manager.exists());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn adapter_failures_are_swallowed() {
        let mut manager =
            PersistenceManager::with_adapter(&PersistenceConfig::enabled(), Box::new(BrokenStorage));
        assert!(!manager.save(&json!({"a": 1})));
        assert_eq!(manager.load(), None);
        assert!(!manager.clear());
        assert!(!manager.exists());
    }

    #[test]
    fn quota_exceeded_returns_false() {
        let mut manager = PersistenceManager::with_adapter(
            &PersistenceConfig::enabled(),
            Box::new(MemoryStorage::with_quota(16)),
        );
        assert!(!manager.save(&json!({"payload": "far too large for the quota"})));
        assert!(!manager.exists());
    }

    #[test]
    fn corrupt_stored_text_loads_as_none() {
        let mut session = SessionStorage::new();
        session.set_item("app_state", "{not json").unwrap();
        let manager =
            PersistenceManager::with_adapter(&PersistenceConfig::enabled(), Box::new(session));
        assert_eq!(manager.load(), None);
        assert!(!manager.exists());
    }

    #[test]
    fn non_array_persistent_keys_reset_to_everything() {
        let mut manager = enabled_memory();
        manager.set_persistent_keys(Some(vec!["user".into()]));
        manager.set_persistent_keys_value(&json!("user"));
        assert_eq!(manager.persistent_keys(), None);

        manager.set_persistent_keys_value(&json!(["todos"]));
        assert_eq!(manager.persistent_keys(), Some(&["todos".to_owned()][..]));
    }

    #[test]
    fn key_change_targets_new_entry() {
        let mut manager = enabled_memory();
        manager.save(&json!({"v": 1}));
        manager.set_key("other");
        assert_eq!(manager.key(), "other");
        assert!(!manager.exists());
        manager.save(&json!({"v": 2}));
        assert_eq!(manager.load(), Some(json!({"v": 2})));
    }

    #[test]
    fn swapping_adapter_does_not_migrate() {
        let mut manager = enabled_memory();
        manager.save(&json!({"v": 1}));
        let previous = manager.set_adapter(Box::new(SessionStorage::new()));
        assert_eq!(previous.name(), "memory");
        assert_eq!(manager.adapter().name(), "session");
        assert!(!manager.exists());
        assert!(previous.get_item(DEFAULT_STORAGE_KEY).unwrap().is_some());
    }

    #[test]
    fn from_config_builds_adapter() {
        let tmp = tempfile::tempdir().unwrap();
        let config = PersistenceConfig {
            enabled: true,
            storage: crate::StorageKind::Local {
                dir: tmp.path().to_path_buf(),
            },
            ..PersistenceConfig::default()
        };
        let mut manager = PersistenceManager::from_config(&config).unwrap();
        assert!(manager.save(&json!({"x": true})));
        assert!(tmp.path().join("app_state.json").is_file());
    }
}
