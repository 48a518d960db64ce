use serde_json::{Map, Value};
use statesync_common::{
    deep_merge, structurally_equal, ChangedKeys, ListenerId, PathError, PathResolver,
};
use statesync_persist::{MemoryStorage, PersistenceManager, StorageAdapter};
use std::cell::{RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use crate::config::EngineConfig;
use crate::error::KernelError;
use crate::registry::{KeyScope, Listener, Subscription, SubscriptionRegistry};

/// A write request: a partial mapping merged into the top level, or a
/// function of the current state producing one.
///
/// Keys containing `.` address nested locations, e.g.
/// `{"todos.1.completed": true}`.
pub enum StateUpdate<'a> {
    Patch(Value),
    Compute(Box<dyn FnOnce(&Value) -> Value + 'a>),
}

impl<'a> StateUpdate<'a> {
    pub fn compute(f: impl FnOnce(&Value) -> Value + 'a) -> Self {
        Self::Compute(Box::new(f))
    }

    fn resolve(self, current: &Value) -> Result<Map<String, Value>, KernelError> {
        let value = match self {
            Self::Patch(value) => value,
            Self::Compute(f) => f(current),
        };
        match value {
            Value::Object(map) => Ok(map),
            _ => Err(KernelError::NotAnObject("state update")),
        }
    }
}

impl From<Value> for StateUpdate<'_> {
    fn from(value: Value) -> Self {
        Self::Patch(value)
    }
}

impl From<Map<String, Value>> for StateUpdate<'_> {
    fn from(map: Map<String, Value>) -> Self {
        Self::Patch(Value::Object(map))
    }
}

/// The authoritative state tree.
///
/// All mutations go through `set_state` and `reset`. Each one publishes a
/// fresh tree, persists it when persistence is enabled, then notifies
/// subscribers. Observers that only hold a `snapshot()` can compare handles
/// with `Rc::ptr_eq` to learn whether anything changed.
///
/// The engine is single-threaded. Callbacks run with no internal borrow
/// held, so they may read, write, or unsubscribe; a write from inside a
/// callback completes (including its own notifications) before returning.
pub struct StateEngine {
    state: RefCell<Rc<Value>>,
    registry: SubscriptionRegistry,
    persistence: RefCell<PersistenceManager>,
}

impl StateEngine {
    /// Empty state, persistence disabled.
    pub fn new() -> Self {
        Self::from_parts(
            Value::Object(Map::new()),
            PersistenceManager::new(Box::new(MemoryStorage::new())),
        )
    }

    /// Build the engine and the storage backend named in `config`.
    ///
    /// A disabled configuration never opens the named backend and runs on
    /// in-memory storage instead.
    pub fn with_config(config: EngineConfig) -> Result<Self, KernelError> {
        let adapter: Box<dyn StorageAdapter> = if config.persistence.enabled {
            config.persistence.storage.build()?
        } else {
            Box::new(MemoryStorage::new())
        };
        Self::with_adapter(config, adapter)
    }

    /// Build the engine around an injected storage backend.
    ///
    /// When persistence is enabled, stored data is merged over the initial
    /// state: nested mappings merge, anything else is replaced.
    pub fn with_adapter(
        config: EngineConfig,
        adapter: Box<dyn StorageAdapter>,
    ) -> Result<Self, KernelError> {
        let EngineConfig {
            initial_state,
            persistence,
        } = config;
        if !initial_state.is_object() {
            return Err(KernelError::NotAnObject("initial state"));
        }
        let manager = PersistenceManager::with_adapter(&persistence, adapter);

        let mut state = initial_state;
        match manager.load() {
            Some(restored @ Value::Object(_)) => {
                tracing::debug!(key = manager.key(), "restoring persisted state");
                deep_merge(&mut state, restored);
            }
            Some(other) => {
                tracing::warn!(key = manager.key(), stored = ?other, "ignoring persisted state that is not a mapping");
            }
            None => {}
        }

        Ok(Self::from_parts(state, manager))
    }

    fn from_parts(state: Value, persistence: PersistenceManager) -> Self {
        Self {
            state: RefCell::new(Rc::new(state)),
            registry: SubscriptionRegistry::new(),
            persistence: RefCell::new(persistence),
        }
    }

    /// A copy of the whole tree. Mutating it never affects the engine.
    pub fn get_state(&self) -> Value {
        (*self.snapshot()).clone()
    }

    /// The value at a dot path, or `None` if any segment is missing.
    pub fn get_state_at(&self, path: &str) -> Option<Value> {
        PathResolver::get(&self.snapshot(), path).cloned()
    }

    /// Shared handle to the current tree. A new handle is published on every
    /// state-changing write.
    pub fn snapshot(&self) -> Rc<Value> {
        Rc::clone(&self.state.borrow())
    }

    /// Apply `update`, persist, notify, and return a copy of the new state.
    pub fn set_state<'a>(&self, update: impl Into<StateUpdate<'a>>) -> Result<Value, KernelError> {
        self.apply(update.into(), false)
    }

    /// Like `set_state`, but subscribers are not notified.
    pub fn set_state_silent<'a>(
        &self,
        update: impl Into<StateUpdate<'a>>,
    ) -> Result<Value, KernelError> {
        self.apply(update.into(), true)
    }

    /// Shorthand for `set_state(StateUpdate::compute(f))`.
    pub fn set_state_with<'a>(
        &self,
        f: impl FnOnce(&Value) -> Value + 'a,
    ) -> Result<Value, KernelError> {
        self.apply(StateUpdate::compute(f), false)
    }

    fn apply(&self, update: StateUpdate<'_>, silent: bool) -> Result<Value, KernelError> {
        let _span = tracing::info_span!("set_state", silent).entered();
        let previous = self.snapshot();
        let patch = update.resolve(&previous)?;

        let mut next = (*previous).clone();
        let mut touched = Vec::with_capacity(patch.len());
        for (key, value) in patch {
            touched.push(PathResolver::top_level(&key).to_owned());
            write_entry(&mut next, key, value)?;
        }

        let changed: ChangedKeys = touched
            .into_iter()
            .filter(|key| !same_entry(previous.get(key), next.get(key)))
            .collect();
        if changed.is_empty() {
            tracing::debug!("update produced no change");
            return Ok((*previous).clone());
        }

        let next = Rc::new(next);
        *self.state.borrow_mut() = Rc::clone(&next);
        tracing::debug!(%changed, "state updated");

        self.persist(&next);
        if !silent {
            self.registry.notify(Some(&previous), &next, &changed);
        }
        Ok((*next).clone())
    }

    /// Replace the whole tree. Always persists (when enabled) and always
    /// notifies, with every key of the new state reported as changed.
    pub fn reset(&self, initial_state: Value) -> Result<Value, KernelError> {
        let _span = tracing::info_span!("reset").entered();
        let Value::Object(map) = &initial_state else {
            return Err(KernelError::NotAnObject("reset state"));
        };
        let changed: ChangedKeys = map.keys().cloned().collect();

        let next = Rc::new(initial_state);
        *self.state.borrow_mut() = Rc::clone(&next);
        tracing::debug!(%changed, "state reset");

        self.persist(&next);
        self.registry.notify(None, &next, &changed);
        Ok((*next).clone())
    }

    fn persist(&self, state: &Value) {
        let mut persistence = self.persistence.borrow_mut();
        if persistence.is_enabled() && !persistence.save(state) {
            tracing::warn!(key = persistence.key(), "state kept in memory only, persistence failed");
        }
    }

    /// Register `listener` under `scope`.
    pub fn subscribe(
        &self,
        listener: &Listener,
        scope: impl Into<KeyScope>,
    ) -> Result<Subscription, KernelError> {
        self.registry.subscribe(listener, scope.into())
    }

    /// Subscribe `f` to every state-changing write.
    pub fn subscribe_all(&self, f: impl Fn(&Value, &ChangedKeys) + 'static) -> Subscription {
        self.registry.subscribe_global(f)
    }

    /// Subscribe `f` to the given keys or dot paths.
    pub fn subscribe_keys(
        &self,
        keys: impl Into<KeyScope>,
        f: impl Fn(&Value, &str, &Value) + 'static,
    ) -> Result<Subscription, KernelError> {
        self.registry.subscribe(&Listener::keyed(f), keys.into())
    }

    /// Remove `listener` from every scope. No-op if it was never registered.
    pub fn unsubscribe(&self, listener: &Listener) {
        self.unsubscribe_id(listener.id());
    }

    /// Remove every entry registered under `id`, e.g. one taken from
    /// `Subscription::listener_id` for callbacks passed to `subscribe_all`
    /// or `subscribe_keys`. Returns how many entries were removed.
    pub fn unsubscribe_id(&self, id: ListenerId) -> usize {
        self.registry.unsubscribe(id)
    }

    /// Number of registered subscription entries.
    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    /// Mutable access to the persistence layer. Release the guard before the
    /// next write.
    pub fn persistence(&self) -> RefMut<'_, PersistenceManager> {
        self.persistence.borrow_mut()
    }
}

impl Default for StateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateEngine")
            .field("state", &self.state.borrow())
            .field("subscribers", &self.registry.len())
            .field("persistence", &self.persistence.borrow())
            .finish()
    }
}

fn write_entry(tree: &mut Value, key: String, value: Value) -> Result<(), PathError> {
    if !PathResolver::is_nested(&key) {
        if let Value::Object(map) = &mut *tree {
            map.insert(key, value);
            return Ok(());
        }
    }
    PathResolver::set(tree, &key, value)
}

fn same_entry(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => structurally_equal(a, b),
        _ => false,
    }
}
