use serde_json::Value;
use statesync_common::{structurally_equal, ChangedKeys, ListenerId, PathResolver};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use crate::error::KernelError;

type GlobalFn = dyn Fn(&Value, &ChangedKeys);
type KeyedFn = dyn Fn(&Value, &str, &Value);

static NULL: Value = Value::Null;

#[derive(Clone)]
enum Callback {
    Global(Rc<GlobalFn>),
    Keyed(Rc<KeyedFn>),
}

/// A callback with a stable identity.
///
/// Clones share the id, so a listener registered under several scopes can be
/// removed from all of them with one `unsubscribe`.
#[derive(Clone)]
pub struct Listener {
    id: ListenerId,
    callback: Callback,
}

impl Listener {
    /// Called once per state-changing write with `(state, changed_keys)`.
    pub fn global(f: impl Fn(&Value, &ChangedKeys) + 'static) -> Self {
        Self {
            id: ListenerId::new(),
            callback: Callback::Global(Rc::new(f)),
        }
    }

    /// Called once per matching key with `(value_at_key, key, state)`.
    pub fn keyed(f: impl Fn(&Value, &str, &Value) + 'static) -> Self {
        Self {
            id: ListenerId::new(),
            callback: Callback::Keyed(Rc::new(f)),
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn is_global(&self) -> bool {
        matches!(self.callback, Callback::Global(_))
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_global() { "global" } else { "keyed" };
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("kind", &kind)
            .finish()
    }
}

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyScope {
    /// Every state-changing write.
    All,
    /// Specific keys or dot paths.
    Keys(Vec<String>),
}

impl From<&str> for KeyScope {
    fn from(key: &str) -> Self {
        Self::Keys(vec![key.to_owned()])
    }
}

impl From<String> for KeyScope {
    fn from(key: String) -> Self {
        Self::Keys(vec![key])
    }
}

impl From<Vec<String>> for KeyScope {
    fn from(keys: Vec<String>) -> Self {
        Self::Keys(keys)
    }
}

impl From<Vec<&str>> for KeyScope {
    fn from(keys: Vec<&str>) -> Self {
        Self::Keys(keys.into_iter().map(str::to_owned).collect())
    }
}

impl<const N: usize> From<[&str; N]> for KeyScope {
    fn from(keys: [&str; N]) -> Self {
        Self::Keys(keys.into_iter().map(str::to_owned).collect())
    }
}

#[derive(Clone)]
struct KeyEntry {
    path: String,
    listener: ListenerId,
    token: u64,
    callback: Rc<KeyedFn>,
}

#[derive(Clone)]
struct GlobalEntry {
    listener: ListenerId,
    token: u64,
    callback: Rc<GlobalFn>,
}

#[derive(Default)]
struct Entries {
    keyed: Vec<KeyEntry>,
    global: Vec<GlobalEntry>,
    next_token: u64,
}

impl Entries {
    fn retain(&mut self, keep: impl Fn(ListenerId, u64) -> bool) -> usize {
        let before = self.keyed.len() + self.global.len();
        self.keyed.retain(|e| keep(e.listener, e.token));
        self.global.retain(|e| keep(e.listener, e.token));
        before - (self.keyed.len() + self.global.len())
    }
}

/// Handle returned by `subscribe`. Calling `unsubscribe` more than once is a
/// no-op. Dropping the handle does not unsubscribe.
pub struct Subscription {
    entries: Weak<RefCell<Entries>>,
    listener: ListenerId,
    token: u64,
    active: Cell<bool>,
}

impl Subscription {
    /// Remove the entries created by this subscription.
    pub fn unsubscribe(&self) {
        if !self.active.replace(false) {
            return;
        }
        if let Some(entries) = self.entries.upgrade() {
            let token = self.token;
            let removed = entries.borrow_mut().retain(|_, t| t != token);
            tracing::debug!(listener = ?self.listener, removed, "subscription cancelled");
        }
    }

    pub fn listener_id(&self) -> ListenerId {
        self.listener
    }

    /// False once `unsubscribe` ran on this handle.
    pub fn is_active(&self) -> bool {
        self.active.get()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("listener", &self.listener)
            .field("active", &self.active.get())
            .finish()
    }
}

/// Ordered subscriber lists and the notification pass over them.
///
/// Key entries fire before global entries; within each tier entries fire in
/// registration order. Callbacks run with no internal borrow held, so they
/// may subscribe or unsubscribe; such changes apply from the next pass.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    entries: Rc<RefCell<Entries>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` under `scope`.
    ///
    /// Global listeners must use `KeyScope::All` and keyed listeners a
    /// non-empty key list; anything else is rejected immediately.
    pub fn subscribe(
        &self,
        listener: &Listener,
        scope: KeyScope,
    ) -> Result<Subscription, KernelError> {
        match (&listener.callback, scope) {
            (Callback::Global(callback), KeyScope::All) => {
                Ok(self.register_global(listener.id, Rc::clone(callback)))
            }
            (Callback::Keyed(callback), KeyScope::Keys(keys)) => {
                self.register_keyed(listener.id, callback, keys)
            }
            (Callback::Global(_), KeyScope::Keys(_)) => Err(KernelError::InvalidSubscriber(
                "global listener cannot be scoped to keys".into(),
            )),
            (Callback::Keyed(_), KeyScope::All) => Err(KernelError::InvalidSubscriber(
                "keyed listener needs a key scope".into(),
            )),
        }
    }

    /// Register `f` for every state-changing write. Cannot fail.
    pub fn subscribe_global(&self, f: impl Fn(&Value, &ChangedKeys) + 'static) -> Subscription {
        self.register_global(ListenerId::new(), Rc::new(f))
    }

    fn register_global(&self, listener: ListenerId, callback: Rc<GlobalFn>) -> Subscription {
        let mut entries = self.entries.borrow_mut();
        let token = entries.next_token;
        entries.next_token += 1;
        entries.global.push(GlobalEntry {
            listener,
            token,
            callback,
        });
        tracing::debug!(?listener, token, "subscribed");
        self.handle(listener, token)
    }

    fn register_keyed(
        &self,
        listener: ListenerId,
        callback: &Rc<KeyedFn>,
        keys: Vec<String>,
    ) -> Result<Subscription, KernelError> {
        if keys.is_empty() {
            return Err(KernelError::InvalidSubscriber(
                "key scope must name at least one key".into(),
            ));
        }
        if let Some(bad) = keys
            .iter()
            .find(|k| k.split('.').any(str::is_empty))
        {
            return Err(KernelError::InvalidSubscriber(format!(
                "'{bad}' is not a valid key path"
            )));
        }
        let mut entries = self.entries.borrow_mut();
        let token = entries.next_token;
        entries.next_token += 1;
        for path in keys {
            entries.keyed.push(KeyEntry {
                path,
                listener,
                token,
                callback: Rc::clone(callback),
            });
        }
        tracing::debug!(?listener, token, "subscribed");
        Ok(self.handle(listener, token))
    }

    fn handle(&self, listener: ListenerId, token: u64) -> Subscription {
        Subscription {
            entries: Rc::downgrade(&self.entries),
            listener,
            token,
            active: Cell::new(true),
        }
    }

    /// Remove every entry registered for `listener`. Returns how many were
    /// removed; zero when it was never registered.
    pub fn unsubscribe(&self, listener: ListenerId) -> usize {
        self.entries.borrow_mut().retain(|id, _| id != listener)
    }

    /// Number of registered entries (a keyed subscription counts once per key).
    pub fn len(&self) -> usize {
        let entries = self.entries.borrow();
        entries.keyed.len() + entries.global.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run one notification pass.
    ///
    /// `previous` is the tree before the write. When it is `None` every key
    /// entry under a changed top-level key fires, even for nested paths whose
    /// value did not move.
    pub fn notify(&self, previous: Option<&Value>, current: &Value, changed: &ChangedKeys) {
        let (keyed, global) = {
            let entries = self.entries.borrow();
            (entries.keyed.clone(), entries.global.clone())
        };

        for key in changed.iter() {
            for entry in keyed.iter().filter(|e| PathResolver::top_level(&e.path) == key) {
                let value = PathResolver::get(current, &entry.path);
                if PathResolver::is_nested(&entry.path) {
                    if let Some(previous) = previous {
                        let before = PathResolver::get(previous, &entry.path);
                        if same_slot(before, value) {
                            continue;
                        }
                    }
                }
                let value = value.unwrap_or(&NULL);
                guarded(&entry.path, || (entry.callback)(value, &entry.path, current));
            }
        }

        for entry in &global {
            guarded("*", || (entry.callback)(current, changed));
        }
    }
}

fn same_slot(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => structurally_equal(a, b),
        _ => false,
    }
}

/// Run one subscriber, logging instead of propagating a panic.
fn guarded(scope: &str, f: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        tracing::error!(scope, message = panic_message(payload.as_ref()), "subscriber panicked");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
