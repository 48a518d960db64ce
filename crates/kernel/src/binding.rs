//! Attach/detach glue for external observers (UI components, loggers,
//! devtools panels). An observer only ever sees the engine through a
//! subscription; reads and writes go through the engine itself.

use serde_json::Value;
use statesync_common::ChangedKeys;
use std::rc::Rc;

use crate::engine::StateEngine;
use crate::error::KernelError;
use crate::registry::{KeyScope, Listener, Subscription};

/// Something that reacts to state changes.
pub trait StateObserver {
    /// Called after each write that touches the observer's scope. Keyed
    /// scopes get one call per changed key, with a single-key set.
    fn state_changed(&self, state: &Value, changed: &ChangedKeys);

    /// Keys this observer cares about. Defaults to everything.
    fn scope(&self) -> KeyScope {
        KeyScope::All
    }
}

/// Connects one observer to at most one engine at a time.
///
/// `attach` on connect, `detach` on disconnect. Dropping the binding
/// detaches it.
pub struct Binding {
    observer: Rc<dyn StateObserver>,
    subscription: Option<Subscription>,
}

impl Binding {
    pub fn new(observer: Rc<dyn StateObserver>) -> Self {
        Self {
            observer,
            subscription: None,
        }
    }

    /// Subscribe the observer to `engine`, replacing any previous attachment.
    pub fn attach(&mut self, engine: &StateEngine) -> Result<(), KernelError> {
        self.detach();
        let observer = Rc::clone(&self.observer);
        let scope = observer.scope();
        let listener = match scope {
            KeyScope::All => Listener::global(move |state, changed| {
                observer.state_changed(state, changed);
            }),
            KeyScope::Keys(_) => Listener::keyed(move |_, key, state| {
                observer.state_changed(state, &ChangedKeys::single(key));
            }),
        };
        self.subscription = Some(engine.subscribe(&listener, scope)?);
        Ok(())
    }

    /// Drop the subscription. Safe to call when not attached.
    pub fn detach(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    pub fn is_attached(&self) -> bool {
        self.subscription.is_some()
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.detach();
    }
}
