use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a listener registered with the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListenerId(pub Uuid);

impl ListenerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Top-level keys whose values differ between two consecutive trees.
///
/// Backed by a `BTreeSet` so iteration order is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedKeys(BTreeSet<String>);

impl ChangedKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding exactly one key.
    pub fn single(key: impl Into<String>) -> Self {
        let mut keys = Self::new();
        keys.insert(key);
        keys
    }

    /// Add a key. Returns false if it was already present.
    pub fn insert(&mut self, key: impl Into<String>) -> bool {
        self.0.insert(key.into())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for ChangedKeys {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for ChangedKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, key) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{key}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_id_uniqueness() {
        let a = ListenerId::new();
        let b = ListenerId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn changed_keys_iterate_sorted() {
        let keys: ChangedKeys = ["c", "a", "b"].into_iter().collect();
        let order: Vec<&str> = keys.iter().collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn changed_keys_insert_dedupes() {
        let mut keys = ChangedKeys::single("user");
        assert!(!keys.insert("user"));
        assert!(keys.insert("todos"));
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("todos"));
    }

    #[test]
    fn changed_keys_display() {
        let keys: ChangedKeys = ["b", "a"].into_iter().collect();
        assert_eq!(format!("{keys}"), "{a, b}");
        assert_eq!(format!("{}", ChangedKeys::new()), "{}");
    }
}
