//! Dot-separated path access into JSON trees.
//!
//! A path such as `"todos.1.completed"` is split on `.`; each segment is a
//! mapping key, or an index when the value it is applied to is a sequence.

use serde_json::{Map, Value};

/// Errors from writing through a path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("path is empty or contains an empty segment")]
    Empty,
    #[error("cannot descend into non-container value at segment '{segment}'")]
    NotAContainer { segment: String },
    #[error("segment '{segment}' is not a valid sequence index")]
    InvalidIndex { segment: String },
    #[error("index '{segment}' is past the end of a sequence of length {len}")]
    IndexOutOfBounds { segment: String, len: usize },
}

/// Stateless helpers for reading and writing values at dot paths.
pub struct PathResolver;

impl PathResolver {
    /// Split a path into its segments. An empty path yields no segments.
    pub fn segments(path: &str) -> Vec<&str> {
        if path.is_empty() {
            Vec::new()
        } else {
            path.split('.').collect()
        }
    }

    /// First segment of a path: the top-level key it touches.
    pub fn top_level(path: &str) -> &str {
        path.split('.').next().unwrap_or(path)
    }

    /// Whether the path addresses something below the top level.
    pub fn is_nested(path: &str) -> bool {
        path.contains('.')
    }

    /// Resolve the value at `path`. The empty path resolves to `root`.
    ///
    /// Returns `None` if any segment is missing or indexes into a primitive.
    pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
        let mut current = root;
        for segment in Self::segments(path) {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Write `value` at `path`, creating missing intermediate mappings.
    ///
    /// Sequence indices replace in range or append at `len`; anything
    /// further is `PathError::IndexOutOfBounds`.
    pub fn set(root: &mut Value, path: &str, value: Value) -> Result<(), PathError> {
        let segments = Self::segments(path);
        if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
            return Err(PathError::Empty);
        }
        set_in(root, &segments, value)
    }

    /// Build a fresh tree holding only the values addressed by `paths`.
    ///
    /// Each selected value lands at the same nested location it had in
    /// `root`; siblings that were not selected are left out. Paths that do
    /// not resolve are skipped.
    pub fn select<S: AsRef<str>>(root: &Value, paths: &[S]) -> Value {
        let mut out = Value::Object(Map::new());
        for path in paths {
            let segments = Self::segments(path.as_ref());
            if segments.is_empty() || Self::get(root, path.as_ref()).is_none() {
                continue;
            }
            copy_into(root, &mut out, &segments);
        }
        out
    }
}

fn set_in(current: &mut Value, segments: &[&str], value: Value) -> Result<(), PathError> {
    let Some((head, rest)) = segments.split_first() else {
        *current = value;
        return Ok(());
    };
    match current {
        Value::Object(map) => {
            if rest.is_empty() {
                map.insert((*head).to_owned(), value);
                return Ok(());
            }
            let child = map
                .entry((*head).to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            if child.is_null() {
                *child = Value::Object(Map::new());
            }
            set_in(child, rest, value)
        }
        Value::Array(items) => {
            let index = head.parse::<usize>().map_err(|_| PathError::InvalidIndex {
                segment: (*head).to_owned(),
            })?;
            let len = items.len();
            if index > len {
                return Err(PathError::IndexOutOfBounds {
                    segment: (*head).to_owned(),
                    len,
                });
            }
            if index == len {
                items.push(Value::Null);
            }
            let child = &mut items[index];
            if !rest.is_empty() && child.is_null() {
                *child = Value::Object(Map::new());
            }
            set_in(child, rest, value)
        }
        _ => Err(PathError::NotAContainer {
            segment: (*head).to_owned(),
        }),
    }
}

/// Copy the value at `segments` from `src` into `dst`, mirroring the
/// container kinds found along the way in `src`.
fn copy_into(src: &Value, dst: &mut Value, segments: &[&str]) {
    let Some((head, rest)) = segments.split_first() else {
        *dst = src.clone();
        return;
    };
    match src {
        Value::Object(src_map) => {
            let Some(src_child) = src_map.get(*head) else {
                return;
            };
            if !dst.is_object() {
                *dst = Value::Object(Map::new());
            }
            if let Value::Object(dst_map) = dst {
                let dst_child = dst_map.entry((*head).to_owned()).or_insert(Value::Null);
                copy_into(src_child, dst_child, rest);
            }
        }
        Value::Array(src_items) => {
            let Some(index) = head.parse::<usize>().ok() else {
                return;
            };
            let Some(src_child) = src_items.get(index) else {
                return;
            };
            if !dst.is_array() {
                *dst = Value::Array(Vec::new());
            }
            if let Value::Array(dst_items) = dst {
                if index >= dst_items.len() {
                    dst_items.resize(index + 1, Value::Null);
                }
                copy_into(src_child, &mut dst_items[index], rest);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_top_level_and_nested() {
        let state = json!({"user": {"name": "Ada", "tags": ["a", "b"]}});
        assert_eq!(PathResolver::get(&state, "user.name"), Some(&json!("Ada")));
        assert_eq!(PathResolver::get(&state, "user.tags.1"), Some(&json!("b")));
        assert_eq!(PathResolver::get(&state, ""), Some(&state));
    }

    #[test]
    fn get_missing_is_none() {
        let state = json!({"user": {"name": "Ada"}, "todos": [{"id": 1}]});
        assert!(PathResolver::get(&state, "user.email").is_none());
        assert!(PathResolver::get(&state, "user.name.first").is_none());
        assert!(PathResolver::get(&state, "todos.5.id").is_none());
        assert!(PathResolver::get(&state, "todos.first").is_none());
        assert!(PathResolver::get(&state, "nothing.here").is_none());
    }

    #[test]
    fn numeric_key_on_mapping_is_a_key() {
        let state = json!({"rooms": {"1": "lobby"}});
        assert_eq!(PathResolver::get(&state, "rooms.1"), Some(&json!("lobby")));
    }

    #[test]
    fn set_creates_intermediate_mappings() {
        let mut state = json!({});
        PathResolver::set(&mut state, "a.b.c", json!(42)).unwrap();
        assert_eq!(state, json!({"a": {"b": {"c": 42}}}));
    }

    #[test]
    fn set_into_sequence_element() {
        let mut state = json!({"todos": [{"id": 1, "completed": false}]});
        PathResolver::set(&mut state, "todos.0.completed", json!(true)).unwrap();
        assert_eq!(state, json!({"todos": [{"id": 1, "completed": true}]}));
    }

    #[test]
    fn set_at_len_appends() {
        let mut state = json!({"list": [1]});
        PathResolver::set(&mut state, "list.1", json!(2)).unwrap();
        PathResolver::set(&mut state, "list.2.name", json!("x")).unwrap();
        assert_eq!(state, json!({"list": [1, 2, {"name": "x"}]}));
    }

    #[test]
    fn set_past_end_is_out_of_bounds() {
        let mut state = json!({"list": [1]});
        for path in ["list.3", "list.2000000", "list.18446744073709551615"] {
            let err = PathResolver::set(&mut state, path, json!(true)).unwrap_err();
            assert!(matches!(err, PathError::IndexOutOfBounds { len: 1, .. }), "{path}");
        }
        assert_eq!(state, json!({"list": [1]}));
    }

    #[test]
    fn set_through_primitive_fails() {
        let mut state = json!({"count": 3});
        let err = PathResolver::set(&mut state, "count.value", json!(1)).unwrap_err();
        assert_eq!(
            err,
            PathError::NotAContainer {
                segment: "value".into()
            }
        );
        assert_eq!(state, json!({"count": 3}));
    }

    #[test]
    fn set_rejects_bad_paths() {
        let mut state = json!({"list": []});
        assert_eq!(PathResolver::set(&mut state, "", json!(1)), Err(PathError::Empty));
        assert_eq!(PathResolver::set(&mut state, "a..b", json!(1)), Err(PathError::Empty));
        assert!(matches!(
            PathResolver::set(&mut state, "list.x", json!(1)),
            Err(PathError::InvalidIndex { .. })
        ));
    }

    #[test]
    fn select_keeps_only_listed_paths() {
        let state = json!({
            "user": {"name": "A", "email": "b@x.com"},
            "counter": 0
        });
        let picked = PathResolver::select(&state, &["user.name"]);
        assert_eq!(picked, json!({"user": {"name": "A"}}));
    }

    #[test]
    fn select_mirrors_sequences_and_skips_missing() {
        let state = json!({"todos": [{"id": 1, "title": "x"}, {"id": 2, "title": "y"}]});
        let picked = PathResolver::select(&state, &["todos.1.title", "missing.path"]);
        assert_eq!(picked, json!({"todos": [null, {"title": "y"}]}));
    }

    #[test]
    fn top_level_segment() {
        assert_eq!(PathResolver::top_level("todos.1.completed"), "todos");
        assert_eq!(PathResolver::top_level("user"), "user");
        assert!(PathResolver::is_nested("a.b"));
        assert!(!PathResolver::is_nested("a"));
    }
}
