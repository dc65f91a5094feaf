//! Pending change set.
//!
//! Producers and command handlers record `(path, value)` updates between two
//! flush cycles; the publisher drains the whole tree at once and ships it as a
//! single payload.
//!
//! ## Merge rules
//!
//! - A single-segment path (`"Cat"`) sets or replaces the top-level key.
//! - A multi-segment path (`"hall::lamp::state"`) is wrapped into nested
//!   one-key objects and deep-merged into the pending tree.
//! - Deep merge recurses only when both sides are JSON objects. Any other
//!   pairing (scalar over object, object over scalar, arrays) replaces the
//!   existing value outright; arrays are never merged element-wise.
//! - Empty segments are kept as literal `""` keys (`"a::::b"` → `a → "" → b`).
//!
//! Key order is insertion order at every level (`serde_json` is built with
//! `preserve_order`), so a flushed batch lists keys in the order they were
//! first recorded.

use std::sync::{Mutex, PoisonError};

use serde_json::{Map, Value};

/// Separator between segments of a change path.
pub const PATH_DELIMITER: &str = "::";

/// The nested structure accumulated between flushes.
pub type ChangeTree = Map<String, Value>;

/// Thread-safe accumulator for path-addressed changes.
///
/// The lock is never held across an `.await`; `drain` swaps the whole tree
/// out under the lock so a concurrent `record` lands either in the returned
/// tree or in the fresh one, never in neither.
#[derive(Debug, Default)]
pub struct ChangeAggregator {
    pending: Mutex<ChangeTree>,
}

impl ChangeAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change addressed by a `::`-delimited key.
    pub fn record_key(&self, key: &str, value: Value) {
        self.record(&split_path(key), value);
    }

    /// Record a change addressed by an explicit segment list.
    ///
    /// An empty segment list carries no address and is ignored.
    pub fn record<S: AsRef<str>>(&self, path: &[S], value: Value) {
        let Some((head, rest)) = path.split_first() else {
            return;
        };

        let mut pending = self.lock();
        if rest.is_empty() {
            pending.insert(head.as_ref().to_owned(), value);
            return;
        }

        let mut incoming = Map::new();
        incoming.insert(head.as_ref().to_owned(), nest(rest, value));
        deep_merge(&mut pending, incoming);
    }

    /// Take the pending tree, leaving an empty one in its place.
    pub fn drain(&self) -> ChangeTree {
        std::mem::take(&mut *self.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of top-level keys currently pending.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChangeTree> {
        // The tree is plain data; a panic elsewhere cannot leave it half-written.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Split a change key on [`PATH_DELIMITER`]. Always yields at least one segment.
pub fn split_path(key: &str) -> Vec<&str> {
    key.split(PATH_DELIMITER).collect()
}

/// Wrap `value` in one-key objects, innermost segment last:
/// `["b", "c"], v` → `{"b": {"c": v}}`.
pub fn nest<S: AsRef<str>>(path: &[S], value: Value) -> Value {
    path.iter().rev().fold(value, |inner, segment| {
        let mut wrapper = Map::new();
        wrapper.insert(segment.as_ref().to_owned(), inner);
        Value::Object(wrapper)
    })
}

/// Merge `incoming` into `target`, recursing where both sides are objects.
pub fn deep_merge(target: &mut ChangeTree, incoming: ChangeTree) {
    for (key, value) in incoming {
        match target.get_mut(&key) {
            Some(Value::Object(existing)) if value.is_object() => {
                if let Value::Object(next) = value {
                    deep_merge(existing, next);
                }
            }
            _ => {
                target.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree(value: Value) -> ChangeTree {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn single_segment_keeps_last_value_per_key() {
        let changes = ChangeAggregator::new();
        changes.record_key("Cat", json!(3));
        changes.record_key("Dog", json!(1));
        changes.record_key("Cat", json!(7));

        assert_eq!(changes.drain(), tree(json!({"Cat": 7, "Dog": 1})));
    }

    #[test]
    fn single_segment_replaces_existing_object() {
        let changes = ChangeAggregator::new();
        changes.record_key("a::x", json!(1));
        changes.record_key("a", json!({"y": 2}));

        assert_eq!(changes.drain(), tree(json!({"a": {"y": 2}})));
    }

    #[test]
    fn multi_segment_builds_nested_objects() {
        let changes = ChangeAggregator::new();
        changes.record(&["a", "b", "c"], json!("v"));

        assert_eq!(changes.drain(), tree(json!({"a": {"b": {"c": "v"}}})));
    }

    #[test]
    fn sibling_paths_merge_instead_of_replacing() {
        let changes = ChangeAggregator::new();
        changes.record_key("a::x", json!(1));
        changes.record_key("a::y", json!(2));

        assert_eq!(changes.drain(), tree(json!({"a": {"x": 1, "y": 2}})));
    }

    #[test]
    fn scalar_replaces_object_and_object_replaces_scalar() {
        let mut target = tree(json!({"a": {"x": 1}, "b": 5}));
        deep_merge(&mut target, tree(json!({"a": 5, "b": {"z": true}})));

        assert_eq!(target, tree(json!({"a": 5, "b": {"z": true}})));
    }

    #[test]
    fn arrays_are_replaced_not_merged() {
        let mut target = tree(json!({"list": [1, 2, 3]}));
        deep_merge(&mut target, tree(json!({"list": [4]})));

        assert_eq!(target, tree(json!({"list": [4]})));
    }

    #[test]
    fn empty_segments_become_literal_empty_keys() {
        let changes = ChangeAggregator::new();
        changes.record_key("::a::", json!(1));

        assert_eq!(changes.drain(), tree(json!({"": {"a": {"": 1}}})));
    }

    #[test]
    fn empty_segment_list_is_ignored() {
        let changes = ChangeAggregator::new();
        changes.record::<&str>(&[], json!(1));
        assert!(changes.is_empty());
    }

    #[test]
    fn drain_on_empty_returns_empty_tree() {
        let changes = ChangeAggregator::new();
        assert!(changes.drain().is_empty());
    }

    #[test]
    fn drain_resets_pending_tree() {
        let changes = ChangeAggregator::new();
        changes.record_key("Cow", json!(4));
        assert_eq!(changes.len(), 1);

        let first = changes.drain();
        changes.record_key("Goat", json!(9));
        let second = changes.drain();

        assert_eq!(first, tree(json!({"Cow": 4})));
        assert_eq!(second, tree(json!({"Goat": 9})));
        assert!(changes.is_empty());
    }

    #[test]
    fn keys_keep_insertion_order() {
        let changes = ChangeAggregator::new();
        for key in ["zeta", "alpha", "mid", "alpha"] {
            changes.record_key(key, json!(0));
        }
        changes.record_key("mid::b", json!(1));
        changes.record_key("mid::a", json!(1));

        let drained = changes.drain();
        let keys: Vec<&str> = drained.keys().map(String::as_str).collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn nest_wraps_from_last_segment_outward() {
        assert_eq!(nest(&["b", "c"], json!(1)), json!({"b": {"c": 1}}));
        assert_eq!(nest::<&str>(&[], json!(1)), json!(1));
    }
}
