//! JSON merging for file outputs that other programs may edit.
//!
//! Broadcast graphics tools sometimes write into the same JSON files the
//! engine produces. [`merge_json`] folds those edits into the engine's next
//! write instead of overwriting them.

use serde_json::{Map, Value};

/// Three-way merge of the engine's `next` output onto the `disk` content,
/// where `base` is what the engine last wrote.
///
/// - a key the engine did not change since `base` keeps its on-disk value
///   (or stays deleted if it was removed on disk)
/// - a key the engine changed takes the engine's value
/// - a key the engine removed is removed
/// - a key that only exists on disk survives
///
/// Objects present on all three sides are merged recursively. Everything
/// else (arrays, scalars) is treated as a single value.
pub fn merge_json(base: &Value, disk: &Value, next: &Value) -> Value {
    match (base, disk, next) {
        (Value::Object(base), Value::Object(disk), Value::Object(next)) => {
            Value::Object(merge_objects(base, disk, next))
        }
        _ if base == next => disk.clone(),
        _ => next.clone(),
    }
}

fn merge_objects(
    base: &Map<String, Value>,
    disk: &Map<String, Value>,
    next: &Map<String, Value>,
) -> Map<String, Value> {
    let mut out = Map::new();

    for (key, next_value) in next {
        match (base.get(key), disk.get(key)) {
            (Some(base_value), Some(disk_value)) => {
                out.insert(key.clone(), merge_json(base_value, disk_value, next_value));
            }
            // Deleted externally and untouched by us
            (Some(base_value), None) if base_value == next_value => {}
            _ => {
                out.insert(key.clone(), next_value.clone());
            }
        }
    }

    for (key, disk_value) in disk {
        if !next.contains_key(key) && !base.contains_key(key) {
            out.insert(key.clone(), disk_value.clone());
        }
    }

    out
}

/// RFC 7396 merge patch: `null` deletes, objects recurse, anything else
/// replaces.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_external_edit_survives() {
        let base = json!({"p1": "Alice", "p2": "Bob", "color": "red"});
        let disk = json!({"p1": "Alice", "p2": "Bob", "color": "blue", "extra": 1});
        let next = json!({"p1": "Carol", "p2": "Bob", "color": "red"});

        assert_eq!(
            merge_json(&base, &disk, &next),
            json!({"p1": "Carol", "p2": "Bob", "color": "blue", "extra": 1})
        );
    }

    #[test]
    fn test_engine_wins_on_conflict() {
        let base = json!({"score": 1});
        let disk = json!({"score": 5});
        let next = json!({"score": 2});
        assert_eq!(merge_json(&base, &disk, &next), json!({"score": 2}));
    }

    #[test]
    fn test_deletions() {
        let base = json!({"a": 1, "b": 2, "c": 3});
        // b deleted on disk, c removed by the engine
        let disk = json!({"a": 1, "c": 3});
        let next = json!({"a": 1, "b": 2});
        assert_eq!(merge_json(&base, &disk, &next), json!({"a": 1}));
    }

    #[test]
    fn test_nested_objects() {
        let base = json!({"players": {"p1": {"name": "A", "score": 0}}});
        let disk = json!({"players": {"p1": {"name": "A", "score": 0, "flag": "se"}}});
        let next = json!({"players": {"p1": {"name": "A", "score": 1}}});
        assert_eq!(
            merge_json(&base, &disk, &next),
            json!({"players": {"p1": {"name": "A", "score": 1, "flag": "se"}}})
        );
    }

    #[test]
    fn test_unchanged_arrays_keep_disk_value() {
        let base = json!({"list": [1, 2]});
        let disk = json!({"list": [1, 2, 3]});
        assert_eq!(merge_json(&base, &disk, &base), disk);
    }

    #[test]
    fn test_merge_patch() {
        let mut target = json!({"a": 1, "b": {"c": 2, "d": 3}});
        merge_patch(&mut target, &json!({"a": null, "b": {"c": 4}, "e": [1]}));
        assert_eq!(target, json!({"b": {"c": 4, "d": 3}, "e": [1]}));

        merge_patch(&mut target, &json!("scalar"));
        assert_eq!(target, json!("scalar"));
    }
}
