//! The recursive merge used by both `include:` (spec §4.1 step 2) and
//! `extends:` (step 3): scalars replace, objects merge deeply, arrays
//! concatenate, and a key ending in `:` is a terminal literal that always
//! replaces rather than recursing (mirrors the deep-merge-over-JSON-values
//! technique the teacher uses for config overlays, generalized to
//! list-appending since the spec calls for concatenation, not replacement).

use serde_json::Value;

/// Suffix marking a key as a terminal literal: its value always replaces
/// the base's, even if both sides are objects or arrays.
const LITERAL_SUFFIX: char = ':';

/// Merges `overlay` into `base` in place, per the rules above. `overlay`
/// wins on scalar conflicts and object merges recurse; array values from
/// `overlay` are appended after `base`'s own array values.
pub fn merge_into(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let literal = key.ends_with(LITERAL_SUFFIX);
                match base_map.get_mut(&key) {
                    Some(base_value) if !literal => match (&base_value, &overlay_value) {
                        (Value::Array(_), Value::Array(_)) => {
                            if let (Value::Array(b), Value::Array(o)) =
                                (base_value.take(), overlay_value)
                            {
                                let mut combined = b;
                                combined.extend(o);
                                *base_value = Value::Array(combined);
                            }
                        }
                        _ => merge_into(base_value, overlay_value),
                    },
                    _ => {
                        base_map.insert(key, overlay_value);
                    }
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value;
        }
    }
}

/// Merges `patch` on top of `base`, returning a new combined value. Used
/// where callers want `merge(B, A)` to mean "B is base, A is the overlay".
pub fn merge(mut base: Value, patch: Value) -> Value {
    merge_into(&mut base, patch);
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_replace() {
        let base = json!({"a": 1});
        let overlay = json!({"a": 2});
        assert_eq!(merge(base, overlay), json!({"a": 2}));
    }

    #[test]
    fn objects_merge_deeply() {
        let base = json!({"vm": {"memory": 1024, "cpu": 1}});
        let overlay = json!({"vm": {"cpu": 2}});
        assert_eq!(
            merge(base, overlay),
            json!({"vm": {"memory": 1024, "cpu": 2}})
        );
    }

    #[test]
    fn arrays_concatenate() {
        let base = json!({"images": ["alpine"]});
        let overlay = json!({"images": ["redis"]});
        assert_eq!(merge(base, overlay), json!({"images": ["alpine", "redis"]}));
    }

    #[test]
    fn literal_suffix_replaces_without_recursion() {
        let base = json!({"labels:": {"a": 1, "b": 2}});
        let overlay = json!({"labels:": {"c": 3}});
        assert_eq!(merge(base, overlay), json!({"labels:": {"c": 3}}));
    }

    #[test]
    fn missing_key_is_inserted() {
        let base = json!({"a": 1});
        let overlay = json!({"b": 2});
        assert_eq!(merge(base, overlay), json!({"a": 1, "b": 2}));
    }
}
