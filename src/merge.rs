//! Recursive JSON merge used for server-profile deltas.
//!
//! Game servers report per-match profile changes as sparse deltas. The merge
//! is a pure function over JSON trees: objects merge key-by-key recursively,
//! while arrays and scalars replace the base value wholesale.

use serde_json::Value;

/// Merges `delta` into `base` in place.
///
/// Fields absent from the delta are left untouched; a non-object delta value
/// (scalar, array or null) replaces whatever the base held at that key.
pub fn merge_json(base: &mut Value, delta: &Value) {
    match (base, delta) {
        (Value::Object(base_map), Value::Object(delta_map)) => {
            for (key, delta_value) in delta_map {
                match base_map.get_mut(key) {
                    Some(base_value) => merge_json(base_value, delta_value),
                    None => {
                        base_map.insert(key.clone(), delta_value.clone());
                    }
                }
            }
        }
        (base_slot, delta_value) => {
            *base_slot = delta_value.clone();
        }
    }
}
