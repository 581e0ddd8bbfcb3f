//! JSON merge patches (RFC 7386).
//!
//! [`diff`] produces the smallest patch turning one document into another.
//! Applying one is left to [`json_patch::merge`]. Arrays are replaced as a whole.

use serde_json::{Map, Value};

/// Merge patch that turns `original` into `modified`.
///
/// Keys removed in `modified` become `null`. Returns an empty object when
/// the documents are equal.
pub fn diff(original: &Value, modified: &Value) -> Value {
    match (original, modified) {
        (Value::Object(before), Value::Object(after)) => {
            let mut patch = Map::new();
            for (key, new) in after {
                match before.get(key) {
                    Some(old) if old == new => {}
                    Some(old) if old.is_object() && new.is_object() => {
                        patch.insert(key.clone(), diff(old, new));
                    }
                    _ => {
                        patch.insert(key.clone(), new.clone());
                    }
                }
            }
            for key in before.keys() {
                if !after.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            Value::Object(patch)
        }
        _ => modified.clone(),
    }
}

/// Whether `patch` changes nothing.
pub fn is_empty(patch: &Value) -> bool {
    matches!(patch, Value::Object(fields) if fields.is_empty())
}
