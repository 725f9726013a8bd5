//! Canonical cache keys — deterministic string identity for request descriptors.
//!
//! Two descriptors that are deep-equal up to mapping-key order must produce
//! the same key; any difference in a scalar value, in the field set, or in
//! sequence order must produce a different key. Mapping keys are sorted
//! lexicographically at every nesting level; sequence order is semantically
//! significant and preserved.

use serde_json::{Map, Value};

use crate::descriptor::RequestDescriptor;

/// Recursively rebuilds a JSON value with every mapping's keys visited in
/// lexicographic order. Sequences keep their element order; scalars pass
/// through unchanged.
///
/// Pure and total: any [`Value`] has a canonical form.
///
/// # Examples
///
/// ```
/// use reqflight::key::canonicalize;
/// use serde_json::json;
///
/// let a = canonicalize(&json!({ "b": 1, "a": 2 }));
/// let b = canonicalize(&json!({ "a": 2, "b": 1 }));
/// assert_eq!(a, b);
/// ```
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(fields) => {
            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort_unstable();

            let mut sorted = Map::with_capacity(fields.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&fields[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        scalar => scalar.clone(),
    }
}

/// Derives the canonical string key for a request descriptor.
///
/// The descriptor is projected onto a JSON mapping of its method, URL,
/// parameters, and body, canonicalized with [`canonicalize`], and serialized
/// to a compact JSON string. Unset parameters and body are omitted from the
/// projection entirely, so a descriptor without a body names a different
/// request than one carrying an explicit `null` body.
///
/// # Errors
///
/// Returns the underlying [`serde_json::Error`] if the canonical form cannot
/// be serialized. Descriptors built from JSON values never hit this path.
pub fn canonical_key(descriptor: &RequestDescriptor) -> Result<String, serde_json::Error> {
    let mut projection = Map::from_iter([
        (
            "method".to_owned(),
            Value::String(descriptor.method().as_str().to_owned()),
        ),
        ("url".to_owned(), Value::String(descriptor.url().to_owned())),
    ]);
    if let Some(params) = descriptor.query_params() {
        projection.insert("params".to_owned(), params.clone());
    }
    if let Some(body) = descriptor.body_payload() {
        projection.insert("body".to_owned(), body.clone());
    }

    serde_json::to_string(&canonicalize(&Value::Object(projection)))
}
