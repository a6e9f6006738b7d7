//! Deep merge of partial payloads.
//!
//! One law: when both sides hold an object at a key, merge recursively;
//! otherwise the partial's value replaces the accumulator's. Arrays are
//! replaced wholesale, never concatenated or merged element-wise. Keys that
//! only exist in the accumulator are kept.

use serde_json::{Map, Value};

/// Merge `partial` into a copy of `accumulator`.
///
/// Neither input is modified. A non-object on either side replaces the
/// accumulator outright, the same rule applied at the root.
pub fn merge(accumulator: &Value, partial: &Value) -> Value {
    match (accumulator, partial) {
        (Value::Object(acc), Value::Object(part)) => {
            let mut out = acc.clone();
            merge_into(&mut out, part);
            Value::Object(out)
        }
        _ => partial.clone(),
    }
}

/// In-place form of [`merge`] for object accumulators.
pub fn merge_into(target: &mut Map<String, Value>, partial: &Map<String, Value>) {
    for (key, value) in partial {
        if let (Some(Value::Object(existing)), Value::Object(incoming)) =
            (target.get_mut(key), value)
        {
            merge_into(existing, incoming);
            continue;
        }
        target.insert(key.clone(), value.clone());
    }
}
