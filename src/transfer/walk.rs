//! Depth-first traversal of JSON string leaves.
//!
//! Object keys are not visited; only values. Documents come from parsed JSON
//! so they are trees and need no cycle tracking.

use serde_json::Value;

/// Call `visit` on every string leaf in `value`.
pub fn visit_strings<'a>(value: &'a Value, visit: &mut impl FnMut(&'a str)) {
    match value {
        Value::String(s) => visit(s),
        Value::Array(items) => {
            for item in items {
                visit_strings(item, visit);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                visit_strings(item, visit);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Replace string leaves in place. `rewrite` returns `Some(new)` to replace a
/// leaf and `None` to keep it. Returns the number of leaves replaced.
pub fn rewrite_strings(value: &mut Value, rewrite: &mut impl FnMut(&str) -> Option<String>) -> usize {
    match value {
        Value::String(s) => match rewrite(s.as_str()) {
            Some(new) => {
                *s = new;
                1
            }
            None => 0,
        },
        Value::Array(items) => items.iter_mut().map(|item| rewrite_strings(item, rewrite)).sum(),
        Value::Object(map) => map.values_mut().map(|item| rewrite_strings(item, rewrite)).sum(),
        Value::Null | Value::Bool(_) | Value::Number(_) => 0,
    }
}
