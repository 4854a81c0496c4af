//! Lenient accessors over loosely-typed JSON returned by models.

use serde_json::{Map, Value};

/// Borrows `value` as an object, or an empty map when it is anything else.
pub fn as_object(value: &Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// Reads a string field, rendering numbers and booleans, trimming whitespace.
///
/// # Examples
///
/// ```
/// use quill_core::str_field;
/// use serde_json::json;
///
/// let v = json!({"name": "  Mara ", "age": 31});
/// assert_eq!(str_field(&v, "name"), "Mara");
/// assert_eq!(str_field(&v, "age"), "31");
/// assert_eq!(str_field(&v, "missing"), "");
/// ```
pub fn str_field(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Reads a list of strings. A bare string becomes a one-element list; objects
/// are rendered as compact JSON; empty entries are dropped.
pub fn string_list(value: &Value, key: &str) -> Vec<String> {
    match value.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Null => None,
                Value::Object(_) | Value::Array(_) => Some(item.to_string()),
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

/// Reads an unsigned integer field, accepting numeric strings.
pub(crate) fn u32_field(value: &Value, key: &str) -> Option<u32> {
    match value.get(key) {
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Items of an array field (empty when absent or not an array).
pub(crate) fn items<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_list_tolerates_shapes() {
        let v = json!({"a": ["x", "", null, 3], "b": "solo", "c": 7});
        assert_eq!(string_list(&v, "a"), vec!["x", "3"]);
        assert_eq!(string_list(&v, "b"), vec!["solo"]);
        assert!(string_list(&v, "c").is_empty());
    }

    #[test]
    fn test_u32_field_accepts_strings() {
        let v = json!({"n": "12", "m": 4, "bad": -1});
        assert_eq!(u32_field(&v, "n"), Some(12));
        assert_eq!(u32_field(&v, "m"), Some(4));
        assert_eq!(u32_field(&v, "bad"), None);
    }
}
