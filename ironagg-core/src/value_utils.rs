// src/value_utils.rs
//! Value utility functions shared across modules
//!
//! Field-path traversal, nested assignment, natural ordering and the
//! canonical keys used for de-duplication.

use crate::value::{Map, Value};
use std::cmp::Ordering;

/// Get nested value with dot notation support
///
/// Supports:
/// - Simple fields: "name"
/// - Nested objects: "address.city"
/// - Array indexing: "items.0.name"
///
/// An empty path addresses the value itself.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use ironagg_core::value::Value;
/// use ironagg_core::value_utils::get_nested_value;
///
/// let doc = Value::from(json!({"address": {"city": "NYC"}}));
/// assert_eq!(get_nested_value(&doc, "address.city"), Some(&Value::from("NYC")));
/// ```
pub fn get_nested_value<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(doc);
    }

    let mut value = doc;
    for part in path.split('.') {
        match value {
            Value::Object(map) => value = map.get(part)?,
            Value::Array(arr) => value = arr.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        }
    }
    Some(value)
}

/// Resolve a field reference (`$`, `$a.b`) against a value
///
/// Missing segments and non-container intermediates yield `Undefined`.
pub fn resolve_path(doc: &Value, field_ref: &str) -> Value {
    let path = field_ref.strip_prefix('$').unwrap_or(field_ref);
    get_nested_value(doc, path).cloned().unwrap_or(Value::Undefined)
}

/// Set a value at a nested path with dot notation support
///
/// Creates intermediate objects if they don't exist and merges into ones that
/// do. Assignment is skipped when an intermediate segment holds a non-object
/// or when the value is `Undefined`.
///
/// # Examples
///
/// ```
/// use ironagg_core::value::{Map, Value};
/// use ironagg_core::value_utils::set_path;
///
/// let mut doc = Map::new();
/// set_path(&mut doc, "address.city", Value::from("NYC"));
/// set_path(&mut doc, "address.zip", Value::from(10001));
/// assert_eq!(doc["address"].get("zip"), Some(&Value::from(10001)));
/// ```
pub fn set_path(doc: &mut Map, path: &str, value: Value) {
    if value.is_undefined() {
        return;
    }

    let Some((parent, leaf)) = path.rsplit_once('.') else {
        doc.insert(path.to_string(), value);
        return;
    };

    let mut current = doc;
    for part in parent.split('.') {
        let slot = current
            .entry(part.to_string())
            .or_insert_with(Value::object);
        match slot {
            Value::Object(map) => current = map,
            // Cannot navigate into non-object
            _ => return,
        }
    }
    current.insert(leaf.to_string(), value);
}

/// Compare two values by natural ordering
///
/// Returns `Some(Ordering)` for comparable pairs, `None` otherwise.
///
/// # Supported comparisons
///
/// - Number vs Number (NaN is incomparable)
/// - String vs String (lexicographic)
/// - Bool vs Bool (false < true)
/// - Date vs Date (invalid dates are incomparable)
///
/// # Examples
///
/// ```
/// use std::cmp::Ordering;
/// use ironagg_core::value::Value;
/// use ironagg_core::value_utils::compare_values;
///
/// assert_eq!(compare_values(&Value::from(10), &Value::from(5)), Some(Ordering::Greater));
/// assert_eq!(compare_values(&Value::from("a"), &Value::from(1)), None);
/// ```
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(n1), Value::Number(n2)) => n1.partial_cmp(n2),
        (Value::String(s1), Value::String(s2)) => Some(s1.cmp(s2)),
        (Value::Bool(b1), Value::Bool(b2)) => Some(b1.cmp(b2)),
        (Value::Date(d1), Value::Date(d2)) => d1.compare(d2),
        _ => None,
    }
}

/// Ordering used by `$sort`
///
/// A total order over every value, so mixed-type keys sort deterministically.
///
/// # Ordering rules
///
/// - Types rank `Undefined`/`Null` < numbers < strings < booleans < dates
///   < arrays < objects
/// - NaN sorts below every other number, invalid dates below every valid date
/// - Arrays compare element-wise, then by length
/// - Objects are all equal to each other
///
/// ```
/// use std::cmp::Ordering;
/// use ironagg_core::value::Value;
/// use ironagg_core::value_utils::compare_for_sort;
///
/// assert_eq!(compare_for_sort(&Value::from(10), &Value::from("a")), Ordering::Less);
/// assert_eq!(compare_for_sort(&Value::from(f64::NAN), &Value::from(-1)), Ordering::Less);
/// ```
pub fn compare_for_sort(a: &Value, b: &Value) -> Ordering {
    let by_type = sort_rank(a).cmp(&sort_rank(b));
    if by_type != Ordering::Equal {
        return by_type;
    }

    match (a, b) {
        (Value::Number(n1), Value::Number(n2)) => match (n1.is_nan(), n2.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => n1.partial_cmp(n2).unwrap_or(Ordering::Equal),
        },
        (Value::Date(d1), Value::Date(d2)) => match (d1.is_valid(), d2.is_valid()) {
            (false, false) => Ordering::Equal,
            (false, true) => Ordering::Less,
            (true, false) => Ordering::Greater,
            (true, true) => d1.compare(d2).unwrap_or(Ordering::Equal),
        },
        (Value::Array(items1), Value::Array(items2)) => items1
            .iter()
            .zip(items2)
            .map(|(x, y)| compare_for_sort(x, y))
            .find(|cmp| *cmp != Ordering::Equal)
            .unwrap_or_else(|| items1.len().cmp(&items2.len())),
        _ => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

fn sort_rank(value: &Value) -> u8 {
    match value {
        Value::Undefined | Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Bool(_) => 3,
        Value::Date(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

/// Canonical string for a value, with object keys sorted
///
/// Two values have the same canonical key exactly when they are strictly
/// equal, NaN and invalid dates excepted. Used by `$addToSet`.
pub fn canonical_key(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(b.0));

            let inner: String = pairs
                .iter()
                .map(|(k, v)| format!("{:?}:{}", k, canonical_key(v)))
                .collect::<Vec<_>>()
                .join(",");

            format!("{{{}}}", inner)
        }
        Value::Array(arr) => {
            let inner: String = arr.iter().map(canonical_key).collect::<Vec<_>>().join(",");
            format!("[{}]", inner)
        }
        Value::String(s) => format!("{:?}", s),
        Value::Date(m) => format!("date:{}", m.value_of()),
        other => other.to_display_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datetime::Moment;
    use serde_json::json;

    fn doc(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    #[test]
    fn test_get_nested_value_simple() {
        let d = doc(json!({"name": "Alice", "age": 30}));
        assert_eq!(get_nested_value(&d, "name"), Some(&Value::from("Alice")));
        assert_eq!(get_nested_value(&d, "age"), Some(&Value::from(30)));
        assert_eq!(get_nested_value(&d, "missing"), None);
        assert_eq!(get_nested_value(&d, ""), Some(&d));
    }

    #[test]
    fn test_get_nested_value_array_index() {
        let d = doc(json!({"items": [{"name": "item1"}, {"name": "item2"}]}));
        assert_eq!(get_nested_value(&d, "items.1.name"), Some(&Value::from("item2")));
        assert_eq!(get_nested_value(&d, "items.5.name"), None);
        assert_eq!(get_nested_value(&d, "items.x"), None);
    }

    #[test]
    fn test_resolve_path() {
        let d = doc(json!({"a": {"b": {"c": 42}}, "s": "text"}));
        assert_eq!(resolve_path(&d, "$a.b.c"), Value::from(42));
        assert_eq!(resolve_path(&d, "$"), d);
        assert_eq!(resolve_path(&d, "$a.x.c"), Value::Undefined);
        // Traversal through a scalar is lenient
        assert_eq!(resolve_path(&d, "$s.length"), Value::Undefined);
        assert_eq!(resolve_path(&Value::from(7), "$"), Value::from(7));
    }

    #[test]
    fn test_set_path_merges_siblings() {
        let mut map = Map::new();
        set_path(&mut map, "a.b", Value::from(1));
        set_path(&mut map, "a.c", Value::from(2));
        set_path(&mut map, "d", Value::from(3));
        assert_eq!(Value::Object(map).to_json(), json!({"a": {"b": 1, "c": 2}, "d": 3}));
    }

    #[test]
    fn test_set_path_skips_non_object_intermediate() {
        let mut map = Map::new();
        set_path(&mut map, "a", Value::from(1));
        set_path(&mut map, "a.b", Value::from(2));
        assert_eq!(Value::Object(map).to_json(), json!({"a": 1}));
    }

    #[test]
    fn test_set_path_skips_undefined() {
        let mut map = Map::new();
        set_path(&mut map, "a.b", Value::Undefined);
        assert!(map.is_empty());
    }

    #[test]
    fn test_compare_values() {
        assert_eq!(compare_values(&Value::from(10), &Value::from(5)), Some(Ordering::Greater));
        assert_eq!(compare_values(&Value::from("apple"), &Value::from("banana")), Some(Ordering::Less));
        assert_eq!(compare_values(&Value::from(true), &Value::from(false)), Some(Ordering::Greater));
        assert_eq!(compare_values(&Value::from(f64::NAN), &Value::from(1)), None);
        assert_eq!(compare_values(&Value::from(true), &Value::from(1)), None);
        assert_eq!(compare_values(&doc(json!([1, 2])), &Value::from(1)), None);
    }

    #[test]
    fn test_compare_values_dates() {
        let early = Value::Date(Moment::parse_str("2000-01-01"));
        let late = Value::Date(Moment::parse_str("2001-01-01"));
        assert_eq!(compare_values(&early, &late), Some(Ordering::Less));
        assert_eq!(compare_values(&early, &Value::Date(Moment::invalid())), None);
    }

    #[test]
    fn test_compare_for_sort() {
        assert_eq!(compare_for_sort(&Value::Undefined, &Value::Null), Ordering::Equal);
        assert_eq!(compare_for_sort(&Value::Null, &Value::from(5)), Ordering::Less);
        assert_eq!(compare_for_sort(&Value::from("a"), &Value::Undefined), Ordering::Greater);
        assert_eq!(compare_for_sort(&Value::from("a"), &Value::from(1)), Ordering::Greater);
        assert_eq!(compare_for_sort(&Value::Bool(false), &Value::from("z")), Ordering::Greater);
        assert_eq!(
            compare_for_sort(&doc(json!([1, "a"])), &doc(json!([1, "b"]))),
            Ordering::Less
        );
        assert_eq!(compare_for_sort(&doc(json!([1])), &doc(json!([1, 0]))), Ordering::Less);
        assert_eq!(
            compare_for_sort(&doc(json!({"a": 1})), &doc(json!({"b": 2}))),
            Ordering::Equal
        );
    }

    #[test]
    fn test_compare_for_sort_nan_and_invalid_dates() {
        let nan = Value::from(f64::NAN);
        assert_eq!(compare_for_sort(&nan, &Value::from(f64::NAN)), Ordering::Equal);
        assert_eq!(compare_for_sort(&nan, &Value::from(f64::NEG_INFINITY)), Ordering::Less);
        assert_eq!(compare_for_sort(&Value::Null, &nan), Ordering::Less);

        let invalid = Value::Date(Moment::invalid());
        let valid = Value::Date(Moment::parse_str("1970-01-01"));
        assert_eq!(compare_for_sort(&invalid, &valid), Ordering::Less);
        assert_eq!(compare_for_sort(&invalid, &Value::Date(Moment::invalid())), Ordering::Equal);
    }

    #[test]
    fn test_compare_for_sort_is_transitive_across_types() {
        let mut values = vec![
            Value::from(1),
            Value::from("a"),
            Value::from(0),
            Value::Undefined,
            Value::from(f64::NAN),
            Value::Bool(true),
            Value::from("0"),
            Value::Null,
            Value::from(-3.5),
        ];
        for a in &values {
            for b in &values {
                assert_eq!(compare_for_sort(a, b), compare_for_sort(b, a).reverse());
                for c in &values {
                    if compare_for_sort(a, b) != Ordering::Greater
                        && compare_for_sort(b, c) != Ordering::Greater
                    {
                        assert_ne!(compare_for_sort(a, c), Ordering::Greater);
                    }
                }
            }
        }

        values.sort_by(compare_for_sort);
        let rendered: Vec<String> = values.iter().map(Value::to_display_string).collect();
        assert_eq!(
            rendered,
            vec!["undefined", "null", "NaN", "-3.5", "0", "1", "0", "a", "true"]
        );
    }

    #[test]
    fn test_canonical_key_object_key_order() {
        let v1 = doc(json!({"a": 1, "b": {"x": 1, "y": 2}}));
        let v2 = doc(json!({"b": {"y": 2, "x": 1}, "a": 1}));
        assert_eq!(canonical_key(&v1), canonical_key(&v2));
    }

    #[test]
    fn test_canonical_key_distinguishes_kinds() {
        assert_ne!(canonical_key(&Value::from(1)), canonical_key(&Value::from("1")));
        assert_ne!(canonical_key(&Value::Null), canonical_key(&Value::Undefined));
        assert_ne!(canonical_key(&Value::from("null")), canonical_key(&Value::Null));
        assert_eq!(canonical_key(&Value::from(1)), canonical_key(&Value::from(1.0)));
    }
}
