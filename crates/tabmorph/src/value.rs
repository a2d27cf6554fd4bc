//! Coercion and comparison helpers shared by the path resolver, the
//! predicates and the built-in operations.

use std::cmp::Ordering;

use serde_json::{Number, Value as JsonValue};

/// Lenient float coercion: numbers, booleans and numeric strings.
pub fn to_float(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// JSON number for `value`, or `null` when it is not finite.
pub fn number_value(value: f64) -> JsonValue {
    Number::from_f64(value)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

/// Text form used by concat/join/cast. `null` becomes the empty string.
pub fn to_text(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Array(_) | JsonValue::Object(_) => value.to_string(),
    }
}

pub fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(arr) => !arr.is_empty(),
        JsonValue::Object(obj) => !obj.is_empty(),
    }
}

/// Deep equality where numbers compare by value, so `1 == 1.0`.
pub fn values_equal(left: &JsonValue, right: &JsonValue) -> bool {
    match (left, right) {
        (JsonValue::Number(l), JsonValue::Number(r)) => match (l.as_f64(), r.as_f64()) {
            (Some(l), Some(r)) => l == r,
            _ => l == r,
        },
        (JsonValue::Array(l), JsonValue::Array(r)) => {
            l.len() == r.len() && l.iter().zip(r).all(|(a, b)| values_equal(a, b))
        }
        (JsonValue::Object(l), JsonValue::Object(r)) => {
            l.len() == r.len()
                && l
                    .iter()
                    .all(|(key, value)| r.get(key).is_some_and(|other| values_equal(value, other)))
        }
        _ => left == right,
    }
}

/// Hashable identity consistent with [`values_equal`]: numbers are keyed by
/// their float value and object keys are sorted.
pub fn canonical_key(value: &JsonValue) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Null => out.push('n'),
        JsonValue::Bool(b) => out.push(if *b { 't' } else { 'f' }),
        JsonValue::Number(n) => match n.as_f64() {
            // -0.0 == 0.0
            Some(f) if f == 0.0 => out.push_str("#0"),
            Some(f) => {
                out.push('#');
                out.push_str(&format!("{:?}", f));
            }
            None => {
                out.push('#');
                out.push_str(&n.to_string());
            }
        },
        JsonValue::String(s) => {
            out.push('s');
            out.push_str(&JsonValue::String(s.clone()).to_string());
        }
        JsonValue::Array(items) => {
            out.push('[');
            for item in items {
                write_canonical(item, out);
                out.push(',');
            }
            out.push(']');
        }
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for key in keys {
                out.push_str(&JsonValue::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
                out.push(',');
            }
            out.push('}');
        }
    }
}

/// Natural ordering for scalars of the same kind. Returns `None` for mixed
/// kinds, `null`, and containers.
pub fn compare_scalars(left: &JsonValue, right: &JsonValue) -> Option<Ordering> {
    match (left, right) {
        (JsonValue::Number(l), JsonValue::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (JsonValue::String(l), JsonValue::String(r)) => Some(l.cmp(r)),
        (JsonValue::Bool(l), JsonValue::Bool(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

/// Length of strings (in characters), arrays and objects.
pub fn length_of(value: &JsonValue) -> Option<usize> {
    match value {
        JsonValue::String(s) => Some(s.chars().count()),
        JsonValue::Array(arr) => Some(arr.len()),
        JsonValue::Object(obj) => Some(obj.len()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn to_float_accepts_numeric_text_and_bools() {
        assert_eq!(to_float(&json!("3.5")), Some(3.5));
        assert_eq!(to_float(&json!(" 7 ")), Some(7.0));
        assert_eq!(to_float(&json!(true)), Some(1.0));
        assert_eq!(to_float(&json!("abc")), None);
        assert_eq!(to_float(&json!(null)), None);
        assert_eq!(to_float(&json!([1])), None);
    }

    #[test]
    fn text_form_of_values() {
        assert_eq!(to_text(&json!(null)), "");
        assert_eq!(to_text(&json!(2)), "2");
        assert_eq!(to_text(&json!(2.5)), "2.5");
        assert_eq!(to_text(&json!(false)), "false");
        assert_eq!(to_text(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn numeric_equality_ignores_representation() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(values_equal(&json!({"a": [1, 2]}), &json!({"a": [1.0, 2]})));
        assert!(!values_equal(&json!("1"), &json!(1)));
    }

    #[test]
    fn canonical_keys_follow_equality() {
        assert_eq!(canonical_key(&json!(1)), canonical_key(&json!(1.0)));
        assert_eq!(canonical_key(&json!(0)), canonical_key(&json!(-0.0)));
        assert_eq!(
            canonical_key(&json!({"a": [1, 2], "b": null})),
            canonical_key(&json!({"b": null, "a": [1.0, 2]}))
        );
        assert_ne!(canonical_key(&json!("1")), canonical_key(&json!(1)));
        assert_ne!(canonical_key(&json!("t")), canonical_key(&json!(true)));
        assert_ne!(canonical_key(&json!([[1], 2])), canonical_key(&json!([1, [2]])));
        assert_ne!(canonical_key(&json!(1.5)), canonical_key(&json!(15)));
    }

    #[test]
    fn non_finite_numbers_become_null() {
        assert_eq!(number_value(f64::NAN), JsonValue::Null);
        assert_eq!(number_value(2.0), json!(2.0));
    }
}
