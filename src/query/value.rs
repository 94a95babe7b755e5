//! Ordering and path lookup over JSON document values.

use crate::core::{RepoError, Result};
use serde_json::{Map, Number, Value as JsonValue};
use std::cmp::Ordering;

/// Comparison class of a value. Values of different classes order by class:
/// missing/null < numbers < strings < objects < arrays < booleans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TypeClass {
    Null,
    Number,
    String,
    Object,
    Array,
    Bool,
}

impl TypeClass {
    pub fn of(value: Option<&JsonValue>) -> Self {
        match value {
            None | Some(JsonValue::Null) => TypeClass::Null,
            Some(JsonValue::Number(_)) => TypeClass::Number,
            Some(JsonValue::String(_)) => TypeClass::String,
            Some(JsonValue::Object(_)) => TypeClass::Object,
            Some(JsonValue::Array(_)) => TypeClass::Array,
            Some(JsonValue::Bool(_)) => TypeClass::Bool,
        }
    }
}

/// Total order over optional JSON values.
pub fn compare_values(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    let (class_a, class_b) = (TypeClass::of(a), TypeClass::of(b));
    if class_a != class_b {
        return class_a.cmp(&class_b);
    }

    match (a, b) {
        (Some(JsonValue::Number(x)), Some(JsonValue::Number(y))) => compare_numbers(x, y),
        (Some(JsonValue::String(x)), Some(JsonValue::String(y))) => x.cmp(y),
        (Some(JsonValue::Bool(x)), Some(JsonValue::Bool(y))) => x.cmp(y),
        (Some(JsonValue::Array(x)), Some(JsonValue::Array(y))) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ordering = compare_values(Some(left), Some(right));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        (Some(JsonValue::Object(x)), Some(JsonValue::Object(y))) => {
            for ((key_x, val_x), (key_y, val_y)) in x.iter().zip(y.iter()) {
                let ordering = key_x
                    .cmp(key_y)
                    .then_with(|| compare_values(Some(val_x), Some(val_y)));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}

fn compare_numbers(x: &Number, y: &Number) -> Ordering {
    // Integers above 2^53 lose precision as f64.
    if let (Some(a), Some(b)) = (as_integer(x), as_integer(y)) {
        return a.cmp(&b);
    }
    let x = x.as_f64().unwrap_or(f64::NAN);
    let y = y.as_f64().unwrap_or(f64::NAN);
    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
}

fn as_integer(n: &Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

/// Equality used by filters: numbers compare by value, so `1` equals `1.0`;
/// missing equals null.
pub fn values_equal(a: Option<&JsonValue>, b: Option<&JsonValue>) -> bool {
    TypeClass::of(a) == TypeClass::of(b) && compare_values(a, b) == Ordering::Equal
}

/// Resolves a dotted path (`address.city`) inside a document.
pub fn lookup<'a>(doc: &'a Map<String, JsonValue>, path: &str) -> Option<&'a JsonValue> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?;
    for segment in segments {
        current = match current {
            JsonValue::Object(map) => map.get(segment)?,
            JsonValue::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Rejects empty paths and empty segments (`a..b`, `.a`).
pub(crate) fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(RepoError::invalid_query(format!(
            "invalid field path '{}'",
            path
        )));
    }
    Ok(())
}

/// Writes `value` at a dotted path, creating intermediate objects.
pub fn insert_path(doc: &mut Map<String, JsonValue>, path: &str, value: JsonValue) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = doc
                .entry(head.to_string())
                .or_insert_with(|| JsonValue::Object(Map::new()));
            if !entry.is_object() {
                *entry = JsonValue::Object(Map::new());
            }
            if let JsonValue::Object(child) = entry {
                insert_path(child, rest, value);
            }
        }
    }
}
