// ============================================================================
// Document Filters
// ============================================================================
//
// Predicate tree evaluated against stored documents. Built either with the
// constructor functions or parsed from the Mongo-style JSON form:
//
//   {"age": {"$gte": 18}, "status": "active"}
//   {"$or": [{"name": "a"}, {"name": "b"}]}
//
// ============================================================================

use super::value::{TypeClass, compare_values, lookup, validate_path, values_equal};
use crate::core::{ID_FIELD, ObjectId, RepoError, Result};
use regex::Regex;
use serde_json::{Map, Value as JsonValue};
use std::cmp::Ordering;

/// Compiled regular expression compared by its source text.
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(source: &str) -> Result<Self> {
        Regex::new(source)
            .map(Pattern)
            .map_err(|e| RepoError::invalid_query(format!("invalid regex '{}': {}", source, e)))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document.
    All,
    Eq(String, JsonValue),
    Ne(String, JsonValue),
    Gt(String, JsonValue),
    Gte(String, JsonValue),
    Lt(String, JsonValue),
    Lte(String, JsonValue),
    In(String, Vec<JsonValue>),
    Nin(String, Vec<JsonValue>),
    Exists(String, bool),
    Regex(String, Pattern),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Default for Filter {
    fn default() -> Self {
        Filter::All
    }
}

impl Filter {
    pub fn all() -> Self {
        Filter::All
    }

    pub fn eq(path: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Filter::Eq(path.into(), value.into())
    }

    pub fn ne(path: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Filter::Ne(path.into(), value.into())
    }

    pub fn gt(path: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Filter::Gt(path.into(), value.into())
    }

    pub fn gte(path: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Filter::Gte(path.into(), value.into())
    }

    pub fn lt(path: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Filter::Lt(path.into(), value.into())
    }

    pub fn lte(path: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Filter::Lte(path.into(), value.into())
    }

    pub fn is_in<V: Into<JsonValue>>(path: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(path.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn not_in<V: Into<JsonValue>>(
        path: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Filter::Nin(path.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn exists(path: impl Into<String>, exists: bool) -> Self {
        Filter::Exists(path.into(), exists)
    }

    pub fn regex(path: impl Into<String>, pattern: &str) -> Result<Self> {
        Ok(Filter::Regex(path.into(), Pattern::new(pattern)?))
    }

    pub fn id_eq(id: &ObjectId) -> Self {
        Filter::Eq(ID_FIELD.to_string(), JsonValue::String(id.to_hex()))
    }

    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut items), f) => {
                items.push(f);
                Filter::And(items)
            }
            (f, g) => Filter::And(vec![f, g]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Or(mut items) => {
                items.push(other);
                Filter::Or(items)
            }
            f => Filter::Or(vec![f, other]),
        }
    }

    pub fn negate(self) -> Self {
        Filter::Not(Box::new(self))
    }

    /// Checks a filter built in code the same way `from_json` checks parsed
    /// input: every path must be well formed and `$and`/`$or` non-empty.
    pub fn validate(&self) -> Result<()> {
        match self {
            Filter::All => Ok(()),
            Filter::Eq(path, _)
            | Filter::Ne(path, _)
            | Filter::Gt(path, _)
            | Filter::Gte(path, _)
            | Filter::Lt(path, _)
            | Filter::Lte(path, _)
            | Filter::In(path, _)
            | Filter::Nin(path, _)
            | Filter::Exists(path, _)
            | Filter::Regex(path, _) => validate_path(path),
            Filter::And(filters) | Filter::Or(filters) => {
                if filters.is_empty() {
                    return Err(RepoError::invalid_query(
                        "logical filter expects at least one clause",
                    ));
                }
                filters.iter().try_for_each(Filter::validate)
            }
            Filter::Not(inner) => inner.validate(),
        }
    }

    /// Evaluates the filter against a document.
    pub fn matches(&self, doc: &Map<String, JsonValue>) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(path, value) => field_equals(lookup(doc, path), value),
            Filter::Ne(path, value) => !field_equals(lookup(doc, path), value),
            Filter::Gt(path, value) => compare_field(lookup(doc, path), value, |o| o.is_gt()),
            Filter::Gte(path, value) => compare_field(lookup(doc, path), value, |o| o.is_ge()),
            Filter::Lt(path, value) => compare_field(lookup(doc, path), value, |o| o.is_lt()),
            Filter::Lte(path, value) => compare_field(lookup(doc, path), value, |o| o.is_le()),
            Filter::In(path, values) => {
                let field = lookup(doc, path);
                values.iter().any(|v| field_equals(field, v))
            }
            Filter::Nin(path, values) => {
                let field = lookup(doc, path);
                !values.iter().any(|v| field_equals(field, v))
            }
            Filter::Exists(path, expected) => lookup(doc, path).is_some() == *expected,
            Filter::Regex(path, pattern) => match lookup(doc, path) {
                Some(JsonValue::String(text)) => pattern.is_match(text),
                Some(JsonValue::Array(items)) => items
                    .iter()
                    .any(|item| item.as_str().is_some_and(|text| pattern.is_match(text))),
                _ => false,
            },
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(doc)),
            Filter::Not(inner) => !inner.matches(doc),
        }
    }

    /// Parses a Mongo-style filter document.
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            RepoError::invalid_query(format!("filter must be an object, got {}", value))
        })?;

        let mut clauses = Vec::with_capacity(object.len());
        for (key, operand) in object {
            clauses.push(parse_clause(key, operand)?);
        }

        Ok(match clauses.len() {
            0 => Filter::All,
            1 => clauses.remove(0),
            _ => Filter::And(clauses),
        })
    }
}

fn field_equals(field: Option<&JsonValue>, expected: &JsonValue) -> bool {
    if values_equal(field, Some(expected)) {
        return true;
    }
    // An array field matches when any element equals the operand.
    match field {
        Some(JsonValue::Array(items)) if !expected.is_array() => {
            items.iter().any(|item| values_equal(Some(item), Some(expected)))
        }
        _ => false,
    }
}

fn compare_field(
    field: Option<&JsonValue>,
    operand: &JsonValue,
    accept: impl Fn(Ordering) -> bool,
) -> bool {
    let class = TypeClass::of(Some(operand));
    let check = |candidate: &JsonValue| {
        TypeClass::of(Some(candidate)) == class
            && class != TypeClass::Null
            && accept(compare_values(Some(candidate), Some(operand)))
    };

    match field {
        Some(JsonValue::Array(items)) if class != TypeClass::Array => items.iter().any(check),
        Some(candidate) => check(candidate),
        None => false,
    }
}

fn parse_clause(key: &str, operand: &JsonValue) -> Result<Filter> {
    match key {
        "$and" | "$or" => {
            let items = operand.as_array().ok_or_else(|| {
                RepoError::invalid_query(format!("{} expects an array of filters", key))
            })?;
            if items.is_empty() {
                return Err(RepoError::invalid_query(format!(
                    "{} expects at least one filter",
                    key
                )));
            }
            let filters = items
                .iter()
                .map(Filter::from_json)
                .collect::<Result<Vec<_>>>()?;
            Ok(if key == "$and" {
                Filter::And(filters)
            } else {
                Filter::Or(filters)
            })
        }
        "$not" => Ok(Filter::from_json(operand)?.negate()),
        _ if key.starts_with('$') => Err(RepoError::invalid_query(format!(
            "unknown top-level operator '{}'",
            key
        ))),
        _ => {
            validate_path(key)?;
            match operand {
                JsonValue::Object(ops) if is_operator_document(ops) => parse_operators(key, ops),
                _ => Ok(Filter::Eq(key.to_string(), operand.clone())),
            }
        }
    }
}

fn is_operator_document(ops: &Map<String, JsonValue>) -> bool {
    !ops.is_empty() && ops.keys().all(|k| k.starts_with('$'))
}

fn parse_operators(path: &str, ops: &Map<String, JsonValue>) -> Result<Filter> {
    let mut clauses = Vec::with_capacity(ops.len());
    for (op, operand) in ops {
        let clause = match op.as_str() {
            "$eq" => Filter::Eq(path.to_string(), operand.clone()),
            "$ne" => Filter::Ne(path.to_string(), operand.clone()),
            "$gt" => Filter::Gt(path.to_string(), operand.clone()),
            "$gte" => Filter::Gte(path.to_string(), operand.clone()),
            "$lt" => Filter::Lt(path.to_string(), operand.clone()),
            "$lte" => Filter::Lte(path.to_string(), operand.clone()),
            "$in" | "$nin" => {
                let values = operand.as_array().ok_or_else(|| {
                    RepoError::invalid_query(format!("{} on '{}' expects an array", op, path))
                })?;
                if op == "$in" {
                    Filter::In(path.to_string(), values.clone())
                } else {
                    Filter::Nin(path.to_string(), values.clone())
                }
            }
            "$exists" => {
                let flag = operand.as_bool().ok_or_else(|| {
                    RepoError::invalid_query(format!("$exists on '{}' expects a boolean", path))
                })?;
                Filter::Exists(path.to_string(), flag)
            }
            "$regex" => {
                let source = operand.as_str().ok_or_else(|| {
                    RepoError::invalid_query(format!("$regex on '{}' expects a string", path))
                })?;
                let source = match ops.get("$options").and_then(JsonValue::as_str) {
                    Some(flags) if !flags.is_empty() => format!("(?{}){}", flags, source),
                    _ => source.to_string(),
                };
                Filter::Regex(path.to_string(), Pattern::new(&source)?)
            }
            "$options" => {
                if !ops.contains_key("$regex") {
                    return Err(RepoError::invalid_query(format!(
                        "$options on '{}' requires $regex",
                        path
                    )));
                }
                continue;
            }
            "$not" => {
                let inner = operand.as_object().ok_or_else(|| {
                    RepoError::invalid_query(format!("$not on '{}' expects an operator object", path))
                })?;
                parse_operators(path, inner)?.negate()
            }
            other => {
                return Err(RepoError::invalid_query(format!(
                    "unknown operator '{}' on '{}'",
                    other, path
                )));
            }
        };
        clauses.push(clause);
    }

    Ok(match clauses.len() {
        1 => clauses.remove(0),
        _ => Filter::And(clauses),
    })
}
