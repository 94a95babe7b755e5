// ============================================================================
// Aggregation Pipeline
// ============================================================================
//
// Ordered stages applied to a collection's documents:
//   $match, $sort, $skip, $limit, $project, $group, $count
//
// $group accumulators: $sum, $avg, $min, $max, $count, $push, $first, $last
//
// Expressions are either field references ("$amount", "$address.city"),
// literals, or objects of expressions (compound group keys).
//
// ============================================================================

use super::filter::Filter;
use super::projection::Projection;
use super::sort::SortSpec;
use super::value::{compare_values, lookup, validate_path, values_equal};
use crate::core::{ID_FIELD, RepoError, Result};
use serde_json::{Map, Number, Value as JsonValue};
use std::cmp::Ordering;

/// Value expression evaluated per document.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Field(String),
    Literal(JsonValue),
    Object(Vec<(String, Expr)>),
}

impl Expr {
    pub fn field(path: impl Into<String>) -> Self {
        Expr::Field(path.into())
    }

    pub fn parse(value: &JsonValue) -> Result<Self> {
        match value {
            JsonValue::String(s) if s.starts_with('$') => {
                let path = &s[1..];
                validate_path(path).map_err(|_| {
                    RepoError::invalid_query(format!("invalid field reference '{}'", s))
                })?;
                Ok(Expr::Field(path.to_string()))
            }
            JsonValue::Object(map) => {
                if map.keys().any(|k| k.starts_with('$')) {
                    return Err(RepoError::invalid_query(format!(
                        "unsupported expression operator in {}",
                        value
                    )));
                }
                let fields = map
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), Expr::parse(v)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Expr::Object(fields))
            }
            other => Ok(Expr::Literal(other.clone())),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Expr::Field(path) => validate_path(path),
            Expr::Literal(_) => Ok(()),
            Expr::Object(fields) => fields.iter().try_for_each(|(name, expr)| {
                output_name(name)?;
                expr.validate()
            }),
        }
    }

    /// `None` when a referenced field is missing.
    pub fn evaluate(&self, doc: &Map<String, JsonValue>) -> Option<JsonValue> {
        match self {
            Expr::Field(path) => lookup(doc, path).cloned(),
            Expr::Literal(value) => Some(value.clone()),
            Expr::Object(fields) => {
                let mut out = Map::new();
                for (name, expr) in fields {
                    out.insert(name.clone(), expr.evaluate(doc).unwrap_or(JsonValue::Null));
                }
                Some(JsonValue::Object(out))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorOp {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    Push,
    First,
    Last,
}

impl AccumulatorOp {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "$sum" => AccumulatorOp::Sum,
            "$avg" => AccumulatorOp::Avg,
            "$min" => AccumulatorOp::Min,
            "$max" => AccumulatorOp::Max,
            "$count" => AccumulatorOp::Count,
            "$push" => AccumulatorOp::Push,
            "$first" => AccumulatorOp::First,
            "$last" => AccumulatorOp::Last,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Accumulator {
    pub output: String,
    pub op: AccumulatorOp,
    pub expr: Expr,
}

/// `$group` stage: documents sharing the key expression collapse into one
/// output document whose `_id` is the key.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupStage {
    pub key: Expr,
    pub accumulators: Vec<Accumulator>,
}

impl GroupStage {
    /// Groups by `key`; pass `JsonValue::Null` to group the whole input.
    pub fn by(key: impl Into<JsonValue>) -> Result<Self> {
        Ok(Self {
            key: Expr::parse(&key.into())?,
            accumulators: Vec::new(),
        })
    }

    fn push(mut self, output: &str, op: AccumulatorOp, expr: Expr) -> Self {
        self.accumulators.push(Accumulator {
            output: output.to_string(),
            op,
            expr,
        });
        self
    }

    pub fn sum(self, output: &str, expr: Expr) -> Self {
        self.push(output, AccumulatorOp::Sum, expr)
    }

    pub fn avg(self, output: &str, expr: Expr) -> Self {
        self.push(output, AccumulatorOp::Avg, expr)
    }

    pub fn min(self, output: &str, expr: Expr) -> Self {
        self.push(output, AccumulatorOp::Min, expr)
    }

    pub fn max(self, output: &str, expr: Expr) -> Self {
        self.push(output, AccumulatorOp::Max, expr)
    }

    pub fn count(self, output: &str) -> Self {
        self.push(output, AccumulatorOp::Count, Expr::Literal(JsonValue::Null))
    }

    pub fn push_values(self, output: &str, expr: Expr) -> Self {
        self.push(output, AccumulatorOp::Push, expr)
    }

    pub fn first(self, output: &str, expr: Expr) -> Self {
        self.push(output, AccumulatorOp::First, expr)
    }

    pub fn last(self, output: &str, expr: Expr) -> Self {
        self.push(output, AccumulatorOp::Last, expr)
    }

    pub fn validate(&self) -> Result<()> {
        self.key.validate()?;
        for acc in &self.accumulators {
            output_name(&acc.output)?;
            if acc.output == ID_FIELD {
                return Err(RepoError::invalid_query(
                    "$group accumulator cannot be named _id",
                ));
            }
            acc.expr.validate()?;
        }
        Ok(())
    }

    fn from_json(spec: &JsonValue) -> Result<Self> {
        let object = spec
            .as_object()
            .ok_or_else(|| RepoError::invalid_query("$group expects an object"))?;
        let key = object
            .get(ID_FIELD)
            .ok_or_else(|| RepoError::invalid_query("$group requires an _id expression"))?;

        let mut stage = GroupStage {
            key: Expr::parse(key)?,
            accumulators: Vec::new(),
        };

        for (output, acc) in object.iter().filter(|(k, _)| k.as_str() != ID_FIELD) {
            let acc = acc.as_object().filter(|m| m.len() == 1).ok_or_else(|| {
                RepoError::invalid_query(format!(
                    "$group field '{}' must be a single accumulator object",
                    output
                ))
            })?;
            let (name, operand) = acc.iter().next().ok_or_else(|| {
                RepoError::invalid_query(format!("$group field '{}' is empty", output))
            })?;
            let op = AccumulatorOp::from_name(name).ok_or_else(|| {
                RepoError::invalid_query(format!("unknown accumulator '{}'", name))
            })?;
            stage.accumulators.push(Accumulator {
                output: output.clone(),
                op,
                expr: Expr::parse(operand)?,
            });
        }
        stage.validate()?;
        Ok(stage)
    }

    fn execute(&self, docs: Vec<Map<String, JsonValue>>) -> Vec<Map<String, JsonValue>> {
        let mut groups: Vec<(JsonValue, Vec<Map<String, JsonValue>>)> = Vec::new();
        for doc in docs {
            let key = self.key.evaluate(&doc).unwrap_or(JsonValue::Null);
            match groups
                .iter_mut()
                .find(|(existing, _)| values_equal(Some(existing), Some(&key)))
            {
                Some((_, members)) => members.push(doc),
                None => groups.push((key, vec![doc])),
            }
        }

        groups
            .into_iter()
            .map(|(key, members)| {
                let mut out = Map::new();
                out.insert(ID_FIELD.to_string(), key);
                for acc in &self.accumulators {
                    out.insert(acc.output.clone(), accumulate(acc, &members));
                }
                out
            })
            .collect()
    }
}

fn accumulate(acc: &Accumulator, members: &[Map<String, JsonValue>]) -> JsonValue {
    let values = move || members.iter().map(move |doc| acc.expr.evaluate(doc));

    match acc.op {
        AccumulatorOp::Count => JsonValue::from(members.len() as u64),
        AccumulatorOp::Sum => sum_numbers(values().flatten()),
        AccumulatorOp::Avg => {
            let numbers: Vec<f64> = values().flatten().filter_map(|v| v.as_f64()).collect();
            if numbers.is_empty() {
                JsonValue::Null
            } else {
                float_value(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        AccumulatorOp::Min | AccumulatorOp::Max => {
            let wanted = if acc.op == AccumulatorOp::Min {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            values()
                .flatten()
                .filter(|v| !v.is_null())
                .reduce(|best, v| {
                    if compare_values(Some(&v), Some(&best)) == wanted {
                        v
                    } else {
                        best
                    }
                })
                .unwrap_or(JsonValue::Null)
        }
        AccumulatorOp::Push => JsonValue::Array(values().flatten().collect()),
        AccumulatorOp::First => values().next().flatten().unwrap_or(JsonValue::Null),
        AccumulatorOp::Last => values().last().flatten().unwrap_or(JsonValue::Null),
    }
}

fn sum_numbers(values: impl Iterator<Item = JsonValue>) -> JsonValue {
    let mut int_sum: Option<i64> = Some(0);
    let mut float_sum = 0.0;
    for value in values {
        let JsonValue::Number(n) = value else {
            continue;
        };
        float_sum += n.as_f64().unwrap_or(0.0);
        int_sum = match (int_sum, n.as_i64()) {
            (Some(total), Some(v)) => total.checked_add(v),
            _ => None,
        };
    }
    match int_sum {
        Some(total) => JsonValue::from(total),
        None => float_value(float_sum),
    }
}

fn float_value(v: f64) -> JsonValue {
    Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Sort(SortSpec),
    Skip(u64),
    Limit(u64),
    Project(Projection),
    Group(GroupStage),
    /// Replaces the input with one document `{<name>: <count>}`.
    Count(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn matching(mut self, filter: Filter) -> Self {
        self.stages.push(Stage::Match(filter));
        self
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.stages.push(Stage::Sort(sort));
        self
    }

    pub fn skip(mut self, n: u64) -> Self {
        self.stages.push(Stage::Skip(n));
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.stages.push(Stage::Limit(n));
        self
    }

    pub fn project(mut self, projection: Projection) -> Self {
        self.stages.push(Stage::Project(projection));
        self
    }

    pub fn group(mut self, group: GroupStage) -> Self {
        self.stages.push(Stage::Group(group));
        self
    }

    pub fn count(mut self, output: impl Into<String>) -> Self {
        self.stages.push(Stage::Count(output.into()));
        self
    }

    /// Parses the JSON array form, one single-key object per stage.
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let items = value.as_array().ok_or_else(|| {
            RepoError::invalid_query(format!("pipeline must be an array, got {}", value))
        })?;

        let mut pipeline = Pipeline::new();
        for item in items {
            let (name, spec) = item
                .as_object()
                .filter(|m| m.len() == 1)
                .and_then(|m| m.iter().next())
                .ok_or_else(|| {
                    RepoError::invalid_query(format!(
                        "pipeline stage must be a single-key object, got {}",
                        item
                    ))
                })?;

            let stage = match name.as_str() {
                "$match" => Stage::Match(Filter::from_json(spec)?),
                "$sort" => Stage::Sort(SortSpec::from_json(spec)?),
                "$skip" => Stage::Skip(non_negative(name, spec)?),
                "$limit" => Stage::Limit(non_negative(name, spec)?),
                "$project" => Stage::Project(Projection::from_json(spec)?),
                "$group" => Stage::Group(GroupStage::from_json(spec)?),
                "$count" => {
                    let output = spec.as_str().ok_or_else(|| {
                        RepoError::invalid_query("$count expects a non-empty field name")
                    })?;
                    output_name(output)?;
                    Stage::Count(output.to_string())
                }
                other => {
                    return Err(RepoError::invalid_query(format!(
                        "unknown pipeline stage '{}'",
                        other
                    )));
                }
            };
            pipeline.stages.push(stage);
        }
        Ok(pipeline)
    }

    /// Checks every stage of a pipeline built in code.
    pub fn validate(&self) -> Result<()> {
        self.stages.iter().try_for_each(|stage| match stage {
            Stage::Match(filter) => filter.validate(),
            Stage::Sort(sort) => sort.validate(),
            Stage::Project(projection) => projection.validate(),
            Stage::Group(group) => group.validate(),
            Stage::Count(output) => output_name(output),
            Stage::Skip(_) | Stage::Limit(_) => Ok(()),
        })
    }

    pub fn execute(&self, mut docs: Vec<Map<String, JsonValue>>) -> Vec<Map<String, JsonValue>> {
        for stage in &self.stages {
            docs = match stage {
                Stage::Match(filter) => docs.into_iter().filter(|d| filter.matches(d)).collect(),
                Stage::Sort(sort) => {
                    sort.sort(&mut docs);
                    docs
                }
                Stage::Skip(n) => docs.into_iter().skip(saturating_usize(*n)).collect(),
                Stage::Limit(n) => docs.into_iter().take(saturating_usize(*n)).collect(),
                Stage::Project(projection) => docs.iter().map(|d| projection.apply(d)).collect(),
                Stage::Group(group) => group.execute(docs),
                Stage::Count(output) => {
                    if docs.is_empty() {
                        Vec::new()
                    } else {
                        let mut out = Map::new();
                        out.insert(output.clone(), JsonValue::from(docs.len() as u64));
                        vec![out]
                    }
                }
            };
        }
        docs
    }
}

/// Names of computed output fields: non-empty, no `$` prefix, no dots.
fn output_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('$') || name.contains('.') {
        return Err(RepoError::invalid_query(format!(
            "invalid output field name '{}'",
            name
        )));
    }
    Ok(())
}

fn non_negative(stage: &str, spec: &JsonValue) -> Result<u64> {
    spec.as_u64().ok_or_else(|| {
        RepoError::invalid_query(format!(
            "{} expects a non-negative integer, got {}",
            stage, spec
        ))
    })
}

pub(crate) fn saturating_usize(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}
