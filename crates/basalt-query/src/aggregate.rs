//! Aggregation stage transforms. The pipeline planner turns stage documents
//! into [`Stage`] values; each stage maps a batch of documents to the next.

use std::cmp::Ordering;

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::matcher::matches;
use crate::path::{get_path, set_path};
use crate::projection::project;
use crate::value::{OrderedBson, cmp_bson};

/// One planned pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stage {
    Match(Document),
    Skip(i64),
    Limit(i64),
    OrderBy(Document),
    Project(Document),
    Group(Document),
    AddFields(Document),
    Unwind(String),
}

impl Stage {
    /// Run the stage over a materialized batch.
    pub fn apply(&self, input: Vec<Document>) -> Result<Vec<Document>, QueryError> {
        match self {
            Stage::Match(filter) => {
                let mut output = Vec::new();
                for doc in input {
                    if matches(&doc, filter)? {
                        output.push(doc);
                    }
                }
                Ok(output)
            }
            Stage::Skip(n) => Ok(input.into_iter().skip((*n).max(0) as usize).collect()),
            Stage::Limit(n) => Ok(input.into_iter().take((*n).max(0) as usize).collect()),
            Stage::OrderBy(key_order) => order_by(input, key_order),
            Stage::Project(projection) => input
                .iter()
                .map(|doc| project(doc, projection))
                .collect(),
            Stage::Group(spec) => group(input, spec),
            Stage::AddFields(spec) => {
                let mut output = Vec::with_capacity(input.len());
                for mut doc in input {
                    for (field, expression) in spec {
                        if let Some(value) = evaluate(expression, &doc) {
                            set_path(&mut doc, field, value);
                        }
                    }
                    output.push(doc);
                }
                Ok(output)
            }
            Stage::Unwind(path) => unwind(input, path),
        }
    }
}

/// Evaluate an aggregation expression against a document: `"$path"` strings
/// dereference fields, documents evaluate per entry, everything else is a
/// literal. A dangling field path yields `None`.
fn evaluate(expression: &Bson, doc: &Document) -> Option<Bson> {
    match expression {
        Bson::String(s) if s.starts_with('$') => get_path(doc, &s[1..]).cloned(),
        Bson::Document(entries) => {
            let mut evaluated = Document::new();
            for (key, sub) in entries {
                if let Some(value) = evaluate(sub, doc) {
                    evaluated.insert(key.clone(), value);
                }
            }
            Some(Bson::Document(evaluated))
        }
        other => Some(other.clone()),
    }
}

fn order_by(mut input: Vec<Document>, key_order: &Document) -> Result<Vec<Document>, QueryError> {
    for (_, direction) in key_order {
        let dir = direction.as_i64().or(direction.as_i32().map(i64::from));
        if !matches!(dir, Some(1) | Some(-1)) {
            return Err(QueryError::BadValue(format!(
                "$sort key ordering must be 1 or -1, got: {direction}"
            )));
        }
    }
    input.sort_by(|a, b| {
        for (field, direction) in key_order {
            let va = get_path(a, field).unwrap_or(&Bson::Null);
            let vb = get_path(b, field).unwrap_or(&Bson::Null);
            let mut ord = cmp_bson(va, vb);
            if direction.as_i64().or(direction.as_i32().map(i64::from)) == Some(-1) {
                ord = ord.reverse();
            }
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(input)
}

fn unwind(input: Vec<Document>, path: &str) -> Result<Vec<Document>, QueryError> {
    let Some(field) = path.strip_prefix('$') else {
        return Err(QueryError::FailedToParse(format!(
            "$unwind path must start with '$', got: {path}"
        )));
    };
    let mut output = Vec::new();
    for doc in input {
        // Missing, empty, or non-array fields drop the document.
        let Some(Bson::Array(elements)) = get_path(&doc, field) else {
            continue;
        };
        for element in elements.clone() {
            let mut unwound = doc.clone();
            set_path(&mut unwound, field, element);
            output.push(unwound);
        }
    }
    Ok(output)
}

// ── $group ──────────────────────────────────────────────────────

struct Accumulator {
    field: String,
    operand: Bson,
    state: AccumulatorState,
}

enum AccumulatorState {
    Sum { total: Bson },
    Avg { total: f64, count: u64 },
    Extreme { value: Option<Bson>, min: bool },
    First { value: Option<Bson> },
    Last { value: Option<Bson> },
    Push { values: Vec<Bson> },
}

impl Accumulator {
    fn new(field: &str, spec: &Bson) -> Result<Self, QueryError> {
        let Bson::Document(spec) = spec else {
            return Err(QueryError::FailedToParse(format!(
                "the field '{field}' must be an accumulator object"
            )));
        };
        if spec.len() != 1 {
            return Err(QueryError::FailedToParse(format!(
                "the field '{field}' must specify one accumulator"
            )));
        }
        let (operator, operand) = spec
            .iter()
            .next()
            .map(|(k, v)| (k.clone(), v.clone()))
            .ok_or_else(|| {
                QueryError::FailedToParse(format!("the field '{field}' must specify one accumulator"))
            })?;
        let state = match operator.as_str() {
            "$sum" => AccumulatorState::Sum {
                total: Bson::Int32(0),
            },
            "$avg" => AccumulatorState::Avg { total: 0.0, count: 0 },
            "$min" => AccumulatorState::Extreme { value: None, min: true },
            "$max" => AccumulatorState::Extreme { value: None, min: false },
            "$first" => AccumulatorState::First { value: None },
            "$last" => AccumulatorState::Last { value: None },
            "$push" => AccumulatorState::Push { values: Vec::new() },
            other => {
                return Err(QueryError::FailedToParse(format!(
                    "unknown group operator '{other}'"
                )));
            }
        };
        Ok(Self {
            field: field.to_string(),
            operand,
            state,
        })
    }

    fn accumulate(&mut self, doc: &Document) {
        let value = evaluate(&self.operand, doc);
        match &mut self.state {
            AccumulatorState::Sum { total } => {
                if let Some(value) = value {
                    *total = add_numbers(total, &value);
                }
            }
            AccumulatorState::Avg { total, count } => {
                if let Some(n) = value.as_ref().and_then(numeric) {
                    *total += n;
                    *count += 1;
                }
            }
            AccumulatorState::Extreme { value: extreme, min } => {
                if let Some(value) = value {
                    let replace = match extreme {
                        None => true,
                        Some(current) => {
                            let ord = cmp_bson(&value, current);
                            if *min {
                                ord == Ordering::Less
                            } else {
                                ord == Ordering::Greater
                            }
                        }
                    };
                    if replace {
                        *extreme = Some(value);
                    }
                }
            }
            AccumulatorState::First { value: first } => {
                if first.is_none() {
                    *first = Some(value.unwrap_or(Bson::Null));
                }
            }
            AccumulatorState::Last { value: last } => {
                *last = Some(value.unwrap_or(Bson::Null));
            }
            AccumulatorState::Push { values } => {
                if let Some(value) = value {
                    values.push(value);
                }
            }
        }
    }

    fn finish(self) -> (String, Bson) {
        let value = match self.state {
            AccumulatorState::Sum { total } => total,
            AccumulatorState::Avg { total, count } => {
                if count == 0 {
                    Bson::Null
                } else {
                    Bson::Double(total / count as f64)
                }
            }
            AccumulatorState::Extreme { value, .. } => value.unwrap_or(Bson::Null),
            AccumulatorState::First { value } | AccumulatorState::Last { value } => {
                value.unwrap_or(Bson::Null)
            }
            AccumulatorState::Push { values } => Bson::Array(values),
        };
        (self.field, value)
    }
}

fn numeric(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

/// Numeric addition ignoring non-numeric operands, keeping integer types
/// until a double shows up.
fn add_numbers(a: &Bson, b: &Bson) -> Bson {
    match (a, b) {
        (Bson::Int32(x), Bson::Int32(y)) => match x.checked_add(*y) {
            Some(sum) => Bson::Int32(sum),
            None => Bson::Int64(*x as i64 + *y as i64),
        },
        (Bson::Int32(x), Bson::Int64(y)) => Bson::Int64(*x as i64 + y),
        (Bson::Int64(x), Bson::Int32(y)) => Bson::Int64(x + *y as i64),
        (Bson::Int64(x), Bson::Int64(y)) => Bson::Int64(x + y),
        (x, y) => match (numeric(x), numeric(y)) {
            (Some(x), Some(y)) => Bson::Double(x + y),
            (_, None) => a.clone(),
            (None, _) => b.clone(),
        },
    }
}

fn group(input: Vec<Document>, spec: &Document) -> Result<Vec<Document>, QueryError> {
    let id_expression = spec
        .get("_id")
        .ok_or_else(|| QueryError::FailedToParse("a group specification must include an _id".into()))?;

    // Groups keep first-seen order.
    let mut keys: Vec<OrderedBson> = Vec::new();
    let mut groups: Vec<Vec<Accumulator>> = Vec::new();

    for doc in &input {
        let key = OrderedBson(evaluate(id_expression, doc).unwrap_or(Bson::Null));
        let index = match keys.iter().position(|k| *k == key) {
            Some(index) => index,
            None => {
                let mut accumulators = Vec::new();
                for (field, accumulator_spec) in spec {
                    if field == "_id" {
                        continue;
                    }
                    accumulators.push(Accumulator::new(field, accumulator_spec)?);
                }
                keys.push(key);
                groups.push(accumulators);
                keys.len() - 1
            }
        };
        for accumulator in &mut groups[index] {
            accumulator.accumulate(doc);
        }
    }

    // A whole-collection group over an empty input still yields no rows;
    // $count relies on that.
    let mut output = Vec::with_capacity(groups.len());
    for (key, accumulators) in keys.into_iter().zip(groups) {
        let mut row = Document::new();
        row.insert("_id", key.0);
        for accumulator in accumulators {
            let (field, value) = accumulator.finish();
            row.insert(field, value);
        }
        output.push(row);
    }
    Ok(output)
}
