use std::cmp::Ordering;

use bson::{Bson, Document};
use regex::Regex;

use crate::error::QueryError;
use crate::path::values_at_path;
use crate::value::{cmp_bson, values_equal};

/// Evaluate whether a document matches the given query document.
///
/// Top-level fields combine with AND. A field condition is either an
/// operator document (`{$gt: 5}`) or a literal to match by equality.
pub fn matches(doc: &Document, query: &Document) -> Result<bool, QueryError> {
    for (key, condition) in query {
        let matched = match key.as_str() {
            "$and" => every_subquery(doc, condition, key)?,
            "$or" => any_subquery(doc, condition, key)?,
            "$nor" => !any_subquery(doc, condition, key)?,
            _ => field_matches(doc, key, condition)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn subqueries<'a>(condition: &'a Bson, operator: &str) -> Result<&'a bson::Array, QueryError> {
    match condition {
        Bson::Array(array) if !array.is_empty() => Ok(array),
        _ => Err(QueryError::BadValue(format!(
            "{operator} must be a nonempty array"
        ))),
    }
}

fn every_subquery(doc: &Document, condition: &Bson, operator: &str) -> Result<bool, QueryError> {
    for sub in subqueries(condition, operator)? {
        let Bson::Document(sub) = sub else {
            return Err(QueryError::BadValue(format!(
                "{operator} entries must be documents"
            )));
        };
        if !matches(doc, sub)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn any_subquery(doc: &Document, condition: &Bson, operator: &str) -> Result<bool, QueryError> {
    for sub in subqueries(condition, operator)? {
        let Bson::Document(sub) = sub else {
            return Err(QueryError::BadValue(format!(
                "{operator} entries must be documents"
            )));
        };
        if matches(doc, sub)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn is_operator_document(condition: &Bson) -> bool {
    match condition {
        Bson::Document(d) => d.keys().next().is_some_and(|k| k.starts_with('$')),
        _ => false,
    }
}

fn field_matches(doc: &Document, path: &str, condition: &Bson) -> Result<bool, QueryError> {
    let mut values = Vec::new();
    values_at_path(doc, path, &mut values);

    if is_operator_document(condition) {
        let Bson::Document(operators) = condition else {
            unreachable!()
        };
        let options = operators.get_str("$options").unwrap_or("");
        for (op, operand) in operators {
            if !operator_matches(&values, op, operand, options)? {
                return Ok(false);
            }
        }
        return Ok(true);
    }

    Ok(equality_matches(&values, condition))
}

/// Equality with array fan-out: a stored array matches if the whole array
/// equals the operand or if any element does. `null` also matches absence.
fn equality_matches(values: &[&Bson], operand: &Bson) -> bool {
    if std::matches!(operand, Bson::Null) && values.is_empty() {
        return true;
    }
    for value in values {
        if values_equal(value, operand) {
            return true;
        }
        if let Bson::Array(elements) = value {
            if elements.iter().any(|e| values_equal(e, operand)) {
                return true;
            }
        }
    }
    false
}

fn comparison_matches(values: &[&Bson], operand: &Bson, predicate: fn(Ordering) -> bool) -> bool {
    // Incompatible type brackets are silently excluded.
    fn one(value: &Bson, operand: &Bson, predicate: fn(Ordering) -> bool) -> bool {
        comparable(value, operand) && predicate(cmp_bson(value, operand))
    }
    for value in values {
        if one(value, operand, predicate) {
            return true;
        }
        if let Bson::Array(elements) = value {
            if elements.iter().any(|e| one(e, operand, predicate)) {
                return true;
            }
        }
    }
    false
}

fn comparable(a: &Bson, b: &Bson) -> bool {
    crate::value::same_bracket(a, b)
}

fn operator_matches(
    values: &[&Bson],
    op: &str,
    operand: &Bson,
    regex_options: &str,
) -> Result<bool, QueryError> {
    match op {
        "$eq" => Ok(equality_matches(values, operand)),
        "$ne" => Ok(!equality_matches(values, operand)),
        "$gt" => Ok(comparison_matches(values, operand, |o| {
            o == Ordering::Greater
        })),
        "$gte" => Ok(comparison_matches(values, operand, |o| {
            o != Ordering::Less
        })),
        "$lt" => Ok(comparison_matches(values, operand, |o| o == Ordering::Less)),
        "$lte" => Ok(comparison_matches(values, operand, |o| {
            o != Ordering::Greater
        })),
        "$in" => {
            let Bson::Array(candidates) = operand else {
                return Err(QueryError::BadValue("$in needs an array".into()));
            };
            Ok(candidates.iter().any(|c| equality_matches(values, c)))
        }
        "$nin" => {
            let Bson::Array(candidates) = operand else {
                return Err(QueryError::BadValue("$nin needs an array".into()));
            };
            Ok(!candidates.iter().any(|c| equality_matches(values, c)))
        }
        "$exists" => {
            let expected = match operand {
                Bson::Boolean(b) => *b,
                Bson::Int32(n) => *n != 0,
                Bson::Int64(n) => *n != 0,
                Bson::Double(n) => *n != 0.0,
                _ => true,
            };
            Ok(!values.is_empty() == expected)
        }
        "$size" => {
            let Some(expected) = operand.as_i64().or(operand.as_i32().map(i64::from)) else {
                return Err(QueryError::BadValue("$size needs a number".into()));
            };
            Ok(values.iter().any(|v| match v {
                Bson::Array(elements) => elements.len() as i64 == expected,
                _ => false,
            }))
        }
        "$regex" => {
            let re = compile_regex(operand, regex_options)?;
            Ok(values.iter().any(|v| match v {
                Bson::String(s) => re.is_match(s),
                _ => false,
            }))
        }
        "$options" => Ok(true), // consumed together with $regex
        "$not" => match operand {
            Bson::Document(sub) => {
                let options = sub.get_str("$options").unwrap_or("");
                for (sub_op, sub_operand) in sub {
                    if sub_op == "$options" {
                        continue;
                    }
                    if operator_matches(values, sub_op, sub_operand, options)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Bson::RegularExpression(_) => {
                Ok(!operator_matches(values, "$regex", operand, "")?)
            }
            _ => Err(QueryError::BadValue(
                "$not needs a regex or a document".into(),
            )),
        },
        _ => Err(QueryError::BadValue(format!("unknown operator: {op}"))),
    }
}

fn compile_regex(operand: &Bson, extra_options: &str) -> Result<Regex, QueryError> {
    let (pattern, options) = match operand {
        Bson::String(pattern) => (pattern.as_str(), extra_options.to_string()),
        Bson::RegularExpression(re) => (re.pattern.as_str(), re.options.clone()),
        _ => {
            return Err(QueryError::BadValue("$regex has to be a string".into()));
        }
    };
    let mut flags = String::new();
    for option in options.chars().chain(extra_options.chars()) {
        match option {
            'i' | 'm' | 's' | 'x' => {
                if !flags.contains(option) {
                    flags.push(option);
                }
            }
            _ => {}
        }
    }
    let full = if flags.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{flags}){pattern}")
    };
    Regex::new(&full).map_err(|e| QueryError::BadValue(format!("invalid regex: {e}")))
}
