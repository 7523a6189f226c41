use bson::{Bson, Document};

use crate::error::QueryError;
use crate::matcher::matches;
use crate::path::{get_path, remove_path, set_path};
use crate::value::{cmp_bson, values_equal};

/// Whether an update document is made of `$` modifiers (as opposed to a
/// whole-document replacement).
pub fn is_update_document(update: &Document) -> bool {
    update.keys().any(|k| k.starts_with('$'))
}

/// Apply a modifier-style update document. Returns whether anything changed.
///
/// Modifier and plain keys must not be mixed; `_id` may not be changed.
pub fn apply_update(doc: &mut Document, update: &Document) -> Result<bool, QueryError> {
    let mut changed = false;
    for (modifier, argument) in update {
        if !modifier.starts_with('$') {
            return Err(QueryError::FailedToParse(format!(
                "unknown modifier: {modifier}"
            )));
        }
        let Bson::Document(fields) = argument else {
            return Err(QueryError::FailedToParse(format!(
                "modifier {modifier} expects a document argument"
            )));
        };
        for (path, value) in fields {
            if path == "_id" {
                let unchanged =
                    modifier == "$set" && doc.get("_id").is_some_and(|id| values_equal(id, value));
                if !unchanged {
                    return Err(QueryError::ImmutableField(
                        "performing an update on the path '_id' would modify the immutable field '_id'"
                            .into(),
                    ));
                }
                continue;
            }
            changed |= apply_modifier(doc, modifier, path, value)?;
        }
    }
    Ok(changed)
}

fn apply_modifier(
    doc: &mut Document,
    modifier: &str,
    path: &str,
    value: &Bson,
) -> Result<bool, QueryError> {
    match modifier {
        "$set" => op_set(doc, path, value),
        "$unset" => Ok(remove_path(doc, path).is_some()),
        "$inc" => op_arith(doc, path, value, "$inc"),
        "$mul" => op_arith(doc, path, value, "$mul"),
        "$min" => op_min_max(doc, path, value, true),
        "$max" => op_min_max(doc, path, value, false),
        "$rename" => op_rename(doc, path, value),
        "$push" => op_push(doc, path, value),
        "$pop" => op_pop(doc, path, value),
        "$pull" => op_pull(doc, path, value),
        "$addToSet" => op_add_to_set(doc, path, value),
        _ => Err(QueryError::FailedToParse(format!(
            "unknown modifier: {modifier}"
        ))),
    }
}

/// `$set` is a no-op when the stored value already equals the operand.
fn op_set(doc: &mut Document, path: &str, value: &Bson) -> Result<bool, QueryError> {
    if get_path(doc, path) == Some(value) {
        return Ok(false);
    }
    set_path(doc, path, value.clone());
    Ok(true)
}

/// `$inc` / `$mul` with numeric type promotion:
/// int32 op int32 stays int32 unless it overflows, any double makes a double,
/// a missing field starts from the operand-typed zero.
fn op_arith(doc: &mut Document, path: &str, amount: &Bson, modifier: &str) -> Result<bool, QueryError> {
    let current = get_path(doc, path).cloned().unwrap_or(match amount {
        Bson::Int64(_) => Bson::Int64(0),
        Bson::Double(_) => Bson::Double(0.0),
        _ => Bson::Int32(0),
    });

    let multiply = modifier == "$mul";
    let result = match (&current, amount) {
        (Bson::Int32(a), Bson::Int32(b)) => {
            let combined = if multiply {
                a.checked_mul(*b)
            } else {
                a.checked_add(*b)
            };
            match combined {
                Some(n) => Bson::Int32(n),
                None if multiply => Bson::Int64(*a as i64 * *b as i64),
                None => Bson::Int64(*a as i64 + *b as i64),
            }
        }
        (Bson::Int32(a), Bson::Int64(b)) => int64_arith(*a as i64, *b, multiply),
        (Bson::Int64(a), Bson::Int32(b)) => int64_arith(*a, *b as i64, multiply),
        (Bson::Int64(a), Bson::Int64(b)) => int64_arith(*a, *b, multiply),
        (a, b) => match (a.as_f64().or(as_f64_lossy(a)), b.as_f64().or(as_f64_lossy(b))) {
            (Some(x), Some(y)) => Bson::Double(if multiply { x * y } else { x + y }),
            _ => {
                return Err(QueryError::TypeMismatch(format!(
                    "cannot apply {modifier} to a value of non-numeric type"
                )));
            }
        },
    };

    let changed = get_path(doc, path) != Some(&result);
    set_path(doc, path, result);
    Ok(changed)
}

fn int64_arith(a: i64, b: i64, multiply: bool) -> Bson {
    Bson::Int64(if multiply { a.wrapping_mul(b) } else { a.wrapping_add(b) })
}

fn as_f64_lossy(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        _ => None,
    }
}

fn op_min_max(doc: &mut Document, path: &str, value: &Bson, min: bool) -> Result<bool, QueryError> {
    let replace = match get_path(doc, path) {
        None => true,
        Some(current) => {
            let ord = cmp_bson(value, current);
            if min {
                ord == std::cmp::Ordering::Less
            } else {
                ord == std::cmp::Ordering::Greater
            }
        }
    };
    if replace {
        set_path(doc, path, value.clone());
    }
    Ok(replace)
}

fn op_rename(doc: &mut Document, path: &str, new_name: &Bson) -> Result<bool, QueryError> {
    let Bson::String(new_name) = new_name else {
        return Err(QueryError::BadValue(
            "$rename target must be a string".into(),
        ));
    };
    match remove_path(doc, path) {
        Some(value) => {
            set_path(doc, new_name, value);
            Ok(true)
        }
        None => Ok(false),
    }
}

fn op_push(doc: &mut Document, path: &str, value: &Bson) -> Result<bool, QueryError> {
    let values: Vec<Bson> = match value {
        Bson::Document(spec) if spec.contains_key("$each") => match spec.get("$each") {
            Some(Bson::Array(each)) => each.clone(),
            _ => return Err(QueryError::BadValue("$each needs an array".into())),
        },
        other => vec![other.clone()],
    };
    match array_at_mut(doc, path)? {
        Some(array) => {
            array.extend(values);
        }
        None => {
            set_path(doc, path, Bson::Array(values));
        }
    }
    Ok(true)
}

fn op_pop(doc: &mut Document, path: &str, value: &Bson) -> Result<bool, QueryError> {
    let from_front = as_f64_lossy(value).or(value.as_f64()) == Some(-1.0);
    match array_at_mut(doc, path)? {
        Some(array) if !array.is_empty() => {
            if from_front {
                array.remove(0);
            } else {
                array.pop();
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn op_pull(doc: &mut Document, path: &str, condition: &Bson) -> Result<bool, QueryError> {
    let Some(array) = array_at_mut(doc, path)? else {
        return Ok(false);
    };
    let before = array.len();
    let mut retained = Vec::with_capacity(before);
    for element in std::mem::take(array) {
        if !pull_matches(&element, condition)? {
            retained.push(element);
        }
    }
    *array = retained;
    Ok(array.len() != before)
}

fn pull_matches(element: &Bson, condition: &Bson) -> Result<bool, QueryError> {
    match condition {
        // Operator condition: applied to the element itself.
        Bson::Document(query) if query.keys().next().is_some_and(|k| k.starts_with('$')) => {
            let mut probe = Document::new();
            probe.insert("element", element.clone());
            let mut wrapped = Document::new();
            wrapped.insert("element", Bson::Document(query.clone()));
            matches(&probe, &wrapped)
        }
        // Query condition: matched against sub-document elements.
        Bson::Document(query) => match element {
            Bson::Document(sub) => matches(sub, query),
            _ => Ok(false),
        },
        other => Ok(values_equal(element, other)),
    }
}

fn op_add_to_set(doc: &mut Document, path: &str, value: &Bson) -> Result<bool, QueryError> {
    let values: Vec<Bson> = match value {
        Bson::Document(spec) if spec.contains_key("$each") => match spec.get("$each") {
            Some(Bson::Array(each)) => each.clone(),
            _ => return Err(QueryError::BadValue("$each needs an array".into())),
        },
        other => vec![other.clone()],
    };
    match array_at_mut(doc, path)? {
        Some(array) => {
            let mut changed = false;
            for value in values {
                if !array.iter().any(|e| values_equal(e, &value)) {
                    array.push(value);
                    changed = true;
                }
            }
            Ok(changed)
        }
        None => {
            let mut unique: Vec<Bson> = Vec::new();
            for value in values {
                if !unique.iter().any(|e| values_equal(e, &value)) {
                    unique.push(value);
                }
            }
            set_path(doc, path, Bson::Array(unique));
            Ok(true)
        }
    }
}

/// Mutable handle on the array at a path. Missing field yields `None`; a
/// non-array value is a type error.
fn array_at_mut<'a>(
    doc: &'a mut Document,
    path: &str,
) -> Result<Option<&'a mut Vec<Bson>>, QueryError> {
    fn walk<'a>(
        doc: &'a mut Document,
        path: &str,
    ) -> Result<Option<&'a mut Bson>, QueryError> {
        match path.split_once('.') {
            None => Ok(doc.get_mut(path)),
            Some((head, rest)) => match doc.get_mut(head) {
                Some(Bson::Document(sub)) => walk(sub, rest),
                Some(_) | None => Ok(None),
            },
        }
    }
    match walk(doc, path)? {
        Some(Bson::Array(array)) => Ok(Some(array)),
        Some(_) => Err(QueryError::TypeMismatch(format!(
            "the field '{path}' must be an array"
        ))),
        None => Ok(None),
    }
}

/// Build the document an upsert inserts when no document matched: the
/// selector's equality fields merged with the update (modifiers applied, or
/// the replacement taken wholesale).
pub fn upsert_document(selector: &Document, update: &Document) -> Result<Document, QueryError> {
    if !is_update_document(update) {
        let mut doc = update.clone();
        if !doc.contains_key("_id") {
            if let Some(id) = selector.get("_id") {
                if !matches!(id, Bson::Document(_)) {
                    let mut with_id = Document::new();
                    with_id.insert("_id", id.clone());
                    with_id.extend(doc);
                    doc = with_id;
                }
            }
        }
        return Ok(doc);
    }

    let mut doc = Document::new();
    for (path, value) in selector {
        if path.starts_with('$') || matches!(value, Bson::Document(d) if is_update_document(d)) {
            continue;
        }
        set_path(&mut doc, path, value.clone());
    }
    apply_update(&mut doc, update)?;
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    #[test]
    fn set_new_field() {
        let mut d = doc! { "a": 1 };
        assert!(apply_update(&mut d, &doc! { "$set": { "b": 2 } }).unwrap());
        assert_eq!(d, doc! { "a": 1, "b": 2 });
    }

    #[test]
    fn set_same_value_no_change() {
        let mut d = doc! { "a": 1 };
        assert!(!apply_update(&mut d, &doc! { "$set": { "a": 1 } }).unwrap());
    }

    #[test]
    fn set_nested_path() {
        let mut d = doc! {};
        apply_update(&mut d, &doc! { "$set": { "a.b": "x" } }).unwrap();
        assert_eq!(d, doc! { "a": { "b": "x" } });
    }

    #[test]
    fn set_id_to_same_value_is_noop() {
        let mut d = doc! { "_id": 1, "a": 1 };
        assert!(!apply_update(&mut d, &doc! { "$set": { "_id": 1 } }).unwrap());
    }

    #[test]
    fn set_id_to_new_value_errors() {
        let mut d = doc! { "_id": 1 };
        let err = apply_update(&mut d, &doc! { "$set": { "_id": 2 } }).unwrap_err();
        assert!(matches!(err, QueryError::ImmutableField(_)));
    }

    #[test]
    fn unset_existing_and_missing() {
        let mut d = doc! { "a": 1 };
        assert!(apply_update(&mut d, &doc! { "$unset": { "a": "" } }).unwrap());
        assert!(!apply_update(&mut d, &doc! { "$unset": { "a": "" } }).unwrap());
        assert_eq!(d, doc! {});
    }

    #[test]
    fn inc_creates_and_promotes() {
        let mut d = doc! {};
        apply_update(&mut d, &doc! { "$inc": { "n": 3 } }).unwrap();
        assert_eq!(d.get("n"), Some(&Bson::Int32(3)));
        apply_update(&mut d, &doc! { "$inc": { "n": 1.5 } }).unwrap();
        assert_eq!(d.get("n"), Some(&Bson::Double(4.5)));
    }

    #[test]
    fn inc_i32_overflow_promotes_to_i64() {
        let mut d = doc! { "n": i32::MAX };
        apply_update(&mut d, &doc! { "$inc": { "n": 1 } }).unwrap();
        assert_eq!(d.get("n"), Some(&Bson::Int64(i32::MAX as i64 + 1)));
    }

    #[test]
    fn inc_non_numeric_errors() {
        let mut d = doc! { "n": "x" };
        assert!(apply_update(&mut d, &doc! { "$inc": { "n": 1 } }).is_err());
    }

    #[test]
    fn mul_existing() {
        let mut d = doc! { "n": 6 };
        apply_update(&mut d, &doc! { "$mul": { "n": 7 } }).unwrap();
        assert_eq!(d.get("n"), Some(&Bson::Int32(42)));
    }

    #[test]
    fn min_max() {
        let mut d = doc! { "n": 5 };
        assert!(apply_update(&mut d, &doc! { "$min": { "n": 3 } }).unwrap());
        assert!(!apply_update(&mut d, &doc! { "$min": { "n": 9 } }).unwrap());
        assert!(apply_update(&mut d, &doc! { "$max": { "n": 9 } }).unwrap());
        assert_eq!(d.get("n"), Some(&Bson::Int32(9)));
    }

    #[test]
    fn rename_field() {
        let mut d = doc! { "a": 1 };
        assert!(apply_update(&mut d, &doc! { "$rename": { "a": "b" } }).unwrap());
        assert_eq!(d, doc! { "b": 1 });
    }

    #[test]
    fn push_and_each() {
        let mut d = doc! {};
        apply_update(&mut d, &doc! { "$push": { "a": 1 } }).unwrap();
        apply_update(&mut d, &doc! { "$push": { "a": { "$each": [2, 3] } } }).unwrap();
        assert_eq!(d, doc! { "a": [1, 2, 3] });
    }

    #[test]
    fn push_on_non_array_errors() {
        let mut d = doc! { "a": 1 };
        assert!(apply_update(&mut d, &doc! { "$push": { "a": 2 } }).is_err());
    }

    #[test]
    fn pop_both_ends() {
        let mut d = doc! { "a": [1, 2, 3] };
        apply_update(&mut d, &doc! { "$pop": { "a": 1 } }).unwrap();
        apply_update(&mut d, &doc! { "$pop": { "a": -1 } }).unwrap();
        assert_eq!(d, doc! { "a": [2] });
    }

    #[test]
    fn pull_by_value_and_condition() {
        let mut d = doc! { "a": [1, 2, 3, 2] };
        assert!(apply_update(&mut d, &doc! { "$pull": { "a": 2 } }).unwrap());
        assert_eq!(d, doc! { "a": [1, 3] });

        let mut d = doc! { "a": [1, 5, 9] };
        assert!(apply_update(&mut d, &doc! { "$pull": { "a": { "$gt": 4 } } }).unwrap());
        assert_eq!(d, doc! { "a": [1] });
    }

    #[test]
    fn add_to_set_dedupes() {
        let mut d = doc! { "a": [1] };
        assert!(apply_update(&mut d, &doc! { "$addToSet": { "a": 2 } }).unwrap());
        assert!(!apply_update(&mut d, &doc! { "$addToSet": { "a": 2 } }).unwrap());
        assert_eq!(d, doc! { "a": [1, 2] });
    }

    #[test]
    fn mixed_plain_key_errors() {
        let mut d = doc! {};
        assert!(apply_update(&mut d, &doc! { "$set": { "a": 1 }, "b": 2 }).is_err());
    }

    #[test]
    fn upsert_from_equality_selector() {
        let d = upsert_document(
            &doc! { "_id": 2, "kind": "x", "n": { "$gt": 5 } },
            &doc! { "$set": { "a": "y" } },
        )
        .unwrap();
        assert_eq!(d, doc! { "_id": 2, "kind": "x", "a": "y" });
    }

    #[test]
    fn upsert_from_replacement() {
        let d = upsert_document(&doc! { "_id": 7 }, &doc! { "a": 1 }).unwrap();
        assert_eq!(d, doc! { "_id": 7, "a": 1 });
    }
}
