use std::cmp::Ordering;

use bson::Bson;

/// Sort bracket of a BSON value. Values of different brackets never compare
/// equal; the bracket order matches the server's cross-type sort order.
fn type_bracket(value: &Bson) -> u8 {
    match value {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::JavaScriptCode(_) | Bson::JavaScriptCodeWithScope(_) => 12,
        Bson::MaxKey => 13,
        Bson::DbPointer(_) => 14,
    }
}

/// Whether two values live in the same sort bracket (and thus can satisfy a
/// range comparison against each other).
pub(crate) fn same_bracket(a: &Bson, b: &Bson) -> bool {
    type_bracket(a) == type_bracket(b)
}

fn numeric_value(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

/// Total order over BSON values: bracket first, then value. Numbers compare
/// by numeric value across Int32/Int64/Double.
pub fn cmp_bson(a: &Bson, b: &Bson) -> Ordering {
    let bracket = type_bracket(a).cmp(&type_bracket(b));
    if bracket != Ordering::Equal {
        return bracket;
    }
    match (a, b) {
        (Bson::Null | Bson::Undefined, _) => Ordering::Equal,
        (Bson::MinKey, _) | (Bson::MaxKey, _) => Ordering::Equal,
        _ => {
            if let (Some(x), Some(y)) = (numeric_value(a), numeric_value(b)) {
                return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
            }
            match (a, b) {
                (Bson::String(x), Bson::String(y)) => x.cmp(y),
                (Bson::Symbol(x), Bson::Symbol(y)) => x.cmp(y),
                (Bson::String(x), Bson::Symbol(y)) => x.cmp(y),
                (Bson::Symbol(x), Bson::String(y)) => x.cmp(y),
                (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
                (Bson::DateTime(x), Bson::DateTime(y)) => {
                    x.timestamp_millis().cmp(&y.timestamp_millis())
                }
                (Bson::Timestamp(x), Bson::Timestamp(y)) => {
                    (x.time, x.increment).cmp(&(y.time, y.increment))
                }
                (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
                (Bson::Binary(x), Bson::Binary(y)) => x.bytes.cmp(&y.bytes),
                (Bson::Array(x), Bson::Array(y)) => {
                    for (ex, ey) in x.iter().zip(y.iter()) {
                        let ord = cmp_bson(ex, ey);
                        if ord != Ordering::Equal {
                            return ord;
                        }
                    }
                    x.len().cmp(&y.len())
                }
                (Bson::Document(x), Bson::Document(y)) => {
                    for ((kx, vx), (ky, vy)) in x.iter().zip(y.iter()) {
                        let key_ord = kx.cmp(ky);
                        if key_ord != Ordering::Equal {
                            return key_ord;
                        }
                        let val_ord = cmp_bson(vx, vy);
                        if val_ord != Ordering::Equal {
                            return val_ord;
                        }
                    }
                    x.len().cmp(&y.len())
                }
                (Bson::RegularExpression(x), Bson::RegularExpression(y)) => {
                    (&x.pattern, &x.options).cmp(&(&y.pattern, &y.options))
                }
                (Bson::JavaScriptCode(x), Bson::JavaScriptCode(y)) => x.cmp(y),
                _ => Ordering::Equal,
            }
        }
    }
}

/// Equality under the same coercion rules as [`cmp_bson`].
pub fn values_equal(a: &Bson, b: &Bson) -> bool {
    cmp_bson(a, b) == Ordering::Equal
}

/// A BSON value carrying the [`cmp_bson`] total order, usable as a map key.
#[derive(Debug, Clone)]
pub struct OrderedBson(pub Bson);

impl PartialEq for OrderedBson {
    fn eq(&self, other: &Self) -> bool {
        cmp_bson(&self.0, &other.0) == Ordering::Equal
    }
}

impl Eq for OrderedBson {}

impl PartialOrd for OrderedBson {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedBson {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_bson(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use bson::bson;

    use super::*;

    #[test]
    fn numbers_compare_across_types() {
        assert_eq!(cmp_bson(&bson!(1), &bson!(1.0)), Ordering::Equal);
        assert_eq!(cmp_bson(&bson!(2_i64), &bson!(3)), Ordering::Less);
        assert_eq!(cmp_bson(&bson!(2.5), &bson!(2)), Ordering::Greater);
    }

    #[test]
    fn brackets_separate_types() {
        assert_eq!(cmp_bson(&bson!(42), &bson!("42")), Ordering::Less);
        assert_eq!(cmp_bson(&bson!("x"), &Bson::Null), Ordering::Greater);
        assert_eq!(cmp_bson(&bson!(true), &bson!("true")), Ordering::Greater);
    }

    #[test]
    fn null_equals_null() {
        assert!(values_equal(&Bson::Null, &Bson::Null));
    }

    #[test]
    fn arrays_compare_elementwise() {
        assert_eq!(cmp_bson(&bson!([1, 2]), &bson!([1, 3])), Ordering::Less);
        assert_eq!(cmp_bson(&bson!([1, 2]), &bson!([1])), Ordering::Greater);
    }

    #[test]
    fn ordered_bson_sorts_mixed_values() {
        let mut values = vec![
            OrderedBson(bson!("b")),
            OrderedBson(bson!(10)),
            OrderedBson(Bson::Null),
            OrderedBson(bson!("a")),
            OrderedBson(bson!(2.5)),
        ];
        values.sort();
        let sorted: Vec<Bson> = values.into_iter().map(|v| v.0).collect();
        assert_eq!(
            sorted,
            vec![Bson::Null, bson!(2.5), bson!(10), bson!("a"), bson!("b")]
        );
    }
}
