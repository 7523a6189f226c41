use bson::{Bson, Document};

/// Walk a dotted path through nested documents. Numeric segments index into
/// arrays. Returns the single value at the path, if any.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut current: Option<&Bson> = None;
    let mut container: &Document = doc;
    for (i, segment) in path.split('.').enumerate() {
        if i > 0 {
            match current {
                Some(Bson::Document(sub)) => container = sub,
                Some(Bson::Array(arr)) => {
                    let index: usize = segment.parse().ok()?;
                    current = arr.get(index);
                    continue;
                }
                _ => return None,
            }
        }
        current = container.get(segment);
        current?;
    }
    current
}

/// Collect every value reachable at a dotted path, fanning out through
/// arrays of sub-documents the way query matching does. For
/// `{a: [{b: 1}, {b: 2}]}` and path `a.b`, yields both `1` and `2`.
pub fn values_at_path<'a>(doc: &'a Document, path: &str, out: &mut Vec<&'a Bson>) {
    fn walk<'a>(value: &'a Bson, segments: &[&str], out: &mut Vec<&'a Bson>) {
        let Some((head, rest)) = segments.split_first() else {
            out.push(value);
            return;
        };
        match value {
            Bson::Document(sub) => {
                if let Some(next) = sub.get(*head) {
                    walk(next, rest, out);
                }
            }
            Bson::Array(arr) => {
                if let Ok(index) = head.parse::<usize>() {
                    if let Some(next) = arr.get(index) {
                        walk(next, rest, out);
                    }
                    return;
                }
                for element in arr {
                    if let Bson::Document(sub) = element {
                        if let Some(next) = sub.get(*head) {
                            walk(next, rest, out);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    let segments: Vec<&str> = path.split('.').collect();
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if let Some(value) = doc.get(*head) {
        walk(value, rest, out);
    }
}

/// Set the value at a dotted path, creating intermediate sub-documents.
pub fn set_path(doc: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            if !matches!(doc.get(head), Some(Bson::Document(_))) {
                doc.insert(head.to_string(), Bson::Document(Document::new()));
            }
            if let Some(Bson::Document(sub)) = doc.get_mut(head) {
                set_path(sub, rest, value);
            }
        }
    }
}

/// Remove the value at a dotted path. Missing intermediates are a no-op.
pub fn remove_path(doc: &mut Document, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        None => doc.remove(path),
        Some((head, rest)) => match doc.get_mut(head) {
            Some(Bson::Document(sub)) => remove_path(sub, rest),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use bson::{bson, doc};

    use super::*;

    #[test]
    fn get_flat_and_nested() {
        let d = doc! { "a": 1, "b": { "c": { "d": "deep" } } };
        assert_eq!(get_path(&d, "a"), Some(&bson!(1)));
        assert_eq!(get_path(&d, "b.c.d"), Some(&bson!("deep")));
        assert_eq!(get_path(&d, "b.x"), None);
    }

    #[test]
    fn get_array_by_index() {
        let d = doc! { "a": [10, 20, 30] };
        assert_eq!(get_path(&d, "a.1"), Some(&bson!(20)));
        assert_eq!(get_path(&d, "a.9"), None);
    }

    #[test]
    fn values_fan_out_through_arrays() {
        let d = doc! { "a": [{ "b": 1 }, { "b": 2 }, { "c": 3 }] };
        let mut out = Vec::new();
        values_at_path(&d, "a.b", &mut out);
        assert_eq!(out, vec![&bson!(1), &bson!(2)]);
    }

    #[test]
    fn set_creates_intermediates() {
        let mut d = doc! {};
        set_path(&mut d, "a.b.c", bson!(5));
        assert_eq!(d, doc! { "a": { "b": { "c": 5 } } });
    }

    #[test]
    fn set_overwrites_non_document_intermediate() {
        let mut d = doc! { "a": 1 };
        set_path(&mut d, "a.b", bson!(2));
        assert_eq!(d, doc! { "a": { "b": 2 } });
    }

    #[test]
    fn remove_nested() {
        let mut d = doc! { "a": { "b": 1, "c": 2 } };
        assert_eq!(remove_path(&mut d, "a.b"), Some(bson!(1)));
        assert_eq!(d, doc! { "a": { "c": 2 } });
        assert_eq!(remove_path(&mut d, "a.x.y"), None);
    }
}
