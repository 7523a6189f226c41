use bson::{Bson, Document};

use crate::error::QueryError;
use crate::path::{get_path, remove_path, set_path};

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        _ => true,
    }
}

/// Apply a projection document. Inclusion and exclusion modes may not be
/// mixed, except that `_id` can always be suppressed.
pub fn project(doc: &Document, projection: &Document) -> Result<Document, QueryError> {
    if projection.is_empty() {
        return Ok(doc.clone());
    }

    let include = projection
        .iter()
        .filter(|(path, _)| path.as_str() != "_id")
        .map(|(_, value)| truthy(value))
        .next();

    match include {
        // Only `_id` listed: its flag decides the mode.
        None => {
            let keep_id = projection.get("_id").map(truthy).unwrap_or(true);
            if keep_id {
                Ok(doc.clone())
            } else {
                let mut projected = doc.clone();
                projected.remove("_id");
                Ok(projected)
            }
        }
        Some(true) => {
            let mut projected = Document::new();
            let keep_id = projection.get("_id").map(truthy).unwrap_or(true);
            if keep_id {
                if let Some(id) = doc.get("_id") {
                    projected.insert("_id", id.clone());
                }
            }
            for (path, value) in projection {
                if path == "_id" {
                    continue;
                }
                if !truthy(value) {
                    return Err(QueryError::BadValue(
                        "cannot mix including and excluding fields".into(),
                    ));
                }
                if let Some(found) = get_path(doc, path) {
                    set_path(&mut projected, path, found.clone());
                }
            }
            Ok(projected)
        }
        Some(false) => {
            let mut projected = doc.clone();
            for (path, value) in projection {
                if path == "_id" {
                    if !truthy(value) {
                        projected.remove("_id");
                    }
                    continue;
                }
                if truthy(value) {
                    return Err(QueryError::BadValue(
                        "cannot mix including and excluding fields".into(),
                    ));
                }
                remove_path(&mut projected, path);
            }
            Ok(projected)
        }
    }
}
