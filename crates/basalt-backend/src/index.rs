use bson::Document;
use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// One component of an index key: a field path and a direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexKey {
    pub field: String,
    pub ascending: bool,
}

impl IndexKey {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: true,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: false,
        }
    }

    pub fn direction(&self) -> i32 {
        if self.ascending { 1 } else { -1 }
    }
}

/// The conventional index name for an ordered key list: `_id_` for the
/// identifier index, `field_1_other_-1` otherwise.
pub fn index_name(keys: &[IndexKey]) -> String {
    if let [key] = keys {
        if key.field == "_id" {
            return "_id_".to_string();
        }
    }
    let parts: Vec<String> = keys
        .iter()
        .map(|k| format!("{}_{}", k.field, k.direction()))
        .collect();
    parts.join("_")
}

/// The `key` document of an index description: `{field: ±1, ...}`.
pub fn index_key_document(keys: &[IndexKey]) -> Document {
    let mut key = Document::new();
    for k in keys {
        key.insert(k.field.clone(), k.direction());
    }
    key
}

/// An index maintained alongside a collection. Creation goes through
/// [`Backend::open_or_create_unique_index`](crate::Backend); the collection
/// drives the mutation hooks on every write.
pub trait Index: Send + Sync {
    fn name(&self) -> String;
    fn keys(&self) -> Vec<IndexKey>;
    fn is_unique(&self) -> bool;

    /// Fail if adding this document would violate the index constraint.
    fn check_add(&self, doc: &Document) -> Result<(), ServerError>;
    fn add(&self, doc: &Document, position: u64);
    /// Fail if replacing `old` with `new` would violate the constraint.
    fn check_update(&self, old: &Document, new: &Document) -> Result<(), ServerError>;
    fn update(&self, old: &Document, new: &Document, position: u64);
    fn remove(&self, doc: &Document) -> Option<u64>;

    fn size_bytes(&self) -> u64;
}
