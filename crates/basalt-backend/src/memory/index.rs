use std::collections::BTreeMap;

use basalt_query::{OrderedBson, get_path};
use bson::{Bson, Document};
use parking_lot::RwLock;

use crate::error::{ServerError, duplicate_key};
use crate::index::{Index, IndexKey, index_name};

struct Entries {
    map: BTreeMap<Vec<OrderedBson>, u64>,
    bytes: u64,
}

/// Unique index over an ordered key list. Documents missing every key field
/// are not indexed.
pub struct MemoryUniqueIndex {
    ns: String,
    name: String,
    keys: Vec<IndexKey>,
    entries: RwLock<Entries>,
}

impl MemoryUniqueIndex {
    pub fn new(ns: String, keys: Vec<IndexKey>) -> Self {
        Self {
            ns,
            name: index_name(&keys),
            keys,
            entries: RwLock::new(Entries {
                map: BTreeMap::new(),
                bytes: 0,
            }),
        }
    }

    fn key_of(&self, doc: &Document) -> Option<Vec<OrderedBson>> {
        let mut key = Vec::with_capacity(self.keys.len());
        for index_key in &self.keys {
            key.push(OrderedBson(get_path(doc, &index_key.field)?.clone()));
        }
        Some(key)
    }

    fn key_bytes(key: &[OrderedBson]) -> u64 {
        let mut probe = Document::new();
        for (i, value) in key.iter().enumerate() {
            probe.insert(i.to_string(), value.0.clone());
        }
        bson::to_vec(&probe).map(|b| b.len() as u64).unwrap_or(0)
    }
}

impl Index for MemoryUniqueIndex {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn keys(&self) -> Vec<IndexKey> {
        self.keys.clone()
    }

    fn is_unique(&self) -> bool {
        true
    }

    fn check_add(&self, doc: &Document) -> Result<(), ServerError> {
        if let Some(key) = self.key_of(doc) {
            if self.entries.read().map.contains_key(&key) {
                let values: Vec<Bson> = key.into_iter().map(|v| v.0).collect();
                return Err(duplicate_key(&self.ns, &self.name, &values));
            }
        }
        Ok(())
    }

    fn add(&self, doc: &Document, position: u64) {
        if let Some(key) = self.key_of(doc) {
            let mut entries = self.entries.write();
            entries.bytes += Self::key_bytes(&key);
            entries.map.insert(key, position);
        }
    }

    fn check_update(&self, old: &Document, new: &Document) -> Result<(), ServerError> {
        let old_key = self.key_of(old);
        let new_key = self.key_of(new);
        if new_key == old_key {
            return Ok(());
        }
        if let Some(key) = new_key {
            if self.entries.read().map.contains_key(&key) {
                let values: Vec<Bson> = key.into_iter().map(|v| v.0).collect();
                return Err(duplicate_key(&self.ns, &self.name, &values));
            }
        }
        Ok(())
    }

    fn update(&self, old: &Document, new: &Document, position: u64) {
        let old_key = self.key_of(old);
        let new_key = self.key_of(new);
        if old_key == new_key {
            return;
        }
        let mut entries = self.entries.write();
        if let Some(key) = old_key {
            if entries.map.remove(&key).is_some() {
                entries.bytes = entries.bytes.saturating_sub(Self::key_bytes(&key));
            }
        }
        if let Some(key) = new_key {
            entries.bytes += Self::key_bytes(&key);
            entries.map.insert(key, position);
        }
    }

    fn remove(&self, doc: &Document) -> Option<u64> {
        let key = self.key_of(doc)?;
        let mut entries = self.entries.write();
        let position = entries.map.remove(&key)?;
        entries.bytes = entries.bytes.saturating_sub(Self::key_bytes(&key));
        Some(position)
    }

    fn size_bytes(&self) -> u64 {
        self.entries.read().bytes
    }
}
