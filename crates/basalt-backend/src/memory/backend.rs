use std::sync::Arc;

use crate::backend::Backend;
use crate::collection::Collection;
use crate::error::ServerError;
use crate::index::{Index, IndexKey};

use super::Registry;
use super::collection::MemoryCollection;
use super::index::MemoryUniqueIndex;

/// Heap-backed storage. Collections survive across `Database` instances
/// opened over the same backend, which is what makes catalog bootstrap
/// observable without a disk.
pub struct MemoryBackend {
    registry: Arc<Registry>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self {
            registry: Arc::new(Registry::new()),
        }
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryBackend {
    fn open_collection(
        &self,
        database: &str,
        collection: &str,
        id_field: Option<&str>,
    ) -> Arc<dyn Collection> {
        let key = format!("{database}.{collection}");
        let entry = self.registry.entry(key).or_insert_with(|| {
            Arc::new(MemoryCollection::new(
                Arc::clone(&self.registry),
                database,
                collection,
                id_field,
            ))
        });
        let collection: Arc<MemoryCollection> = Arc::clone(entry.value());
        collection
    }

    fn open_or_create_unique_index(
        &self,
        database: &str,
        collection: &str,
        keys: &[IndexKey],
    ) -> Arc<dyn Index> {
        Arc::new(MemoryUniqueIndex::new(
            format!("{database}.{collection}"),
            keys.to_vec(),
        ))
    }

    fn drop_collection(&self, database: &str, collection: &str) {
        self.registry.remove(&format!("{database}.{collection}"));
    }

    fn drop_database(&self, database: &str) -> Result<(), ServerError> {
        let prefix = format!("{database}.");
        self.registry.retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }
}
