use std::sync::Arc;

use crate::collection::Collection;
use crate::error::ServerError;
use crate::index::{Index, IndexKey};

/// The persistence binding a database core runs against. Implementations
/// own collection storage; the core owns naming, routing, and metadata.
pub trait Backend: Send + Sync {
    /// Open a collection, creating it if the backend has no storage for it
    /// yet. `id_field` names the identifier field of newly created storage
    /// (`_id` for user collections, `name` for `system.namespaces`).
    fn open_collection(
        &self,
        database: &str,
        collection: &str,
        id_field: Option<&str>,
    ) -> Arc<dyn Collection>;

    /// Open a unique index over the given ordered keys.
    fn open_or_create_unique_index(
        &self,
        database: &str,
        collection: &str,
        keys: &[IndexKey],
    ) -> Arc<dyn Index>;

    /// Forget a collection's storage. A backend that keeps storage across
    /// database instances must drop it here, or a later create under the
    /// same name would resurrect old documents.
    fn drop_collection(&self, database: &str, collection: &str);

    fn drop_database(&self, database: &str) -> Result<(), ServerError>;

    /// On-disk footprint reported by `dbstats`; zero for memory backends.
    fn file_size(&self, database: &str) -> u64 {
        let _ = database;
        0
    }
}
