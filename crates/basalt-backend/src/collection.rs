use std::sync::Arc;

use bson::{Bson, Document};

use crate::error::ServerError;
use crate::index::Index;

/// A finite, non-restartable sequence of documents.
pub type DocumentStream = Box<dyn Iterator<Item = Document> + Send>;

/// Result of a batched update call.
#[derive(Debug, Clone, Default)]
pub struct UpdateOutcome {
    /// Documents matched (or created by an upsert).
    pub n: i64,
    /// Documents actually changed.
    pub n_modified: i64,
    /// `_id` of the document an upsert inserted.
    pub upserted_id: Option<Bson>,
}

#[derive(Debug, Clone, Default)]
pub struct CollectionStats {
    pub count: u64,
    /// Total serialized size of the stored documents, in bytes.
    pub size: u64,
    /// Per-index size in bytes, keyed by index name.
    pub index_sizes: Vec<(String, u64)>,
}

impl CollectionStats {
    pub fn total_index_size(&self) -> u64 {
        self.index_sizes.iter().map(|(_, bytes)| bytes).sum()
    }
}

/// A named container of documents. The database core routes every data-plane
/// command through this contract and stays ignorant of the storage layout.
pub trait Collection: Send + Sync {
    fn database_name(&self) -> String;
    fn collection_name(&self) -> String;

    fn full_name(&self) -> String {
        format!("{}.{}", self.database_name(), self.collection_name())
    }

    /// Insert a batch, returning how many documents were stored.
    fn insert(&self, documents: Vec<Document>) -> Result<usize, ServerError>;

    fn update_documents(
        &self,
        selector: &Document,
        update: &Document,
        multi: bool,
        upsert: bool,
    ) -> Result<UpdateOutcome, ServerError>;

    /// Delete matching documents. A limit of zero or less deletes them all.
    fn delete_documents(&self, selector: &Document, limit: i64) -> Result<usize, ServerError>;

    /// Run a query. The query document is either a plain filter or the
    /// legacy `{$query, $orderby}` envelope.
    fn handle_query(
        &self,
        query: &Document,
        skip: i64,
        limit: i64,
        projection: Option<&Document>,
    ) -> Result<DocumentStream, ServerError>;

    /// Full scan in storage order.
    fn query_all(&self) -> DocumentStream;

    fn count_all(&self) -> u64;

    fn count(&self, query: &Document, skip: i64, limit: i64) -> Result<u64, ServerError>;

    /// `distinct` parameters: `{key, query?}`. Returns `{values: [...]}`.
    fn handle_distinct(&self, params: &Document) -> Result<Document, ServerError>;

    /// `findAndModify` parameters as sent by the client. Returns
    /// `{lastErrorObject, value}`.
    fn find_and_modify(&self, params: &Document) -> Result<Document, ServerError>;

    fn add_index(&self, index: Arc<dyn Index>) -> Result<(), ServerError>;

    fn num_indexes(&self) -> usize;

    fn stats(&self) -> CollectionStats;

    fn validate(&self) -> Result<Document, ServerError>;

    /// Rebind this collection to a new database and name.
    fn rename_to(&self, database: &str, collection: &str);

    fn is_empty(&self) -> bool {
        self.count_all() == 0
    }
}
