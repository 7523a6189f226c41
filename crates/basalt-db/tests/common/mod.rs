use std::sync::Arc;

use basalt_backend::MemoryBackend;
use basalt_db::{ChannelId, Database};
use bson::{Bson, Document, doc};

pub const CHANNEL: ChannelId = 1;

pub fn test_db() -> Database {
    Database::open("testdb", Arc::new(MemoryBackend::new())).unwrap()
}

/// Run an insert command and return its response.
pub fn insert(db: &Database, collection: &str, docs: Vec<Document>) -> Document {
    let documents: Vec<Bson> = docs.into_iter().map(Bson::Document).collect();
    db.handle_command(
        CHANNEL,
        "insert",
        &doc! { "insert": collection, "documents": documents },
    )
    .unwrap()
}

/// Extract the firstBatch of a cursor response.
pub fn first_batch(response: &Document) -> Vec<Document> {
    response
        .get_document("cursor")
        .unwrap()
        .get_array("firstBatch")
        .unwrap()
        .iter()
        .map(|b| b.as_document().unwrap().clone())
        .collect()
}

/// Run a find command and return the batch.
pub fn find_all(db: &Database, collection: &str) -> Vec<Document> {
    let response = db
        .handle_command(CHANNEL, "find", &doc! { "find": collection })
        .unwrap();
    first_batch(&response)
}

/// Collection names currently enumerated by listCollections.
pub fn collection_names(db: &Database) -> Vec<String> {
    let response = db
        .handle_command(CHANNEL, "listCollections", &doc! { "listCollections": 1 })
        .unwrap();
    first_batch(&response)
        .iter()
        .map(|d| d.get_str("name").unwrap().to_string())
        .collect()
}
