mod common;
use common::*;

use std::sync::Arc;

use basalt_backend::{Backend, MemoryBackend};
use basalt_db::Database;
use bson::doc;

fn shared_backend() -> Arc<MemoryBackend> {
    Arc::new(MemoryBackend::new())
}

fn open(backend: &Arc<MemoryBackend>) -> Database {
    let backend: Arc<dyn Backend> = backend.clone();
    Database::open("testdb", backend).unwrap()
}

#[test]
fn a_fresh_database_starts_empty() {
    let db = open(&shared_backend());
    assert!(collection_names(&db).is_empty());
}

#[test]
fn reopening_rehydrates_the_collection_map() {
    let backend = shared_backend();
    {
        let db = open(&backend);
        insert(&db, "a", vec![doc! { "_id": 1, "x": "one" }]);
        insert(&db, "b", vec![doc! { "_id": 2 }]);
    }

    let db = open(&backend);
    let names = collection_names(&db);
    assert!(names.contains(&"a".to_string()));
    assert!(names.contains(&"b".to_string()));
    assert_eq!(find_all(&db, "a"), vec![doc! { "_id": 1, "x": "one" }]);
}

#[test]
fn reopening_replays_unique_indexes() {
    let backend = shared_backend();
    {
        let db = open(&backend);
        insert(&db, "c", vec![doc! { "_id": 1, "email": "a@x" }]);
        db.handle_command(
            CHANNEL,
            "createIndexes",
            &doc! {
                "createIndexes": "c",
                "indexes": [
                    { "name": "email_1", "ns": "testdb.c", "key": { "email": 1 }, "unique": true },
                ],
            },
        )
        .unwrap();
    }

    let db = open(&backend);

    // Both the _id_ index and the unique email index are enforced again.
    let dup_id = insert(&db, "c", vec![doc! { "_id": 1, "email": "z@x" }]);
    assert!(dup_id.get_array("writeErrors").is_ok());

    let dup_email = insert(&db, "c", vec![doc! { "_id": 9, "email": "a@x" }]);
    let errors = dup_email.get_array("writeErrors").unwrap();
    assert_eq!(
        errors[0].as_document().unwrap().get_i32("code").unwrap(),
        11000
    );
}

#[test]
fn reopening_skips_non_unique_index_descriptions() {
    let backend = shared_backend();
    {
        let db = open(&backend);
        insert(&db, "c", vec![doc! { "_id": 1, "k": 1 }]);
        db.handle_command(
            CHANNEL,
            "createIndexes",
            &doc! {
                "createIndexes": "c",
                "indexes": [{ "name": "k_1", "ns": "testdb.c", "key": { "k": 1 } }],
            },
        )
        .unwrap();
    }

    let db = open(&backend);

    // Still recorded…
    let indexes = db
        .handle_command(CHANNEL, "listIndexes", &doc! { "listIndexes": "c" })
        .unwrap();
    assert!(
        first_batch(&indexes)
            .iter()
            .any(|d| d.get_str("name").unwrap() == "k_1")
    );
    // …still unenforced.
    let response = insert(&db, "c", vec![doc! { "_id": 2, "k": 1 }]);
    assert_eq!(response, doc! { "n": 1, "ok": 1 });
}

#[test]
fn dropped_collections_stay_dropped_across_reopen() {
    let backend = shared_backend();
    {
        let db = open(&backend);
        insert(&db, "keep", vec![doc! { "_id": 1 }]);
        insert(&db, "gone", vec![doc! { "_id": 1 }]);
        db.handle_command(CHANNEL, "drop", &doc! { "drop": "gone" })
            .unwrap();
    }

    let db = open(&backend);
    let names = collection_names(&db);
    assert!(names.contains(&"keep".to_string()));
    assert!(!names.contains(&"gone".to_string()));
}

#[test]
fn id_index_direction_is_replayed() {
    let backend = shared_backend();
    {
        let db = open(&backend);
        db.handle_command(CHANNEL, "create", &doc! { "create": "c" })
            .unwrap();
        // A descending _id description still opens an identifier index.
        db.handle_command(
            CHANNEL,
            "createIndexes",
            &doc! {
                "createIndexes": "c",
                "indexes": [{ "name": "_id_", "ns": "testdb.c", "key": { "_id": -1 } }],
            },
        )
        .unwrap();
    }

    let db = open(&backend);
    insert(&db, "c", vec![doc! { "_id": 1 }]);
    let dup = insert(&db, "c", vec![doc! { "_id": 1 }]);
    assert!(dup.get_array("writeErrors").is_ok());
}
