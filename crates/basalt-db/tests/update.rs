mod common;
use common::*;

use bson::doc;

#[test]
fn upsert_reports_index_and_id() {
    let db = test_db();
    let response = db
        .handle_command(
            CHANNEL,
            "update",
            &doc! {
                "update": "c",
                "updates": [{ "q": { "_id": 2 }, "u": { "$set": { "a": "y" } }, "upsert": true }],
            },
        )
        .unwrap();
    assert_eq!(
        response,
        doc! {
            "n": 1,
            "nModified": 0,
            "upserted": [{ "index": 0, "_id": 2 }],
            "ok": 1,
        }
    );
    assert_eq!(find_all(&db, "c"), vec![doc! { "_id": 2, "a": "y" }]);
}

#[test]
fn update_aggregates_across_entries() {
    let db = test_db();
    insert(
        &db,
        "c",
        vec![
            doc! { "_id": 1, "k": "a", "n": 0 },
            doc! { "_id": 2, "k": "a", "n": 0 },
            doc! { "_id": 3, "k": "b", "n": 0 },
        ],
    );

    let response = db
        .handle_command(
            CHANNEL,
            "update",
            &doc! {
                "update": "c",
                "updates": [
                    { "q": { "k": "a" }, "u": { "$inc": { "n": 1 } }, "multi": true },
                    { "q": { "k": "b" }, "u": { "$set": { "n": 0 } } },
                ],
            },
        )
        .unwrap();
    // Three matched, but the no-op $set does not count as modified.
    assert_eq!(response.get_i32("n").unwrap(), 3);
    assert_eq!(response.get_i32("nModified").unwrap(), 2);
}

#[test]
fn update_without_multi_touches_one_document() {
    let db = test_db();
    insert(&db, "c", vec![doc! { "_id": 1, "s": 0 }, doc! { "_id": 2, "s": 0 }]);

    let response = db
        .handle_command(
            CHANNEL,
            "update",
            &doc! {
                "update": "c",
                "updates": [{ "q": {}, "u": { "$set": { "s": 1 } } }],
            },
        )
        .unwrap();
    assert_eq!(response.get_i32("n").unwrap(), 1);
    assert_eq!(response.get_i32("nModified").unwrap(), 1);
}

#[test]
fn replacement_update_keeps_the_id() {
    let db = test_db();
    insert(&db, "c", vec![doc! { "_id": 1, "a": 1 }]);

    db.handle_command(
        CHANNEL,
        "update",
        &doc! {
            "update": "c",
            "updates": [{ "q": { "_id": 1 }, "u": { "b": 2 } }],
        },
    )
    .unwrap();
    assert_eq!(find_all(&db, "c"), vec![doc! { "_id": 1, "b": 2 }]);
}

#[test]
fn updating_a_system_collection_fails() {
    let db = test_db();
    let err = db
        .handle_command(
            CHANNEL,
            "update",
            &doc! {
                "update": "system.namespaces",
                "updates": [{ "q": {}, "u": { "$set": { "name": "x" } } }],
            },
        )
        .unwrap_err();
    assert_eq!(err.code(), Some(10156));
    assert!(err.message().contains("cannot update system collection"));
}

#[test]
fn update_implicitly_creates_the_collection() {
    let db = test_db();
    db.handle_command(
        CHANNEL,
        "update",
        &doc! {
            "update": "fresh",
            "updates": [{ "q": { "_id": 1 }, "u": { "$set": { "a": 1 } } }],
        },
    )
    .unwrap();
    assert!(collection_names(&db).contains(&"fresh".to_string()));
}

#[test]
fn find_and_modify_returns_the_new_document() {
    let db = test_db();
    insert(&db, "c", vec![doc! { "_id": 1, "n": 1 }]);

    let response = db
        .handle_command(
            CHANNEL,
            "findAndModify",
            &doc! {
                "findAndModify": "c",
                "query": { "_id": 1 },
                "update": { "$inc": { "n": 1 } },
                "new": true,
            },
        )
        .unwrap();
    assert_eq!(
        response.get_document("value").unwrap(),
        &doc! { "_id": 1, "n": 2 }
    );
    assert_eq!(response.get_i32("ok").unwrap(), 1);
}
