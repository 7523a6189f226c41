mod common;
use common::*;

use bson::doc;

#[test]
fn find_on_missing_collection_returns_an_empty_batch() {
    let db = test_db();
    let response = db
        .handle_command(CHANNEL, "find", &doc! { "find": "nope" })
        .unwrap();
    assert_eq!(
        response,
        doc! { "cursor": { "id": 0_i64, "ns": "testdb.nope", "firstBatch": [] }, "ok": 1 }
    );
}

#[test]
fn cursor_ids_are_always_zero() {
    let db = test_db();
    insert(&db, "c", vec![doc! { "_id": 1 }]);
    let response = db
        .handle_command(CHANNEL, "find", &doc! { "find": "c" })
        .unwrap();
    let cursor = response.get_document("cursor").unwrap();
    assert_eq!(cursor.get_i64("id").unwrap(), 0);
    assert_eq!(cursor.get_str("ns").unwrap(), "testdb.c");
}

#[test]
fn filter_sort_skip_limit_projection() {
    let db = test_db();
    insert(
        &db,
        "accounts",
        vec![
            doc! { "_id": 1, "name": "Acme", "revenue": 50000.0, "active": true },
            doc! { "_id": 2, "name": "Globex", "revenue": 80000.0, "active": true },
            doc! { "_id": 3, "name": "Initech", "revenue": 12000.0, "active": false },
            doc! { "_id": 4, "name": "Umbrella", "revenue": 95000.0, "active": true },
        ],
    );

    let response = db
        .handle_command(
            CHANNEL,
            "find",
            &doc! {
                "find": "accounts",
                "filter": { "active": true },
                "sort": { "revenue": -1 },
                "skip": 1,
                "limit": 2,
                "projection": { "name": 1, "_id": 0 },
            },
        )
        .unwrap();
    assert_eq!(
        first_batch(&response),
        vec![doc! { "name": "Globex" }, doc! { "name": "Acme" }]
    );
}

#[test]
fn operator_filters_work_through_the_command() {
    let db = test_db();
    insert(
        &db,
        "c",
        vec![
            doc! { "_id": 1, "n": 5 },
            doc! { "_id": 2, "n": 15 },
            doc! { "_id": 3, "n": 25 },
        ],
    );

    let response = db
        .handle_command(
            CHANNEL,
            "find",
            &doc! { "find": "c", "filter": { "n": { "$gt": 5, "$lt": 25 } } },
        )
        .unwrap();
    assert_eq!(first_batch(&response), vec![doc! { "_id": 2, "n": 15 }]);
}

#[test]
fn command_names_match_case_insensitively() {
    let db = test_db();
    insert(&db, "c", vec![doc! { "_id": 1 }]);
    let response = db
        .handle_command(CHANNEL, "FIND", &doc! { "FIND": "c" })
        .unwrap();
    assert_eq!(first_batch(&response).len(), 1);
}

#[test]
fn unknown_commands_fail_with_command_not_found() {
    let db = test_db();
    let err = db
        .handle_command(CHANNEL, "frobnicate", &doc! { "frobnicate": 1 })
        .unwrap_err();
    assert_eq!(err.code(), Some(59));
    assert_eq!(err.message(), "no such cmd: frobnicate");
    let response = err.to_response();
    assert_eq!(response.get_i32("ok").unwrap(), 0);
    assert_eq!(response.get_str("codeName").unwrap(), "CommandNotFound");
}

#[test]
fn legacy_query_path_reads_the_envelope() {
    let db = test_db();
    insert(
        &db,
        "c",
        vec![doc! { "_id": 1, "n": 2 }, doc! { "_id": 2, "n": 1 }],
    );

    let docs: Vec<_> = db
        .handle_query(
            "c",
            &doc! { "$query": {}, "$orderby": { "n": 1 } },
            0,
            0,
            None,
        )
        .unwrap()
        .collect();
    assert_eq!(
        docs,
        vec![doc! { "_id": 2, "n": 1 }, doc! { "_id": 1, "n": 2 }]
    );

    let empty: Vec<_> = db.handle_query("nope", &doc! {}, 0, 0, None).unwrap().collect();
    assert!(empty.is_empty());
}
