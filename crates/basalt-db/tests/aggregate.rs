mod common;
use common::*;

use bson::doc;

#[test]
fn count_pipeline_over_matched_documents() {
    let db = test_db();
    insert(&db, "c", vec![doc! { "_id": 1, "a": "x" }]);

    let response = db
        .handle_command(
            CHANNEL,
            "aggregate",
            &doc! {
                "aggregate": "c",
                "pipeline": [{ "$match": { "a": "x" } }, { "$count": "total" }],
                "cursor": {},
            },
        )
        .unwrap();
    assert_eq!(first_batch(&response), vec![doc! { "total": 1 }]);
}

#[test]
fn missing_cursor_option_fails_with_code_9() {
    let db = test_db();
    let err = db
        .handle_command(
            CHANNEL,
            "aggregate",
            &doc! { "aggregate": "c", "pipeline": [] },
        )
        .unwrap_err();
    assert_eq!(err.code(), Some(9));
    assert!(err.message().contains("'cursor' option is required"));
}

#[test]
fn non_empty_cursor_is_rejected() {
    let db = test_db();
    let err = db
        .handle_command(
            CHANNEL,
            "aggregate",
            &doc! { "aggregate": "c", "pipeline": [], "cursor": { "batchSize": 10 } },
        )
        .unwrap_err();
    assert_eq!(err.message(), "Non-empty cursor is not yet implemented");
    assert_eq!(err.code(), None);
}

#[test]
fn stage_documents_must_have_exactly_one_key() {
    let db = test_db();
    let err = db
        .handle_command(
            CHANNEL,
            "aggregate",
            &doc! {
                "aggregate": "c",
                "pipeline": [{ "$match": {}, "$limit": 1 }],
                "cursor": {},
            },
        )
        .unwrap_err();
    assert_eq!(err.code(), Some(40323));
}

#[test]
fn unknown_stages_fail_with_code_40324() {
    let db = test_db();
    let err = db
        .handle_command(
            CHANNEL,
            "aggregate",
            &doc! {
                "aggregate": "c",
                "pipeline": [{ "$frobnicate": 1 }],
                "cursor": {},
            },
        )
        .unwrap_err();
    assert_eq!(err.code(), Some(40324));
    assert!(err.message().contains("$frobnicate"));
}

#[test]
fn aggregate_on_missing_collection_yields_an_empty_batch() {
    let db = test_db();
    let response = db
        .handle_command(
            CHANNEL,
            "aggregate",
            &doc! { "aggregate": "nope", "pipeline": [{ "$match": {} }], "cursor": {} },
        )
        .unwrap();
    assert!(first_batch(&response).is_empty());
    assert_eq!(
        response
            .get_document("cursor")
            .unwrap()
            .get_str("ns")
            .unwrap(),
        "testdb.nope"
    );
}

#[test]
fn stages_execute_in_order() {
    let db = test_db();
    insert(
        &db,
        "sales",
        vec![
            doc! { "_id": 1, "region": "east", "amount": 10 },
            doc! { "_id": 2, "region": "west", "amount": 5 },
            doc! { "_id": 3, "region": "east", "amount": 20 },
            doc! { "_id": 4, "region": "west", "amount": 50 },
            doc! { "_id": 5, "region": "east", "amount": 1 },
        ],
    );

    let response = db
        .handle_command(
            CHANNEL,
            "aggregate",
            &doc! {
                "aggregate": "sales",
                "pipeline": [
                    { "$match": { "amount": { "$gte": 5 } } },
                    { "$group": { "_id": "$region", "total": { "$sum": "$amount" } } },
                    { "$sort": { "total": -1 } },
                ],
                "cursor": {},
            },
        )
        .unwrap();
    assert_eq!(
        first_batch(&response),
        vec![
            doc! { "_id": "west", "total": 55 },
            doc! { "_id": "east", "total": 30 },
        ]
    );
}

#[test]
fn unwind_and_add_fields() {
    let db = test_db();
    insert(
        &db,
        "c",
        vec![doc! { "_id": 1, "tags": ["a", "b"] }, doc! { "_id": 2 }],
    );

    let response = db
        .handle_command(
            CHANNEL,
            "aggregate",
            &doc! {
                "aggregate": "c",
                "pipeline": [
                    { "$unwind": "$tags" },
                    { "$addFields": { "tag": "$tags", "kind": "label" } },
                    { "$project": { "_id": 0, "tag": 1, "kind": 1 } },
                ],
                "cursor": {},
            },
        )
        .unwrap();
    assert_eq!(
        first_batch(&response),
        vec![
            doc! { "tag": "a", "kind": "label" },
            doc! { "tag": "b", "kind": "label" },
        ]
    );
}

#[test]
fn skip_and_limit_stages() {
    let db = test_db();
    insert(
        &db,
        "c",
        vec![doc! { "_id": 1 }, doc! { "_id": 2 }, doc! { "_id": 3 }, doc! { "_id": 4 }],
    );

    let response = db
        .handle_command(
            CHANNEL,
            "aggregate",
            &doc! {
                "aggregate": "c",
                "pipeline": [{ "$sort": { "_id": 1 } }, { "$skip": 1 }, { "$limit": 2 }],
                "cursor": {},
            },
        )
        .unwrap();
    assert_eq!(
        first_batch(&response),
        vec![doc! { "_id": 2 }, doc! { "_id": 3 }]
    );
}

#[test]
fn count_over_no_matches_yields_no_rows() {
    let db = test_db();
    insert(&db, "c", vec![doc! { "_id": 1, "a": "x" }]);

    let response = db
        .handle_command(
            CHANNEL,
            "aggregate",
            &doc! {
                "aggregate": "c",
                "pipeline": [{ "$match": { "a": "nope" } }, { "$count": "total" }],
                "cursor": {},
            },
        )
        .unwrap();
    assert!(first_batch(&response).is_empty());
}
