use std::sync::Arc;

use basalt_backend::{Collection, ServerError};
use basalt_query::aggregate::Stage;
use bson::{Bson, Document, doc};

use crate::database::cursor_response;

/// Run an `aggregate` command: validate the cursor argument, plan the
/// pipeline, and fold the stages over the collection's full scan.
pub(crate) fn handle_aggregate(
    database: &str,
    collection_name: &str,
    collection: Option<Arc<dyn Collection>>,
    params: &Document,
) -> Result<Document, ServerError> {
    match params.get("cursor") {
        None => {
            return Err(ServerError::named(
                9,
                "FailedToParse",
                "The 'cursor' option is required, except for aggregate with the explain argument",
            ));
        }
        Some(Bson::Document(cursor)) if cursor.is_empty() => {}
        Some(_) => {
            return Err(ServerError::failed("Non-empty cursor is not yet implemented"));
        }
    }

    let pipeline = params.get_array("pipeline").map_err(|_| {
        ServerError::named(
            14,
            "TypeMismatch",
            "'pipeline' option must be specified as an array",
        )
    })?;
    let stages = parse_pipeline(pipeline)?;

    let mut documents: Vec<Document> = match collection {
        Some(collection) => collection.query_all().collect(),
        None => Vec::new(),
    };
    for stage in &stages {
        documents = stage.apply(documents).map_err(ServerError::from)?;
    }

    Ok(cursor_response(
        format!("{database}.{collection_name}"),
        documents,
    ))
}

/// Translate stage documents into [`Stage`] values. Each stage document
/// carries exactly one field, keyed by the stage name; `$count` expands into
/// a group-then-project pair.
fn parse_pipeline(pipeline: &[Bson]) -> Result<Vec<Stage>, ServerError> {
    let mut stages = Vec::new();
    for stage in pipeline {
        let entry = match stage {
            Bson::Document(entry) if entry.len() == 1 => entry,
            _ => {
                return Err(ServerError::coded(
                    40323,
                    "A pipeline stage specification object must contain exactly one field.",
                ));
            }
        };
        let Some((name, spec)) = entry.iter().next() else {
            continue;
        };
        match name.as_str() {
            "$match" => stages.push(Stage::Match(stage_document(name, spec)?)),
            "$skip" => stages.push(Stage::Skip(stage_integer(name, spec)?)),
            "$limit" => stages.push(Stage::Limit(stage_integer(name, spec)?)),
            "$sort" => stages.push(Stage::OrderBy(stage_document(name, spec)?)),
            "$project" => stages.push(Stage::Project(stage_document(name, spec)?)),
            "$group" => stages.push(Stage::Group(stage_document(name, spec)?)),
            "$addFields" => stages.push(Stage::AddFields(stage_document(name, spec)?)),
            "$unwind" => stages.push(Stage::Unwind(stage_string(name, spec)?)),
            "$count" => {
                let field = stage_string(name, spec)?;
                if field.is_empty() || field.starts_with('$') || field.contains('.') {
                    return Err(ServerError::failed(
                        "the count field must be a non-empty string, not starting with '$' and \
                         not containing '.'",
                    ));
                }
                let mut group = Document::new();
                group.insert("_id", Bson::Null);
                group.insert(field, doc! { "$sum": 1 });
                stages.push(Stage::Group(group));
                stages.push(Stage::Project(doc! { "_id": 0 }));
            }
            _ => {
                return Err(ServerError::coded(
                    40324,
                    format!("Unrecognized pipeline stage name: '{name}'"),
                ));
            }
        }
    }
    Ok(stages)
}

fn stage_document(stage: &str, spec: &Bson) -> Result<Document, ServerError> {
    match spec {
        Bson::Document(spec) => Ok(spec.clone()),
        _ => Err(ServerError::failed(format!(
            "the {stage} stage specification must be a document"
        ))),
    }
}

fn stage_integer(stage: &str, spec: &Bson) -> Result<i64, ServerError> {
    match spec {
        Bson::Int32(n) => Ok(*n as i64),
        Bson::Int64(n) => Ok(*n),
        Bson::Double(n) if n.fract() == 0.0 => Ok(*n as i64),
        _ => Err(ServerError::failed(format!(
            "invalid argument to {stage} stage"
        ))),
    }
}

fn stage_string(stage: &str, spec: &Bson) -> Result<String, ServerError> {
    match spec {
        Bson::String(s) => Ok(s.clone()),
        _ => Err(ServerError::failed(format!(
            "the {stage} stage specification must be a string"
        ))),
    }
}
