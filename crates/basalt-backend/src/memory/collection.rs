use std::collections::BTreeMap;
use std::sync::Arc;

use basalt_query::aggregate::Stage;
use basalt_query::{
    OrderedBson, apply_update, is_update_document, matches, project, upsert_document,
    values_at_path,
};
use bson::oid::ObjectId;
use bson::{Bson, Document, doc};
use parking_lot::{RwLock, RwLockWriteGuard};

use crate::collection::{Collection, CollectionStats, DocumentStream, UpdateOutcome};
use crate::error::ServerError;
use crate::index::Index;

use super::Registry;

struct State {
    documents: BTreeMap<u64, Document>,
    next_position: u64,
}

/// Heap-resident collection: documents keyed by insertion position, plus the
/// registered indexes. All interior state sits behind locks so one instance
/// can serve many channels.
pub struct MemoryCollection {
    registry: Arc<Registry>,
    names: RwLock<(String, String)>,
    id_field: Option<String>,
    state: RwLock<State>,
    indexes: RwLock<Vec<Arc<dyn Index>>>,
}

impl MemoryCollection {
    pub(crate) fn new(
        registry: Arc<Registry>,
        database: &str,
        collection: &str,
        id_field: Option<&str>,
    ) -> Self {
        Self {
            registry,
            names: RwLock::new((database.to_string(), collection.to_string())),
            id_field: id_field.map(str::to_string),
            state: RwLock::new(State {
                documents: BTreeMap::new(),
                next_position: 0,
            }),
            indexes: RwLock::new(Vec::new()),
        }
    }

    /// Split the legacy `{$query, $orderby}` envelope from a plain filter.
    fn split_query(query: &Document) -> (Document, Option<Document>) {
        if query.contains_key("$query") {
            let filter = query
                .get_document("$query")
                .ok()
                .cloned()
                .unwrap_or_default();
            let order_by = query.get_document("$orderby").ok().cloned();
            (filter, order_by)
        } else {
            (query.clone(), None)
        }
    }

    fn matching_positions(
        state: &State,
        selector: &Document,
        limit: Option<usize>,
    ) -> Result<Vec<u64>, ServerError> {
        let mut positions = Vec::new();
        for (position, doc) in &state.documents {
            if matches(doc, selector)? {
                positions.push(*position);
                if limit.is_some_and(|max| positions.len() >= max) {
                    break;
                }
            }
        }
        Ok(positions)
    }

    fn insert_locked(&self, state: &mut State, mut doc: Document) -> Result<Document, ServerError> {
        if self.id_field.as_deref() == Some("_id") && !doc.contains_key("_id") {
            let mut with_id = Document::new();
            with_id.insert("_id", Bson::ObjectId(ObjectId::new()));
            with_id.extend(doc);
            doc = with_id;
        }
        let indexes = self.indexes.read();
        for index in indexes.iter() {
            index.check_add(&doc)?;
        }
        let position = state.next_position;
        state.next_position += 1;
        for index in indexes.iter() {
            index.add(&doc, position);
        }
        state.documents.insert(position, doc.clone());
        Ok(doc)
    }

    /// Replace the document at `position`, running the update or replacement
    /// through every index. Returns whether the document changed.
    fn update_at(
        &self,
        state: &mut State,
        position: u64,
        update: &Document,
    ) -> Result<(Document, Document, bool), ServerError> {
        let old = state
            .documents
            .get(&position)
            .cloned()
            .ok_or_else(|| ServerError::failed("document vanished during update"))?;
        let mut new = old.clone();
        let changed = if is_update_document(update) {
            apply_update(&mut new, update)?
        } else {
            new = replacement_document(&old, update)?;
            new != old
        };
        if changed {
            let indexes = self.indexes.read();
            for index in indexes.iter() {
                index.check_update(&old, &new)?;
            }
            for index in indexes.iter() {
                index.update(&old, &new, position);
            }
            state.documents.insert(position, new.clone());
        }
        Ok((old, new, changed))
    }

    fn remove_at(&self, state: &mut State, position: u64) -> Option<Document> {
        let doc = state.documents.remove(&position)?;
        for index in self.indexes.read().iter() {
            index.remove(&doc);
        }
        Some(doc)
    }

    fn find_first(
        &self,
        state: &RwLockWriteGuard<'_, State>,
        query: &Document,
        sort: Option<&Document>,
    ) -> Result<Option<u64>, ServerError> {
        let mut matched: Vec<(u64, &Document)> = Vec::new();
        for (position, doc) in &state.documents {
            if matches(doc, query)? {
                matched.push((*position, doc));
            }
        }
        if let Some(order) = sort {
            if !order.is_empty() {
                let docs: Vec<Document> = matched.iter().map(|(_, d)| (*d).clone()).collect();
                let sorted = Stage::OrderBy(order.clone()).apply(docs)?;
                if let Some(first) = sorted.first() {
                    return Ok(matched
                        .iter()
                        .find(|(_, d)| *d == first)
                        .map(|(position, _)| *position));
                }
                return Ok(None);
            }
        }
        Ok(matched.first().map(|(position, _)| *position))
    }
}

/// A replacement keeps the stored `_id`; carrying a conflicting one is an
/// error.
fn replacement_document(old: &Document, replacement: &Document) -> Result<Document, ServerError> {
    let mut new = Document::new();
    if let Some(old_id) = old.get("_id") {
        if let Some(new_id) = replacement.get("_id") {
            if !basalt_query::values_equal(old_id, new_id) {
                return Err(ServerError::named(
                    66,
                    "ImmutableField",
                    "immutable field: performing an update on the path '_id' would modify the immutable field '_id'",
                ));
            }
        }
        new.insert("_id", old_id.clone());
    }
    for (key, value) in replacement {
        if key != "_id" {
            new.insert(key.clone(), value.clone());
        }
    }
    Ok(new)
}

impl Collection for MemoryCollection {
    fn database_name(&self) -> String {
        self.names.read().0.clone()
    }

    fn collection_name(&self) -> String {
        self.names.read().1.clone()
    }

    fn insert(&self, documents: Vec<Document>) -> Result<usize, ServerError> {
        let mut n = 0;
        for doc in documents {
            let mut state = self.state.write();
            self.insert_locked(&mut state, doc)?;
            n += 1;
        }
        Ok(n)
    }

    fn update_documents(
        &self,
        selector: &Document,
        update: &Document,
        multi: bool,
        upsert: bool,
    ) -> Result<UpdateOutcome, ServerError> {
        let mut state = self.state.write();
        let limit = if multi { None } else { Some(1) };
        let positions = Self::matching_positions(&state, selector, limit)?;

        if positions.is_empty() {
            if !upsert {
                return Ok(UpdateOutcome::default());
            }
            let doc = upsert_document(selector, update).map_err(ServerError::from)?;
            let inserted = self.insert_locked(&mut state, doc)?;
            return Ok(UpdateOutcome {
                n: 1,
                n_modified: 0,
                upserted_id: inserted.get("_id").cloned(),
            });
        }

        let mut n_modified = 0;
        for position in &positions {
            let (_, _, changed) = self.update_at(&mut state, *position, update)?;
            if changed {
                n_modified += 1;
            }
        }
        Ok(UpdateOutcome {
            n: positions.len() as i64,
            n_modified,
            upserted_id: None,
        })
    }

    fn delete_documents(&self, selector: &Document, limit: i64) -> Result<usize, ServerError> {
        let mut state = self.state.write();
        let limit = if limit > 0 { Some(limit as usize) } else { None };
        let positions = Self::matching_positions(&state, selector, limit)?;
        for position in &positions {
            self.remove_at(&mut state, *position);
        }
        Ok(positions.len())
    }

    fn handle_query(
        &self,
        query: &Document,
        skip: i64,
        limit: i64,
        projection: Option<&Document>,
    ) -> Result<DocumentStream, ServerError> {
        let (filter, order_by) = Self::split_query(query);

        let mut matched = Vec::new();
        {
            let state = self.state.read();
            for doc in state.documents.values() {
                if matches(doc, &filter)? {
                    matched.push(doc.clone());
                }
            }
        }

        if let Some(order) = order_by {
            if !order.is_empty() {
                matched = Stage::OrderBy(order).apply(matched)?;
            }
        }
        if skip > 0 {
            matched.drain(..(skip as usize).min(matched.len()));
        }
        if limit != 0 {
            matched.truncate(limit.unsigned_abs() as usize);
        }
        if let Some(projection) = projection {
            if !projection.is_empty() {
                matched = matched
                    .iter()
                    .map(|doc| project(doc, projection))
                    .collect::<Result<_, _>>()
                    .map_err(ServerError::from)?;
            }
        }
        Ok(Box::new(matched.into_iter()))
    }

    fn query_all(&self) -> DocumentStream {
        let documents: Vec<Document> = self.state.read().documents.values().cloned().collect();
        Box::new(documents.into_iter())
    }

    fn count_all(&self) -> u64 {
        self.state.read().documents.len() as u64
    }

    fn count(&self, query: &Document, skip: i64, limit: i64) -> Result<u64, ServerError> {
        let state = self.state.read();
        let mut matched = 0u64;
        for doc in state.documents.values() {
            if matches(doc, query)? {
                matched += 1;
            }
        }
        drop(state);
        let after_skip = matched.saturating_sub(skip.max(0) as u64);
        if limit > 0 {
            Ok(after_skip.min(limit as u64))
        } else {
            Ok(after_skip)
        }
    }

    fn handle_distinct(&self, params: &Document) -> Result<Document, ServerError> {
        let key = params
            .get_str("key")
            .map_err(|_| ServerError::failed("distinct requires a 'key' string"))?;
        let query = params.get_document("query").ok().cloned().unwrap_or_default();

        let state = self.state.read();
        let mut distinct: Vec<OrderedBson> = Vec::new();
        for doc in state.documents.values() {
            if !matches(doc, &query)? {
                continue;
            }
            let mut found = Vec::new();
            values_at_path(doc, key, &mut found);
            for value in found {
                // distinct flattens array values
                let candidates: Vec<&Bson> = match value {
                    Bson::Array(elements) => elements.iter().collect(),
                    other => vec![other],
                };
                for candidate in candidates {
                    let candidate = OrderedBson(candidate.clone());
                    if !distinct.contains(&candidate) {
                        distinct.push(candidate);
                    }
                }
            }
        }
        distinct.sort();
        let values: Vec<Bson> = distinct.into_iter().map(|v| v.0).collect();
        Ok(doc! { "values": values })
    }

    fn find_and_modify(&self, params: &Document) -> Result<Document, ServerError> {
        let query = params.get_document("query").ok().cloned().unwrap_or_default();
        let sort = params.get_document("sort").ok().cloned();
        let remove = params.get_bool("remove").unwrap_or(false);
        let update = params.get_document("update").ok().cloned();
        let return_new = params.get_bool("new").unwrap_or(false);
        let fields = params.get_document("fields").ok().cloned();
        let upsert = params.get_bool("upsert").unwrap_or(false);

        if remove && update.is_some() {
            return Err(ServerError::failed(
                "remove and update can't both be specified",
            ));
        }
        if !remove && update.is_none() {
            return Err(ServerError::failed(
                "either an update or remove=true must be specified",
            ));
        }

        let mut state = self.state.write();
        let found = self.find_first(&state, &query, sort.as_ref())?;

        let (last_error_object, value) = if remove {
            match found {
                Some(position) => {
                    let old = self.remove_at(&mut state, position);
                    (doc! { "n": 1 }, old.map(Bson::Document).unwrap_or(Bson::Null))
                }
                None => (doc! { "n": 0 }, Bson::Null),
            }
        } else {
            let update = update.unwrap_or_default();
            match found {
                Some(position) => {
                    let (old, new, _) = self.update_at(&mut state, position, &update)?;
                    let value = if return_new { new } else { old };
                    (
                        doc! { "updatedExisting": true, "n": 1 },
                        Bson::Document(value),
                    )
                }
                None if upsert => {
                    let doc = upsert_document(&query, &update).map_err(ServerError::from)?;
                    let inserted = self.insert_locked(&mut state, doc)?;
                    let id = inserted.get("_id").cloned().unwrap_or(Bson::Null);
                    let value = if return_new {
                        Bson::Document(inserted)
                    } else {
                        Bson::Null
                    };
                    (
                        doc! { "updatedExisting": false, "n": 1, "upserted": id },
                        value,
                    )
                }
                None => (doc! { "updatedExisting": false, "n": 0 }, Bson::Null),
            }
        };

        let value = match (value, fields) {
            (Bson::Document(doc), Some(projection)) if !projection.is_empty() => {
                Bson::Document(project(&doc, &projection).map_err(ServerError::from)?)
            }
            (value, _) => value,
        };

        Ok(doc! { "lastErrorObject": last_error_object, "value": value })
    }

    fn add_index(&self, index: Arc<dyn Index>) -> Result<(), ServerError> {
        // Lock order is state before indexes, as on the write paths.
        let state = self.state.read();
        let mut indexes = self.indexes.write();
        if indexes.iter().any(|existing| existing.name() == index.name()) {
            return Ok(());
        }
        for (position, doc) in &state.documents {
            index.check_add(doc)?;
            index.add(doc, *position);
        }
        indexes.push(index);
        Ok(())
    }

    fn num_indexes(&self) -> usize {
        self.indexes.read().len()
    }

    fn stats(&self) -> CollectionStats {
        let state = self.state.read();
        let size = state
            .documents
            .values()
            .map(|doc| bson::to_vec(doc).map(|b| b.len() as u64).unwrap_or(0))
            .sum();
        let index_sizes = self
            .indexes
            .read()
            .iter()
            .map(|index| (index.name(), index.size_bytes()))
            .collect();
        CollectionStats {
            count: state.documents.len() as u64,
            size,
            index_sizes,
        }
    }

    fn validate(&self) -> Result<Document, ServerError> {
        let stats = self.stats();
        Ok(doc! {
            "ns": self.full_name(),
            "nrecords": stats.count as i64,
            "nIndexes": self.num_indexes() as i32,
            "valid": true,
            "errors": [],
        })
    }

    fn rename_to(&self, database: &str, collection: &str) {
        let mut names = self.names.write();
        let old_key = format!("{}.{}", names.0, names.1);
        let new_key = format!("{database}.{collection}");
        if let Some((_, entry)) = self.registry.remove(&old_key) {
            self.registry.insert(new_key, entry);
        }
        *names = (database.to_string(), collection.to_string());
    }
}
