use std::sync::Arc;

use basalt_backend::{Backend, Collection, DocumentStream, ServerError};
use bson::{Bson, Document, doc};
use tracing::{debug, error};

use crate::aggregate::handle_aggregate;
use crate::catalog::{Catalog, INDEXES_COLLECTION};
use crate::history::{ChannelId, LastResults};

/// One logical database: the collection catalog, the per-channel error
/// history, and the command router the framing layer drives.
pub struct Database {
    name: String,
    backend: Arc<dyn Backend>,
    catalog: Catalog,
    last_results: LastResults,
}

impl Database {
    /// Open a database over a backend, replaying persisted catalog metadata
    /// when there is any.
    pub fn open(name: impl Into<String>, backend: Arc<dyn Backend>) -> Result<Self, ServerError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ServerError::failed("database name must not be empty"));
        }
        let catalog = Catalog::open(&name, Arc::clone(&backend))?;
        Ok(Self {
            name,
            backend,
            catalog,
            last_results: LastResults::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ── Framing-layer surface ───────────────────────────────────

    /// Route one command. Matching is case-insensitive; every command except
    /// the error queries starts by pushing the pending sentinel onto the
    /// channel's history.
    pub fn handle_command(
        &self,
        channel: ChannelId,
        command: &str,
        params: &Document,
    ) -> Result<Document, ServerError> {
        if command.eq_ignore_ascii_case("getlasterror") {
            return Ok(ok(self.last_results.last_error(channel)));
        }
        if command.eq_ignore_ascii_case("getpreverror") {
            return Ok(ok(self.last_results.prev_error(channel)));
        }
        if command.eq_ignore_ascii_case("reseterror") {
            self.last_results.reset(channel);
            return Ok(ok(Document::new()));
        }

        self.last_results.append_pending(channel);
        debug!(command, channel, "dispatching command");
        let response = match command.to_ascii_lowercase().as_str() {
            "find" => self.command_find(command, params),
            "insert" => self.command_insert(channel, command, params),
            "update" => self.command_update(channel, command, params),
            "delete" => self.command_delete(channel, command, params),
            "create" => self.command_create(command, params),
            "createindexes" => self.command_create_indexes(params),
            "count" => self.command_count(command, params),
            "aggregate" => self.command_aggregate(command, params),
            "distinct" => self.command_distinct(command, params),
            "findandmodify" => self.command_find_and_modify(command, params),
            "collstats" => self.command_collection_stats(command, params),
            "validate" => self.command_validate(command, params),
            "listcollections" => self.command_list_collections(),
            "listindexes" => self.command_list_indexes(),
            "drop" => self.command_drop(command, params),
            "dropdatabase" => self.command_drop_database(),
            "dbstats" => self.command_database_stats(),
            _ => Err(ServerError::NoSuchCommand(command.to_string())),
        }?;
        Ok(ok(response))
    }

    /// Legacy query path. An unknown collection yields an empty sequence.
    pub fn handle_query(
        &self,
        collection_name: &str,
        query: &Document,
        skip: i64,
        limit: i64,
        projection: Option<&Document>,
    ) -> Result<DocumentStream, ServerError> {
        match self.catalog.get(collection_name)? {
            Some(collection) => collection.handle_query(query, skip, limit, projection),
            None => Ok(Box::new(std::iter::empty())),
        }
    }

    /// Legacy insert path: errors are recorded in the channel history, then
    /// logged and swallowed.
    pub fn handle_insert(
        &self,
        channel: ChannelId,
        collection_name: &str,
        documents: Vec<Document>,
    ) {
        if let Err(err) = self.insert_documents(channel, collection_name, documents) {
            if !err.is_silent() {
                error!(collection = collection_name, error = %err, "insert failed");
            }
        }
    }

    /// Legacy update path; same swallow discipline as [`handle_insert`].
    pub fn handle_update(
        &self,
        channel: ChannelId,
        collection_name: &str,
        selector: &Document,
        update: &Document,
        multi: bool,
        upsert: bool,
    ) {
        if let Err(err) =
            self.update_documents(channel, collection_name, selector, update, multi, upsert)
        {
            if !err.is_silent() {
                error!(collection = collection_name, error = %err, "update failed");
            }
        }
    }

    /// Legacy delete path; same swallow discipline as [`handle_insert`].
    pub fn handle_delete(
        &self,
        channel: ChannelId,
        collection_name: &str,
        selector: &Document,
        limit: i64,
    ) {
        if let Err(err) = self.delete_documents(channel, collection_name, selector, limit) {
            if !err.is_silent() {
                error!(collection = collection_name, error = %err, "delete failed");
            }
        }
    }

    /// A channel closed: forget its error history. Nothing else is
    /// per-channel.
    pub fn handle_close(&self, channel: ChannelId) {
        self.last_results.remove_channel(channel);
    }

    /// Move a collection out of `source` into this database under a new
    /// name, atomically with respect to both catalogs.
    pub fn move_collection(
        &self,
        source: &Database,
        collection: &Arc<dyn Collection>,
        new_name: &str,
    ) -> Result<(), ServerError> {
        let old_name = collection.collection_name();
        source.catalog.unregister(&old_name)?;
        collection.rename_to(&self.name, new_name);
        self.catalog.register(new_name, Arc::clone(collection))
    }

    // ── Write helpers ───────────────────────────────────────────
    //
    // Each helper pushes its own pending sentinel, so batch commands that
    // run one helper per entry keep the replace-must-find-sentinel
    // invariant. On success the sentinel takes the result document, on
    // failure the error document; the error then propagates.

    fn insert_documents(
        &self,
        channel: ChannelId,
        collection_name: &str,
        documents: Vec<Document>,
    ) -> Result<Document, ServerError> {
        self.last_results.append_pending(channel);
        match self.try_insert(collection_name, documents) {
            Ok(n) => {
                let result = doc! { "n": n as i32 };
                self.last_results.record_result(channel, result.clone())?;
                Ok(result)
            }
            Err(err) => {
                self.last_results
                    .record_error(channel, err.to_error_document(channel));
                Err(err)
            }
        }
    }

    fn try_insert(
        &self,
        collection_name: &str,
        documents: Vec<Document>,
    ) -> Result<usize, ServerError> {
        if collection_name.starts_with("system.") {
            if collection_name == INDEXES_COLLECTION {
                // Index descriptions written the legacy way become real
                // index registrations, never plain documents.
                let n = documents.len();
                for description in &documents {
                    self.catalog.add_index(description)?;
                }
                return Ok(n);
            }
            return Err(ServerError::coded(
                16459,
                "attempt to insert in system namespace",
            ));
        }
        let collection = self.catalog.resolve_or_create(collection_name)?;
        collection.insert(documents)
    }

    fn update_documents(
        &self,
        channel: ChannelId,
        collection_name: &str,
        selector: &Document,
        update: &Document,
        multi: bool,
        upsert: bool,
    ) -> Result<Document, ServerError> {
        self.last_results.append_pending(channel);
        let outcome = if collection_name.starts_with("system.") {
            Err(ServerError::coded(
                10156,
                format!(
                    "cannot update system collection: {}.{collection_name}",
                    self.name
                ),
            ))
        } else {
            self.catalog
                .resolve_or_create(collection_name)
                .and_then(|collection| {
                    collection.update_documents(selector, update, multi, upsert)
                })
        };
        match outcome {
            Ok(outcome) => {
                let mut result = doc! {
                    "n": outcome.n as i32,
                    "nModified": outcome.n_modified as i32,
                };
                if let Some(id) = outcome.upserted_id {
                    result.insert("upserted", id);
                }
                self.last_results.record_result(channel, result.clone())?;
                Ok(result)
            }
            Err(err) => {
                self.last_results
                    .record_error(channel, err.to_error_document(channel));
                Err(err)
            }
        }
    }

    fn delete_documents(
        &self,
        channel: ChannelId,
        collection_name: &str,
        selector: &Document,
        limit: i64,
    ) -> Result<Document, ServerError> {
        self.last_results.append_pending(channel);
        let outcome = if collection_name.starts_with("system.") {
            Err(ServerError::coded(
                12050,
                "cannot delete from system namespace",
            ))
        } else {
            match self.catalog.get(collection_name) {
                Ok(Some(collection)) => collection.delete_documents(selector, limit),
                Ok(None) => Ok(0),
                Err(err) => Err(err),
            }
        };
        match outcome {
            Ok(n) => {
                let result = doc! { "n": n as i32 };
                self.last_results.record_result(channel, result.clone())?;
                Ok(result)
            }
            Err(err) => {
                self.last_results
                    .record_error(channel, err.to_error_document(channel));
                Err(err)
            }
        }
    }

    // ── Command handlers ────────────────────────────────────────

    fn command_find(&self, command: &str, params: &Document) -> Result<Document, ServerError> {
        let name = collection_name(params, command)?;
        let full = format!("{}.{name}", self.name);
        let Some(collection) = self.catalog.get(name)? else {
            return Ok(cursor_response(full, Vec::new()));
        };

        let filter = params.get_document("filter").ok().cloned().unwrap_or_default();
        let mut query = doc! { "$query": filter };
        if let Ok(sort) = params.get_document("sort") {
            query.insert("$orderby", sort.clone());
        }
        let skip = get_int(params, "skip").unwrap_or(0);
        let limit = get_int(params, "limit").unwrap_or(0);
        let projection = params.get_document("projection").ok().cloned();

        let batch: Vec<Document> = collection
            .handle_query(&query, skip, limit, projection.as_ref())?
            .collect();
        Ok(cursor_response(full, batch))
    }

    fn command_insert(
        &self,
        channel: ChannelId,
        command: &str,
        params: &Document,
    ) -> Result<Document, ServerError> {
        let name = collection_name(params, command)?;
        if let Ok(ordered) = params.get_bool("ordered") {
            debug!(ordered, collection = name, "ordered flag accepted but not enforced");
        }
        let documents = params
            .get_array("documents")
            .map_err(|_| ServerError::failed("insert needs a 'documents' array"))?;

        let mut n = 0;
        let mut write_errors: Vec<Bson> = Vec::new();
        for (index, document) in documents.iter().enumerate() {
            let Bson::Document(document) = document else {
                return Err(ServerError::failed("'documents' entries must be documents"));
            };
            match self.insert_documents(channel, name, vec![document.clone()]) {
                Ok(result) => n += result.get_i32("n").unwrap_or(0),
                Err(err) => {
                    let mut write_error = doc! {
                        "index": index as i32,
                        "errmsg": err.message(),
                    };
                    if let Some(code) = err.code() {
                        write_error.insert("code", code);
                    }
                    if let Some(code_name) = err.code_name() {
                        write_error.insert("codeName", code_name);
                    }
                    write_errors.push(Bson::Document(write_error));
                }
            }
        }

        let mut response = doc! { "n": n };
        if !write_errors.is_empty() {
            response.insert("writeErrors", write_errors);
        }
        Ok(response)
    }

    fn command_update(
        &self,
        channel: ChannelId,
        command: &str,
        params: &Document,
    ) -> Result<Document, ServerError> {
        let name = collection_name(params, command)?;
        let updates = params
            .get_array("updates")
            .map_err(|_| ServerError::failed("update needs an 'updates' array"))?;

        let mut n = 0;
        let mut n_modified = 0;
        let mut upserts: Vec<Bson> = Vec::new();
        for (index, entry) in updates.iter().enumerate() {
            let Bson::Document(entry) = entry else {
                return Err(ServerError::failed("'updates' entries must be documents"));
            };
            let selector = entry
                .get_document("q")
                .map_err(|_| ServerError::failed("update entries need a 'q' selector"))?;
            let update = entry
                .get_document("u")
                .map_err(|_| ServerError::failed("update entries need a 'u' document"))?;
            let multi = entry.get_bool("multi").unwrap_or(false);
            let upsert = entry.get_bool("upsert").unwrap_or(false);

            let result =
                self.update_documents(channel, name, selector, update, multi, upsert)?;
            n += result.get_i32("n").unwrap_or(0);
            n_modified += result.get_i32("nModified").unwrap_or(0);
            if let Some(id) = result.get("upserted") {
                upserts.push(Bson::Document(doc! {
                    "index": index as i32,
                    "_id": id.clone(),
                }));
            }
        }

        let mut response = doc! { "n": n, "nModified": n_modified };
        if !upserts.is_empty() {
            response.insert("upserted", upserts);
        }
        Ok(response)
    }

    fn command_delete(
        &self,
        channel: ChannelId,
        command: &str,
        params: &Document,
    ) -> Result<Document, ServerError> {
        let name = collection_name(params, command)?;
        let deletes = params
            .get_array("deletes")
            .map_err(|_| ServerError::failed("delete needs a 'deletes' array"))?;

        let mut n = 0;
        for entry in deletes {
            let Bson::Document(entry) = entry else {
                return Err(ServerError::failed("'deletes' entries must be documents"));
            };
            let selector = entry
                .get_document("q")
                .map_err(|_| ServerError::failed("delete entries need a 'q' selector"))?;
            let limit = get_int(entry, "limit").unwrap_or(0);
            let result = self.delete_documents(channel, name, selector, limit)?;
            n += result.get_i32("n").unwrap_or(0);
        }
        Ok(doc! { "n": n })
    }

    fn command_create(&self, command: &str, params: &Document) -> Result<Document, ServerError> {
        let name = collection_name(params, command)?;
        if params.get_bool("capped").unwrap_or(false) {
            return Err(ServerError::failed("not yet implemented"));
        }
        if let Ok(auto_index_id) = params.get_bool("autoIndexId") {
            if !auto_index_id {
                return Err(ServerError::failed("not yet implemented"));
            }
        }
        self.catalog.create_collection(name)?;
        Ok(Document::new())
    }

    fn command_create_indexes(&self, params: &Document) -> Result<Document, ServerError> {
        let indexes = params
            .get_array("indexes")
            .map_err(|_| ServerError::failed("createIndexes needs an 'indexes' array"))?;
        let before = self.catalog.count_indexes();
        for description in indexes {
            let Bson::Document(description) = description else {
                return Err(ServerError::failed("'indexes' entries must be documents"));
            };
            self.catalog.add_index(description)?;
        }
        let after = self.catalog.count_indexes();
        Ok(doc! {
            "numIndexesBefore": before as i32,
            "numIndexesAfter": after as i32,
        })
    }

    fn command_count(&self, command: &str, params: &Document) -> Result<Document, ServerError> {
        let name = collection_name(params, command)?;
        let Some(collection) = self.catalog.get(name)? else {
            return Ok(doc! { "n": 0 });
        };
        let query = params.get_document("query").ok().cloned().unwrap_or_default();
        let skip = get_int(params, "skip").unwrap_or(0);
        let limit = get_int(params, "limit").unwrap_or(0);
        let n = collection.count(&query, skip, limit)?;
        Ok(doc! { "n": n as i32 })
    }

    fn command_aggregate(&self, command: &str, params: &Document) -> Result<Document, ServerError> {
        let name = collection_name(params, command)?;
        let collection = self.catalog.get(name)?;
        handle_aggregate(&self.name, name, collection, params)
    }

    fn command_distinct(&self, command: &str, params: &Document) -> Result<Document, ServerError> {
        let name = collection_name(params, command)?;
        match self.catalog.get(name)? {
            Some(collection) => collection.handle_distinct(params),
            None => Ok(doc! { "values": [] }),
        }
    }

    fn command_find_and_modify(
        &self,
        command: &str,
        params: &Document,
    ) -> Result<Document, ServerError> {
        let name = collection_name(params, command)?;
        let collection = self.catalog.resolve_or_create(name)?;
        collection.find_and_modify(params)
    }

    fn command_collection_stats(
        &self,
        command: &str,
        params: &Document,
    ) -> Result<Document, ServerError> {
        let name = collection_name(params, command)?;
        let collection = self.catalog.resolve(name)?;
        let stats = collection.stats();
        let avg_obj_size = if stats.count == 0 {
            0.0
        } else {
            stats.size as f64 / stats.count as f64
        };
        let mut index_sizes = Document::new();
        for (index, bytes) in &stats.index_sizes {
            index_sizes.insert(index.clone(), *bytes as i64);
        }
        Ok(doc! {
            "ns": collection.full_name(),
            "count": stats.count as i64,
            "size": stats.size as i64,
            "avgObjSize": avg_obj_size,
            "storageSize": stats.size as i64,
            "nindexes": collection.num_indexes() as i32,
            "totalIndexSize": stats.total_index_size() as i64,
            "indexSizes": index_sizes,
        })
    }

    fn command_validate(&self, command: &str, params: &Document) -> Result<Document, ServerError> {
        let name = collection_name(params, command)?;
        let collection = self.catalog.resolve(name)?;
        collection.validate()
    }

    fn command_list_collections(&self) -> Result<Document, ServerError> {
        let prefix = format!("{}.", self.name);
        let mut batch = Vec::new();
        for namespace in self.catalog.namespaces_collection().query_all() {
            let Ok(full_name) = namespace.get_str("name") else {
                continue;
            };
            let name = full_name.strip_prefix(&prefix).unwrap_or(full_name);
            batch.push(doc! { "name": name });
        }
        Ok(cursor_response(
            format!("{}.$cmd.listCollections", self.name),
            batch,
        ))
    }

    fn command_list_indexes(&self) -> Result<Document, ServerError> {
        let indexes = self.catalog.resolve(INDEXES_COLLECTION)?;
        let batch: Vec<Document> = indexes.query_all().collect();
        Ok(cursor_response(
            format!("{}.$cmd.listIndexes", self.name),
            batch,
        ))
    }

    fn command_drop(&self, command: &str, params: &Document) -> Result<Document, ServerError> {
        let name = collection_name(params, command)?;
        match self.catalog.drop_collection(name)? {
            Some(n_indexes) => Ok(doc! {
                "nIndexesWas": n_indexes as i32,
                "ns": format!("{}.{name}", self.name),
            }),
            None => Err(ServerError::silent("ns not found")),
        }
    }

    fn command_drop_database(&self) -> Result<Document, ServerError> {
        self.backend.drop_database(&self.name)?;
        self.catalog.drop_all()?;
        Ok(doc! { "dropped": self.name.clone() })
    }

    fn command_database_stats(&self) -> Result<Document, ServerError> {
        let collections = self.catalog.collections();
        let mut objects = 0u64;
        let mut data_size = 0u64;
        let mut index_size = 0u64;
        for collection in &collections {
            let stats = collection.stats();
            objects += stats.count;
            data_size += stats.size;
            index_size += stats.total_index_size();
        }
        let avg_obj_size = if objects == 0 {
            0.0
        } else {
            data_size as f64 / objects as f64
        };
        Ok(doc! {
            "db": self.name.clone(),
            "collections": collections.len() as i32,
            "objects": objects as i64,
            "avgObjSize": avg_obj_size,
            "dataSize": data_size as i64,
            "storageSize": data_size as i64,
            "indexes": self.catalog.count_indexes() as i32,
            "indexSize": index_size as i64,
            "fileSize": self.backend.file_size(&self.name) as i64,
        })
    }
}

/// The target collection of a command is the value of its first field,
/// keyed by the command's own name.
fn collection_name<'a>(params: &'a Document, command: &str) -> Result<&'a str, ServerError> {
    params.get_str(command).map_err(|_| {
        ServerError::failed(format!("no collection name given in {command} command"))
    })
}

fn get_int(params: &Document, key: &str) -> Option<i64> {
    match params.get(key) {
        Some(Bson::Int32(n)) => Some(*n as i64),
        Some(Bson::Int64(n)) => Some(*n),
        Some(Bson::Double(n)) => Some(*n as i64),
        _ => None,
    }
}

/// Stamp `{ok: 1}` on a success response.
fn ok(mut response: Document) -> Document {
    if !response.contains_key("ok") {
        response.insert("ok", 1);
    }
    response
}

/// Single-batch cursor response; cursor ids are always zero.
pub(crate) fn cursor_response(ns: String, batch: Vec<Document>) -> Document {
    let first_batch: Vec<Bson> = batch.into_iter().map(Bson::Document).collect();
    doc! {
        "cursor": {
            "id": 0_i64,
            "ns": ns,
            "firstBatch": first_batch,
        },
    }
}
