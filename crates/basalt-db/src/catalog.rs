use std::sync::Arc;

use basalt_backend::{Backend, Collection, IndexKey, ServerError};
use bson::{Bson, Document, doc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

pub(crate) const NAMESPACES_COLLECTION: &str = "system.namespaces";
pub(crate) const INDEXES_COLLECTION: &str = "system.indexes";
pub(crate) const ID_FIELD: &str = "_id";
pub(crate) const MAX_NS_LENGTH: usize = 128;

/// The collection map of one database, plus the `system.namespaces` and
/// `system.indexes` pseudo-collections that mirror it.
///
/// Single-key lookups go through the concurrent map; compound transitions
/// (create, drop, move) hold `create_lock` so the map and the namespace
/// documents never diverge.
pub(crate) struct Catalog {
    database: String,
    backend: Arc<dyn Backend>,
    collections: DashMap<String, Arc<dyn Collection>>,
    namespaces: Arc<dyn Collection>,
    indexes: Mutex<Option<Arc<dyn Collection>>>,
    create_lock: Mutex<()>,
}

impl Catalog {
    /// Open the catalog. When the backend already holds namespace metadata,
    /// replay it: reopen every named collection, then reopen
    /// `system.indexes` and re-attach each described index.
    pub fn open(database: &str, backend: Arc<dyn Backend>) -> Result<Self, ServerError> {
        let namespaces = backend.open_collection(database, NAMESPACES_COLLECTION, Some("name"));
        let catalog = Self {
            database: database.to_string(),
            backend,
            collections: DashMap::new(),
            namespaces: Arc::clone(&namespaces),
            indexes: Mutex::new(None),
            create_lock: Mutex::new(()),
        };
        catalog
            .collections
            .insert(NAMESPACES_COLLECTION.to_string(), namespaces);

        if !catalog.namespaces.is_empty() {
            let prefix = format!("{database}.");
            for namespace in catalog.namespaces.query_all() {
                let Ok(full_name) = namespace.get_str("name") else {
                    continue;
                };
                let name = full_name.strip_prefix(&prefix).unwrap_or(full_name);
                if name == INDEXES_COLLECTION {
                    continue; // reopened with its own identifier handling below
                }
                debug!(collection = name, "reopening collection");
                let collection =
                    catalog
                        .backend
                        .open_collection(database, name, Some(ID_FIELD));
                catalog.collections.insert(name.to_string(), collection);
            }

            let index_collection =
                catalog
                    .backend
                    .open_collection(database, INDEXES_COLLECTION, None);
            catalog
                .collections
                .insert(INDEXES_COLLECTION.to_string(), Arc::clone(&index_collection));
            *catalog.indexes.lock() = Some(Arc::clone(&index_collection));
            for description in index_collection.query_all() {
                catalog.open_index(&description)?;
            }
        }
        Ok(catalog)
    }

    fn check_name(&self, name: &str) -> Result<(), ServerError> {
        if name.len() > MAX_NS_LENGTH {
            return Err(ServerError::coded(
                10080,
                "ns name too long, max size is 128",
            ));
        }
        if name.is_empty() {
            return Err(ServerError::coded(
                16256,
                format!("Invalid ns [{}.{name}]", self.database),
            ));
        }
        Ok(())
    }

    /// Look a collection up after validating the name.
    pub fn get(&self, name: &str) -> Result<Option<Arc<dyn Collection>>, ServerError> {
        self.check_name(name)?;
        Ok(self.collections.get(name).map(|c| Arc::clone(c.value())))
    }

    /// Look a collection up, failing when it does not exist.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Collection>, ServerError> {
        self.get(name)?.ok_or_else(|| {
            ServerError::NoSuchCollection(format!("{}.{name}", self.database))
        })
    }

    /// Get or create. Serialized so concurrent writers targeting an unknown
    /// collection create it exactly once.
    pub fn resolve_or_create(&self, name: &str) -> Result<Arc<dyn Collection>, ServerError> {
        if let Some(collection) = self.get(name)? {
            return Ok(collection);
        }
        let _guard = self.create_lock.lock();
        if let Some(collection) = self.collections.get(name) {
            return Ok(Arc::clone(collection.value()));
        }
        self.create_collection_locked(name)
    }

    /// The `create` command path: fails with code 48 when the collection
    /// already exists.
    pub fn create_collection(&self, name: &str) -> Result<Arc<dyn Collection>, ServerError> {
        self.check_name(name)?;
        let _guard = self.create_lock.lock();
        if self.collections.contains_key(name) {
            return Err(ServerError::named(
                48,
                "NamespaceExists",
                format!("a collection '{}.{name}' already exists", self.database),
            ));
        }
        self.create_collection_locked(name)
    }

    /// Creation proper; the caller holds `create_lock`. Registers the
    /// collection, appends its namespace document, and synthesizes the
    /// `_id_` unique index.
    fn create_collection_locked(&self, name: &str) -> Result<Arc<dyn Collection>, ServerError> {
        self.check_name(name)?;
        if name.contains('$') {
            return Err(ServerError::coded(
                10093,
                "cannot insert into reserved $ collection",
            ));
        }
        debug!(collection = name, "creating collection");
        let collection = self
            .backend
            .open_collection(&self.database, name, Some(ID_FIELD));
        self.collections
            .insert(name.to_string(), Arc::clone(&collection));
        self.add_namespace(collection.full_name())?;
        self.add_index(&doc! {
            "name": "_id_",
            "ns": collection.full_name(),
            "key": { "_id": 1 },
        })?;
        Ok(collection)
    }

    fn add_namespace(&self, full_name: String) -> Result<(), ServerError> {
        self.namespaces.insert(vec![doc! { "name": full_name }])?;
        Ok(())
    }

    /// `system.indexes` is materialized on first index registration.
    fn get_or_create_indexes_collection(&self) -> Result<Arc<dyn Collection>, ServerError> {
        let mut slot = self.indexes.lock();
        if slot.is_none() {
            let collection =
                self.backend
                    .open_collection(&self.database, INDEXES_COLLECTION, None);
            self.collections
                .insert(INDEXES_COLLECTION.to_string(), Arc::clone(&collection));
            self.add_namespace(collection.full_name())?;
            *slot = Some(Arc::clone(&collection));
        }
        match slot.as_ref() {
            Some(collection) => Ok(Arc::clone(collection)),
            None => Err(ServerError::failed("indexes collection unavailable")),
        }
    }

    /// Register an index: attach it to its collection and record the
    /// description in `system.indexes`.
    pub fn add_index(&self, description: &Document) -> Result<(), ServerError> {
        self.open_index(description)?;
        self.get_or_create_indexes_collection()?
            .insert(vec![description.clone()])?;
        Ok(())
    }

    /// Attach the index an existing description names. `{_id: ±1}` keys and
    /// `unique: true` keys become unique indexes; anything else is accepted
    /// but not enforced.
    fn open_index(&self, description: &Document) -> Result<(), ServerError> {
        let ns = description
            .get_str("ns")
            .map_err(|_| ServerError::failed("index descriptions need an 'ns' string"))?;
        let prefix = format!("{}.", self.database);
        let collection_name = ns.strip_prefix(&prefix).unwrap_or(ns);
        let key = description
            .get_document("key")
            .map_err(|_| ServerError::failed("index descriptions need a 'key' document"))?;

        let mut keys = Vec::with_capacity(key.len());
        for (field, direction) in key {
            let ascending = match direction {
                Bson::Int32(n) => *n >= 0,
                Bson::Int64(n) => *n >= 0,
                Bson::Double(n) => *n >= 0.0,
                _ => true,
            };
            keys.push(IndexKey {
                field: field.clone(),
                ascending,
            });
        }

        let is_id_index = matches!(keys.as_slice(), [key] if key.field == ID_FIELD);
        let unique = description.get_bool("unique").unwrap_or(false);
        if !is_id_index && !unique {
            warn!(
                ns,
                ?keys,
                "non-unique non-_id indexes are not yet implemented, ignoring"
            );
            return Ok(());
        }

        let collection = self.resolve_or_create(collection_name)?;
        let index =
            self.backend
                .open_or_create_unique_index(&self.database, collection_name, &keys);
        collection.add_index(index)
    }

    /// Total number of registered index descriptions, observed under the
    /// indexes lock.
    pub fn count_indexes(&self) -> u64 {
        let slot = self.indexes.lock();
        slot.as_ref().map(|c| c.count_all()).unwrap_or(0)
    }

    /// Remove a collection from the map and delete its namespace document.
    /// The collection itself is untouched.
    pub fn unregister(&self, name: &str) -> Result<Option<Arc<dyn Collection>>, ServerError> {
        let Some((_, collection)) = self.collections.remove(name) else {
            return Ok(None);
        };
        self.namespaces
            .delete_documents(&doc! { "name": collection.full_name() }, 0)?;
        Ok(Some(collection))
    }

    /// Register a collection that already exists (the target half of a
    /// cross-database move).
    pub fn register(&self, name: &str, collection: Arc<dyn Collection>) -> Result<(), ServerError> {
        self.check_name(name)?;
        let _guard = self.create_lock.lock();
        self.collections
            .insert(name.to_string(), Arc::clone(&collection));
        self.add_namespace(collection.full_name())
    }

    /// The `drop` command path: unregister, delete the `system.indexes`
    /// rows, and drop backend storage. `None` when the collection is
    /// unknown.
    pub fn drop_collection(&self, name: &str) -> Result<Option<usize>, ServerError> {
        self.check_name(name)?;
        let _guard = self.create_lock.lock();
        let Some(collection) = self.unregister(name)? else {
            return Ok(None);
        };
        let n_indexes = collection.num_indexes();
        if let Some(indexes) = self.indexes.lock().as_ref() {
            indexes.delete_documents(&doc! { "ns": collection.full_name() }, 0)?;
        }
        self.backend.drop_collection(&self.database, name);
        Ok(Some(n_indexes))
    }

    /// `dropDatabase` support: forget every collection, then restore the
    /// (now empty) namespaces registration.
    pub fn drop_all(&self) -> Result<(), ServerError> {
        let _guard = self.create_lock.lock();
        self.collections.clear();
        *self.indexes.lock() = None;
        self.namespaces.delete_documents(&doc! {}, 0)?;
        self.collections
            .insert(NAMESPACES_COLLECTION.to_string(), Arc::clone(&self.namespaces));
        Ok(())
    }

    pub fn namespaces_collection(&self) -> &Arc<dyn Collection> {
        &self.namespaces
    }

    pub fn collections(&self) -> Vec<Arc<dyn Collection>> {
        self.collections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}
