mod backend;
mod collection;
mod index;

pub use backend::MemoryBackend;
pub use collection::MemoryCollection;
pub use index::MemoryUniqueIndex;

pub(crate) type Registry = dashmap::DashMap<String, std::sync::Arc<MemoryCollection>>;
