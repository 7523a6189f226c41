pub mod aggregate;
mod error;
mod matcher;
mod path;
mod projection;
mod update;
mod value;

pub use error::QueryError;
pub use matcher::matches;
pub use path::{get_path, remove_path, set_path, values_at_path};
pub use projection::project;
pub use update::{apply_update, is_update_document, upsert_document};
pub use value::{OrderedBson, cmp_bson, values_equal};
