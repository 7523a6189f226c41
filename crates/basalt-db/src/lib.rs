mod aggregate;
mod catalog;
mod database;
mod history;

pub use basalt_backend::{
    Backend, Collection, CollectionStats, DocumentStream, Index, IndexKey, ServerError,
    UpdateOutcome,
};
pub use database::Database;
pub use history::ChannelId;
