pub mod draft_store;
pub mod persistence;

pub use draft_store::{DraftError, DraftStore, INTERRUPTED_REASON};
pub use persistence::{
    drafts_key, DraftPersistence, InMemoryPersistence, SqlitePersistence, StorageConfig,
};
