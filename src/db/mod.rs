pub mod store;
pub mod memstore;
pub mod dbcolab;

pub use store::{CollabStore, StoreError};
pub use memstore::MemoryCollabStore;
pub use dbcolab::PgCollabStore;
