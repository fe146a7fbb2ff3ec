//! Binary resource store
//!
//! A zip-backed key to bytes container with queued writes. Reads see pending writes
//! (preview), [`ResourceStore::apply`] commits them in one rename, and dropping the
//! store discards anything not yet applied.

mod lock;
mod resource_store;

pub use lock::StoreLock;
pub use resource_store::{ResourceStore, StagedStore, StoreMode};
