//! Provider abstractions for document persistence
//!
//! The pipeline only talks to the `RecordStore` trait, so the SQLite
//! adapter in `storage` can be swapped for any other backend.

pub mod record_store;

#[cfg(test)]
pub mod testing;

pub use record_store::RecordStore;
