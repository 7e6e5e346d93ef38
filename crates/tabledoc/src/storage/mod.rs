//! Storage module for persistent data storage
//!
//! Provides SQLite-based persistence for documents, headers and rows.

mod database;

pub use database::RecordDb;
