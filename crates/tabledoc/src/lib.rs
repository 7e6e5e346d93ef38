//! tabledoc: concurrent bulk CSV ingestion into a document store
//!
//! Each uploaded CSV file becomes a Document: its header row becomes the
//! column list and every following row is stored as a header-to-value
//! mapping. A batch of files is fanned out to a bounded worker pool and the
//! per-file outcomes are gathered into one `BatchOutcome`, with failures
//! reported per file instead of aborting the batch.
//!
//! Persistence goes through the `RecordStore` trait; `RecordDb` is the
//! SQLite implementation and also provides retrieval, row editing and
//! search.

pub mod config;
pub mod error;
pub mod ingestion;
pub mod processing;
pub mod providers;
pub mod storage;
pub mod types;

pub use config::TabledocConfig;
pub use error::{Error, ErrorKind, Result};
pub use processing::IngestPipeline;
pub use providers::RecordStore;
pub use storage::RecordDb;
pub use types::{
    BatchOutcome, Document, DocumentSummary, FileFailure, FileSource, Header, Row, RowFields,
    UploadBatch, UploadFile,
};

/// Re-exported for callers driving cancellation
pub use tokio_util::sync::CancellationToken;
