//! Core types for documents and ingestion batches

pub mod batch;
pub mod document;

pub use batch::{
    BatchOutcome, FileFailure, FileSource, IngestionJob, IngestionResult, UploadBatch, UploadFile,
};
pub use document::{Document, DocumentSummary, Header, Row, RowFields};
