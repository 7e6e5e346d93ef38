//! Record store port used by the ingestion pipeline

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{Document, Row, RowFields};

/// Trait for persisting documents, rows and headers
///
/// Implementations must be safe for concurrent use: several workers call
/// into the same store at once, usually for different documents.
///
/// Implementations:
/// - `RecordDb`: SQLite
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist document metadata. The document's `id` is the identifier
    /// used for every later call.
    async fn create_document(&self, document: &Document) -> Result<Uuid>;

    /// Persist one row, returning its identifier
    async fn create_row(&self, document_id: Uuid, fields: &RowFields) -> Result<i64>;

    /// Persist one header name, returning its identifier
    async fn create_header(&self, document_id: Uuid, name: &str) -> Result<i64>;

    /// Persist header names in order
    async fn create_headers(&self, document_id: Uuid, names: &[String]) -> Result<Vec<i64>> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            ids.push(self.create_header(document_id, name).await?);
        }
        Ok(ids)
    }

    /// All rows stored for a document, in insertion order
    async fn list_rows(&self, document_id: Uuid) -> Result<Vec<Row>>;

    /// Remove a document with its rows and headers. Returns rows removed.
    async fn delete_document(&self, document_id: Uuid) -> Result<usize>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
