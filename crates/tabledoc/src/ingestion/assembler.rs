//! Builds persisted documents from decoded CSV

use std::future::Future;
use std::io::Read;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::decoder::CsvDecoder;
use crate::config::{CsvConfig, OrphanPolicy};
use crate::error::{Error, Result};
use crate::providers::RecordStore;
use crate::types::{Document, Header, RowFields};

/// Decoded rows buffered between the decoding thread and the store writes
const ROW_BUFFER: usize = 64;

/// Assembly failure, with the partial document left in the store if any
#[derive(Debug)]
pub struct AssemblyError {
    pub error: Error,
    pub orphaned_document: Option<Uuid>,
}

impl AssemblyError {
    fn clean(error: Error) -> Self {
        Self {
            error,
            orphaned_document: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.error, Error::Cancelled)
    }
}

/// Turns one file's bytes into a persisted Document
///
/// Writes go metadata first, then rows, then headers, then the committed
/// rows are read back. Nothing is retried.
pub struct DocumentAssembler {
    store: Arc<dyn RecordStore>,
    decoder: CsvDecoder,
    trim_titles: bool,
    orphan_policy: OrphanPolicy,
}

impl DocumentAssembler {
    pub fn new(store: Arc<dyn RecordStore>, csv: &CsvConfig, orphan_policy: OrphanPolicy) -> Result<Self> {
        Ok(Self {
            store,
            decoder: CsvDecoder::new(csv)?,
            trim_titles: csv.trim_titles,
            orphan_policy,
        })
    }

    /// Assemble and persist a document, decoding `reader` as rows are stored
    pub async fn assemble<R>(
        &self,
        owner_id: Uuid,
        title: &str,
        reader: R,
        cancel: &CancellationToken,
    ) -> std::result::Result<Document, AssemblyError>
    where
        R: Read + Send + 'static,
    {
        let title = if self.trim_titles { title.trim() } else { title };
        let mut document = Document::new(owner_id, title);

        let document_id = guarded(cancel, self.store.create_document(&document))
            .await
            .map_err(AssemblyError::clean)?;
        document.id = document_id;

        match self.fill(&mut document, reader, cancel).await {
            Ok(()) => Ok(document),
            Err(error) => Err(self.abandon(document_id, error).await),
        }
    }

    async fn fill<R>(&self, document: &mut Document, reader: R, cancel: &CancellationToken) -> Result<()>
    where
        R: Read + Send + 'static,
    {
        let mut records = self.decoder.stream(reader, ROW_BUFFER);

        // Positional header row; duplicates stay so that zipping keeps the later column
        let columns = match next_row(&mut records, cancel).await? {
            Some(header) => header,
            None => {
                tracing::debug!("'{}' is empty, document {} has no headers", document.title, document.id);
                return Ok(());
            }
        };

        let mut header_names: Vec<String> = Vec::with_capacity(columns.len());
        for name in &columns {
            if !header_names.contains(name) {
                header_names.push(name.clone());
            }
        }

        let mut row_count = 0usize;
        while let Some(record) = next_row(&mut records, cancel).await? {
            let fields = RowFields::from_record(&columns, &record);
            guarded(cancel, self.store.create_row(document.id, &fields)).await?;
            row_count += 1;
        }
        tracing::debug!("Stored {} rows for document {}", row_count, document.id);

        let ids = guarded(cancel, self.store.create_headers(document.id, &header_names)).await?;
        document.headers = ids
            .into_iter()
            .zip(header_names)
            .map(|(id, name)| Header {
                id,
                document_id: document.id,
                name,
            })
            .collect();

        document.rows = guarded(cancel, self.store.list_rows(document.id)).await?;
        Ok(())
    }

    /// Apply the orphan policy to a document whose assembly failed
    async fn abandon(&self, document_id: Uuid, error: Error) -> AssemblyError {
        if matches!(error, Error::Cancelled) || self.orphan_policy == OrphanPolicy::Keep {
            return AssemblyError {
                error,
                orphaned_document: Some(document_id),
            };
        }

        match self.store.delete_document(document_id).await {
            Ok(removed) => {
                tracing::debug!("Discarded partial document {} ({} rows)", document_id, removed);
                AssemblyError::clean(error)
            }
            Err(e) => {
                tracing::warn!("Failed to discard partial document {}: {}", document_id, e);
                AssemblyError {
                    error,
                    orphaned_document: Some(document_id),
                }
            }
        }
    }
}

/// Wait for the next decoded row unless the batch is cancelled first
async fn next_row(
    records: &mut mpsc::Receiver<Result<Vec<String>>>,
    cancel: &CancellationToken,
) -> Result<Option<Vec<String>>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        row = records.recv() => row.transpose(),
    }
}

/// Run a store call unless the batch is cancelled first
async fn guarded<T>(cancel: &CancellationToken, call: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = call => result,
    }
}
