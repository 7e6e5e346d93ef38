//! Upload batches, ingestion jobs and their outcomes

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};
use std::path::PathBuf;
use uuid::Uuid;

use super::document::Document;
use crate::error::{Error, ErrorKind, Result};

/// Where an uploaded file's bytes come from
#[derive(Debug, Clone)]
pub enum FileSource {
    /// Already buffered by the upload boundary
    Memory(Bytes),
    /// On disk, read by the worker that takes the job
    Path(PathBuf),
}

impl FileSource {
    /// Open the source for streaming.
    ///
    /// Path sources are only opened here; their bytes are read by the
    /// decoder. The handle is closed when the returned reader is dropped.
    pub async fn open(&self, filename: &str) -> Result<Box<dyn Read + Send>> {
        match self {
            FileSource::Memory(data) => Ok(Box::new(Cursor::new(data.clone()))),
            FileSource::Path(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|e| Error::file_unreadable(filename, e))?;
                Ok(Box::new(file.into_std().await))
            }
        }
    }
}

/// A single uploaded file
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub source: FileSource,
}

impl UploadFile {
    pub fn from_bytes(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            source: FileSource::Memory(data.into()),
        }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            filename,
            source: FileSource::Path(path),
        }
    }
}

/// All files submitted in one request, with their titles and owner
#[derive(Debug, Clone)]
pub struct UploadBatch {
    pub owner_id: Uuid,
    pub files: Vec<UploadFile>,
    pub titles: Vec<String>,
}

impl UploadBatch {
    pub fn new(owner_id: Uuid, files: Vec<UploadFile>, titles: Vec<String>) -> Self {
        Self {
            owner_id,
            files,
            titles,
        }
    }

    /// Use each file's name as its title
    pub fn titled_by_filename(owner_id: Uuid, files: Vec<UploadFile>) -> Self {
        let titles = files.iter().map(|f| f.filename.clone()).collect();
        Self::new(owner_id, files, titles)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// One file's unit of ingestion work
#[derive(Debug)]
pub struct IngestionJob {
    /// Position in the submitted batch
    pub index: usize,
    pub owner_id: Uuid,
    pub filename: String,
    pub title: String,
    pub source: FileSource,
}

/// A file that did not make it into a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileFailure {
    pub filename: String,
    pub title: String,
    pub kind: ErrorKind,
    pub error: String,
    /// Partial document left behind, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orphaned_document: Option<Uuid>,
}

/// Outcome of a single job, produced exactly once per job
#[derive(Debug)]
pub enum IngestionResult {
    Completed {
        index: usize,
        filename: String,
        document: Document,
    },
    Failed {
        index: usize,
        failure: FileFailure,
    },
}

impl IngestionResult {
    pub fn index(&self) -> usize {
        match self {
            IngestionResult::Completed { index, .. } => *index,
            IngestionResult::Failed { index, .. } => *index,
        }
    }

    pub fn filename(&self) -> &str {
        match self {
            IngestionResult::Completed { filename, .. } => filename,
            IngestionResult::Failed { failure, .. } => &failure.filename,
        }
    }
}

/// Aggregated result of one batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub batch_id: Uuid,
    /// Successfully created documents, in completion order
    pub documents: Vec<Document>,
    /// Per-file failures, in completion order
    pub failures: Vec<FileFailure>,
    /// True if the batch was cancelled before every job concluded
    pub cancelled: bool,
    pub jobs_dispatched: usize,
    pub processing_time_ms: u64,
}

impl BatchOutcome {
    pub fn new(batch_id: Uuid) -> Self {
        Self {
            batch_id,
            documents: Vec::new(),
            failures: Vec::new(),
            cancelled: false,
            jobs_dispatched: 0,
            processing_time_ms: 0,
        }
    }

    /// Every dispatched file produced a document and nothing was cancelled
    pub fn is_complete_success(&self) -> bool {
        !self.cancelled && self.failures.is_empty()
    }

    pub fn first_failure(&self) -> Option<&FileFailure> {
        self.failures.first()
    }

    /// Number of jobs that reported a result
    pub fn concluded(&self) -> usize {
        self.documents.len() + self.failures.len()
    }

}
