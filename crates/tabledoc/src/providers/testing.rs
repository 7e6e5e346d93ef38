//! Fault-injecting record store for pipeline tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

use super::RecordStore;
use crate::error::{Error, Result};
use crate::storage::RecordDb;
use crate::types::{Document, Row, RowFields};

/// Wraps a `RecordDb` and fails, slows down or stalls selected calls
pub struct FaultyStore {
    inner: RecordDb,
    failing_titles: Vec<String>,
    stalling_titles: Vec<String>,
    fail_row_after: Option<usize>,
    fail_headers: bool,
    row_delay: Option<Duration>,
    rows_per_document: Mutex<HashMap<Uuid, usize>>,
    stalled: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: RecordDb) -> Self {
        Self {
            inner,
            failing_titles: Vec::new(),
            stalling_titles: Vec::new(),
            fail_row_after: None,
            fail_headers: false,
            row_delay: None,
            rows_per_document: Mutex::new(HashMap::new()),
            stalled: AtomicUsize::new(0),
        }
    }

    /// `create_document` fails for this title
    pub fn fail_document(mut self, title: &str) -> Self {
        self.failing_titles.push(title.to_string());
        self
    }

    /// `create_document` never completes for this title
    pub fn stall_document(mut self, title: &str) -> Self {
        self.stalling_titles.push(title.to_string());
        self
    }

    /// Every document accepts `n` rows, then row writes fail
    pub fn fail_row_after(mut self, n: usize) -> Self {
        self.fail_row_after = Some(n);
        self
    }

    /// Header writes fail
    pub fn fail_headers(mut self) -> Self {
        self.fail_headers = true;
        self
    }

    /// Sleep before every row write
    pub fn row_delay(mut self, delay: Duration) -> Self {
        self.row_delay = Some(delay);
        self
    }

    /// Calls currently parked by `stall_document`
    pub fn stalled_calls(&self) -> usize {
        self.stalled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for FaultyStore {
    async fn create_document(&self, document: &Document) -> Result<Uuid> {
        if self.failing_titles.contains(&document.title) {
            return Err(Error::storage(format!("injected failure for '{}'", document.title)));
        }
        if self.stalling_titles.contains(&document.title) {
            self.stalled.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
        }
        self.inner.create_document(document).await
    }

    async fn create_row(&self, document_id: Uuid, fields: &RowFields) -> Result<i64> {
        if let Some(delay) = self.row_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(limit) = self.fail_row_after {
            let mut counts = self.rows_per_document.lock();
            let count = counts.entry(document_id).or_insert(0);
            if *count >= limit {
                return Err(Error::storage("injected row failure"));
            }
            *count += 1;
        }
        self.inner.create_row(document_id, fields).await
    }

    async fn create_header(&self, document_id: Uuid, name: &str) -> Result<i64> {
        if self.fail_headers {
            return Err(Error::storage("injected header failure"));
        }
        self.inner.create_header(document_id, name).await
    }

    async fn list_rows(&self, document_id: Uuid) -> Result<Vec<Row>> {
        RecordStore::list_rows(&self.inner, document_id).await
    }

    async fn delete_document(&self, document_id: Uuid) -> Result<usize> {
        RecordStore::delete_document(&self.inner, document_id).await
    }

    fn name(&self) -> &str {
        "faulty"
    }
}
