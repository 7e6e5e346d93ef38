//! Concurrent batch ingestion entry point

use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::aggregator::ResultAggregator;
use super::distributor::WorkDistributor;
use super::worker::WorkerPool;
use crate::config::TabledocConfig;
use crate::error::{Error, Result};
use crate::ingestion::DocumentAssembler;
use crate::providers::RecordStore;
use crate::types::{BatchOutcome, UploadBatch};

/// Fans a batch out to the worker pool and gathers the outcome
pub struct IngestPipeline {
    assembler: Arc<DocumentAssembler>,
    config: TabledocConfig,
}

impl IngestPipeline {
    /// Build a pipeline over `store`.
    ///
    /// Fails with `ErrorKind::Config` when the configuration is invalid,
    /// including configurations built in code rather than loaded from TOML.
    pub fn new(store: Arc<dyn RecordStore>, config: TabledocConfig) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            "Ingest pipeline using '{}' store, {} workers",
            store.name(),
            config.pipeline.worker_count()
        );
        let assembler = DocumentAssembler::new(store, &config.csv, config.pipeline.orphan_policy)?;
        Ok(Self {
            assembler: Arc::new(assembler),
            config,
        })
    }

    /// Ingest every file in the batch.
    ///
    /// Returns `Err` only when the batch itself is malformed; per-file
    /// failures are reported in the outcome. Cancelling `cancel` (or hitting
    /// the configured batch timeout) stops the workers at their next
    /// suspension point, and the outcome holds whatever concluded before.
    pub async fn ingest(&self, batch: UploadBatch, cancel: CancellationToken) -> Result<BatchOutcome> {
        let start = Instant::now();
        let batch_id = Uuid::new_v4();
        let distributor = WorkDistributor::new(batch)?;
        let total = distributor.len();

        if distributor.is_empty() {
            return Ok(BatchOutcome::new(batch_id));
        }

        let pipeline = &self.config.pipeline;
        let workers = pipeline.worker_count().min(total);
        tracing::info!("Batch {}: ingesting {} files with {} workers", batch_id, total, workers);

        // Child token so a timeout does not cancel the caller's token
        let cancel = cancel.child_token();
        let timer = pipeline.batch_timeout().map(|limit| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(limit) => {
                        tracing::warn!("Batch {} timed out after {}s", batch_id, limit.as_secs());
                        cancel.cancel();
                    }
                    _ = cancel.cancelled() => {}
                }
            })
        });

        let (job_tx, job_rx) = mpsc::channel(pipeline.job_capacity());
        let (result_tx, result_rx) = mpsc::channel(pipeline.result_capacity());

        let handles = WorkerPool::new(self.assembler.clone(), workers).spawn(job_rx, result_tx, cancel.clone());
        let dispatch = tokio::spawn(distributor.run(job_tx, cancel.clone()));

        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(async move {
            for joined in join_all(handles).await {
                if let Err(e) = joined {
                    tracing::error!("Batch {}: worker task failed: {}", batch_id, e);
                }
            }
            let _ = done_tx.send(());
        });

        let mut outcome = ResultAggregator::new(batch_id).collect(result_rx, done_rx).await;

        outcome.jobs_dispatched = dispatch
            .await
            .map_err(|e| Error::internal(format!("Distributor task failed: {}", e)))?;
        outcome.cancelled = cancel.is_cancelled() && outcome.concluded() < total;
        outcome.processing_time_ms = start.elapsed().as_millis() as u64;

        if let Some(timer) = timer {
            timer.abort();
        }

        if outcome.cancelled {
            tracing::warn!(
                "Batch {} cancelled: {}/{} files concluded",
                batch_id,
                outcome.concluded(),
                total
            );
        } else {
            tracing::info!(
                "Batch {} finished in {}ms: {} documents, {} failures",
                batch_id,
                outcome.processing_time_ms,
                outcome.documents.len(),
                outcome.failures.len()
            );
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrphanPolicy;
    use crate::error::ErrorKind;
    use crate::providers::testing::FaultyStore;
    use crate::storage::RecordDb;
    use crate::types::UploadFile;
    use std::collections::HashSet;
    use std::time::Duration;

    fn config(workers: usize) -> TabledocConfig {
        let mut config = TabledocConfig::default();
        config.pipeline.workers = Some(workers);
        config.pipeline.job_channel_capacity = 2;
        config.pipeline.result_channel_capacity = 1;
        config
    }

    fn csv_with_rows(rows: usize) -> String {
        let mut csv = String::from("id,name\n");
        for i in 0..rows {
            csv.push_str(&format!("{},item-{}\n", i, i));
        }
        csv
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_one_document_per_file() {
        let db = RecordDb::in_memory().unwrap();
        let pipeline = IngestPipeline::new(Arc::new(db.clone()), config(4)).unwrap();
        let owner = Uuid::new_v4();

        let files = (0..6)
            .map(|i| UploadFile::from_bytes(format!("f{}.csv", i), csv_with_rows(i)))
            .collect();
        let outcome = pipeline
            .ingest(UploadBatch::titled_by_filename(owner, files), CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.is_complete_success());
        assert_eq!(outcome.documents.len(), 6);
        assert_eq!(outcome.jobs_dispatched, 6);
        for doc in &outcome.documents {
            let expected: usize = doc.title[1..2].parse().unwrap();
            assert_eq!(doc.rows.len(), expected, "{}", doc.title);
        }
        assert_eq!(db.list_documents(owner).unwrap().len(), 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_job_reports_exactly_once() {
        let db = RecordDb::in_memory().unwrap();
        let store = FaultyStore::new(db).row_delay(Duration::from_millis(1));
        let pipeline = IngestPipeline::new(Arc::new(store), config(3)).unwrap();

        let files: Vec<UploadFile> = (0..20)
            .map(|i| {
                let body = if i % 3 == 0 { "a,b\n1\n".to_string() } else { csv_with_rows(i % 4) };
                UploadFile::from_bytes(format!("job-{:02}.csv", i), body)
            })
            .collect();
        let outcome = pipeline
            .ingest(UploadBatch::titled_by_filename(Uuid::new_v4(), files), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.concluded(), 20);
        assert_eq!(outcome.failures.len(), 7);
        let names: HashSet<String> = outcome
            .documents
            .iter()
            .map(|d| d.title.clone())
            .chain(outcome.failures.iter().map(|f| f.filename.clone()))
            .collect();
        assert_eq!(names.len(), 20);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bad_file_does_not_affect_sibling() {
        let db = RecordDb::in_memory().unwrap();
        let pipeline = IngestPipeline::new(Arc::new(db.clone()), config(2)).unwrap();
        let batch = UploadBatch::titled_by_filename(
            Uuid::new_v4(),
            vec![
                UploadFile::from_bytes("good.csv", "a,b\n1,2\n3,4\n5,6\n"),
                UploadFile::from_bytes("bad.csv", "a,b\n1,2,3\n"),
            ],
        );

        let outcome = pipeline.ingest(batch, CancellationToken::new()).await.unwrap();

        assert_eq!(outcome.documents.len(), 1);
        assert_eq!(outcome.documents[0].rows.len(), 3);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].filename, "bad.csv");
        assert_eq!(outcome.failures[0].kind, ErrorKind::MalformedInput);

        let stored = db.get_document(outcome.documents[0].id).unwrap();
        assert_eq!(stored.rows.len(), 3);
    }

    #[tokio::test]
    async fn test_titles_shorter_than_files_persists_nothing() {
        let db = RecordDb::in_memory().unwrap();
        let pipeline = IngestPipeline::new(Arc::new(db.clone()), config(2)).unwrap();
        let owner = Uuid::new_v4();
        let batch = UploadBatch::new(
            owner,
            vec![
                UploadFile::from_bytes("a.csv", "x\n1\n"),
                UploadFile::from_bytes("b.csv", "x\n1\n"),
            ],
            vec!["a.csv".into()],
        );

        let err = pipeline.ingest(batch, CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BatchMalformed);
        assert!(db.list_documents(owner).unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_after_first_job_terminates() {
        let db = RecordDb::in_memory().unwrap();
        let store = Arc::new(
            FaultyStore::new(db)
                .stall_document("second.csv")
                .stall_document("third.csv"),
        );
        let pipeline = Arc::new(IngestPipeline::new(store.clone(), config(1)).unwrap());
        let cancel = CancellationToken::new();

        let batch = UploadBatch::titled_by_filename(
            Uuid::new_v4(),
            vec![
                UploadFile::from_bytes("first.csv", "a\n1\n"),
                UploadFile::from_bytes("second.csv", "a\n1\n"),
                UploadFile::from_bytes("third.csv", "a\n1\n"),
            ],
        );
        let running = {
            let pipeline = pipeline.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { pipeline.ingest(batch, cancel).await })
        };

        while store.stalled_calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("batch did not terminate after cancellation")
            .unwrap()
            .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.documents.len(), 1);
        assert_eq!(outcome.documents[0].title, "first.csv");
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_batch_timeout_cancels() {
        let db = RecordDb::in_memory().unwrap();
        let store = FaultyStore::new(db).stall_document("slow.csv");
        let mut config = config(2);
        config.pipeline.batch_timeout_secs = Some(1);
        let pipeline = IngestPipeline::new(Arc::new(store), config).unwrap();
        let caller = CancellationToken::new();

        let batch = UploadBatch::titled_by_filename(
            Uuid::new_v4(),
            vec![UploadFile::from_bytes("slow.csv", "a\n1\n")],
        );
        let outcome = tokio::time::timeout(Duration::from_secs(5), pipeline.ingest(batch, caller.clone()))
            .await
            .unwrap()
            .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.concluded(), 0);
        assert!(!caller.is_cancelled());
    }

    #[tokio::test]
    async fn test_same_file_twice_in_one_batch() {
        let db = RecordDb::in_memory().unwrap();
        let pipeline = IngestPipeline::new(Arc::new(db), config(2)).unwrap();
        let body = "k,v\nx,1\ny,2\n";
        let batch = UploadBatch::titled_by_filename(
            Uuid::new_v4(),
            vec![UploadFile::from_bytes("same.csv", body), UploadFile::from_bytes("same.csv", body)],
        );

        let outcome = pipeline.ingest(batch, CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.documents.len(), 2);
        assert_ne!(outcome.documents[0].id, outcome.documents[1].id);
        assert_eq!(outcome.documents[0].rows.len(), outcome.documents[1].rows.len());
    }

    #[tokio::test]
    async fn test_header_only_and_empty_files() {
        let db = RecordDb::in_memory().unwrap();
        let pipeline = IngestPipeline::new(Arc::new(db), config(2)).unwrap();
        let batch = UploadBatch::titled_by_filename(
            Uuid::new_v4(),
            vec![UploadFile::from_bytes("header.csv", "a,b\n"), UploadFile::from_bytes("empty.csv", "")],
        );

        let outcome = pipeline.ingest(batch, CancellationToken::new()).await.unwrap();
        assert!(outcome.is_complete_success());
        for doc in &outcome.documents {
            assert!(doc.rows.is_empty());
            match doc.title.as_str() {
                "header.csv" => assert_eq!(doc.header_names(), vec!["a", "b"]),
                _ => assert!(doc.headers.is_empty()),
            }
        }
    }

    #[tokio::test]
    async fn test_unreadable_path_is_reported() {
        let db = RecordDb::in_memory().unwrap();
        let pipeline = IngestPipeline::new(Arc::new(db), config(1)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.csv");
        std::fs::write(&good, "a\n1\n").unwrap();

        let batch = UploadBatch::titled_by_filename(
            Uuid::new_v4(),
            vec![UploadFile::from_path(&good), UploadFile::from_path(dir.path().join("gone.csv"))],
        );
        let outcome = pipeline.ingest(batch, CancellationToken::new()).await.unwrap();

        assert_eq!(outcome.documents.len(), 1);
        assert_eq!(outcome.failures[0].kind, ErrorKind::FileUnreadable);
        assert_eq!(outcome.failures[0].filename, "gone.csv");
    }

    #[tokio::test]
    async fn test_discard_policy_reports_no_orphan() {
        let db = RecordDb::in_memory().unwrap();
        let store = FaultyStore::new(db.clone()).fail_row_after(1);
        let mut config = config(1);
        config.pipeline.orphan_policy = OrphanPolicy::Discard;
        let pipeline = IngestPipeline::new(Arc::new(store), config).unwrap();
        let owner = Uuid::new_v4();

        let batch = UploadBatch::titled_by_filename(owner, vec![UploadFile::from_bytes("x.csv", "a\n1\n2\n")]);
        let outcome = pipeline.ingest(batch, CancellationToken::new()).await.unwrap();

        assert_eq!(outcome.failures[0].kind, ErrorKind::StorageFailure);
        assert!(outcome.failures[0].orphaned_document.is_none());
        assert!(db.list_documents(owner).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_config_rejected_before_ingest() {
        let mut bad_delimiter = config(2);
        bad_delimiter.csv.delimiter = 'é';
        let err = IngestPipeline::new(Arc::new(RecordDb::in_memory().unwrap()), bad_delimiter)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);

        let err = IngestPipeline::new(Arc::new(RecordDb::in_memory().unwrap()), config(0))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let db = RecordDb::in_memory().unwrap();
        let pipeline = IngestPipeline::new(Arc::new(db), config(2)).unwrap();
        let outcome = pipeline
            .ingest(UploadBatch::new(Uuid::new_v4(), Vec::new(), Vec::new()), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.concluded(), 0);
        assert!(outcome.is_complete_success());
    }
}
