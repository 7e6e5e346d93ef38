//! Fixed-size pool of ingestion workers

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::ingestion::DocumentAssembler;
use crate::types::{FileFailure, IngestionJob, IngestionResult};

/// Workers sharing one job channel and one result channel
pub struct WorkerPool {
    assembler: Arc<DocumentAssembler>,
    size: usize,
}

impl WorkerPool {
    pub fn new(assembler: Arc<DocumentAssembler>, size: usize) -> Self {
        Self {
            assembler,
            size: size.max(1),
        }
    }

    /// Start the workers.
    ///
    /// Each worker owns a clone of `results`; the result channel closes once
    /// every worker has exited. Each handle resolves to the number of
    /// results that worker reported.
    pub fn spawn(
        &self,
        jobs: mpsc::Receiver<IngestionJob>,
        results: mpsc::Sender<IngestionResult>,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<usize>> {
        let jobs = Arc::new(Mutex::new(jobs));

        (0..self.size)
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    assembler: self.assembler.clone(),
                    jobs: jobs.clone(),
                    results: results.clone(),
                    cancel: cancel.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect()
    }
}

struct Worker {
    id: usize,
    assembler: Arc<DocumentAssembler>,
    jobs: Arc<Mutex<mpsc::Receiver<IngestionJob>>>,
    results: mpsc::Sender<IngestionResult>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) -> usize {
        let mut reported = 0;

        loop {
            let job = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                job = async { self.jobs.lock().await.recv().await } => job,
            };
            // Channel closed and drained
            let Some(job) = job else { break };

            tracing::debug!("Worker {} took '{}'", self.id, job.filename);

            let Some(result) = self.process(job).await else {
                tracing::debug!("Worker {} abandoning batch", self.id);
                break;
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                sent = self.results.send(result) => {
                    if sent.is_err() {
                        tracing::warn!("Worker {}: result channel closed", self.id);
                        break;
                    }
                    reported += 1;
                }
            }
        }

        tracing::debug!("Worker {} exiting after {} results", self.id, reported);
        reported
    }

    /// Produce the job's result, or `None` if the batch was cancelled
    async fn process(&self, job: IngestionJob) -> Option<IngestionResult> {
        let IngestionJob {
            index,
            owner_id,
            filename,
            title,
            source,
        } = job;

        let reader = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            reader = source.open(&filename) => reader,
        };

        let reader = match reader {
            Ok(reader) => reader,
            Err(e) => {
                tracing::warn!("Cannot read '{}': {}", filename, e);
                return Some(failed(index, filename, title, e, None));
            }
        };

        match self.assembler.assemble(owner_id, &title, reader, &self.cancel).await {
            Ok(document) => {
                tracing::info!(
                    "Ingested '{}' as document {} ({} headers, {} rows)",
                    filename,
                    document.id,
                    document.headers.len(),
                    document.rows.len()
                );
                Some(IngestionResult::Completed {
                    index,
                    filename,
                    document,
                })
            }
            Err(e) if e.is_cancelled() => None,
            Err(e) => {
                let error = match e.error {
                    Error::Io(io) => Error::file_unreadable(filename.as_str(), io),
                    other => other,
                };
                tracing::warn!("Failed to ingest '{}': {}", filename, error);
                Some(failed(index, filename, title, error, e.orphaned_document))
            }
        }
    }
}

fn failed(
    index: usize,
    filename: String,
    title: String,
    error: Error,
    orphaned_document: Option<uuid::Uuid>,
) -> IngestionResult {
    IngestionResult::Failed {
        index,
        failure: FileFailure {
            filename,
            title,
            kind: error.kind(),
            error: error.to_string(),
            orphaned_document,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CsvConfig, OrphanPolicy};
    use crate::error::ErrorKind;
    use crate::storage::RecordDb;
    use crate::types::FileSource;
    use bytes::Bytes;
    use uuid::Uuid;

    fn pool(size: usize) -> WorkerPool {
        let store = Arc::new(RecordDb::in_memory().unwrap());
        let assembler = DocumentAssembler::new(store, &CsvConfig::default(), OrphanPolicy::Keep).unwrap();
        WorkerPool::new(Arc::new(assembler), size)
    }

    fn job(index: usize, filename: &str, source: FileSource) -> IngestionJob {
        IngestionJob {
            index,
            owner_id: Uuid::new_v4(),
            filename: filename.to_string(),
            title: filename.to_string(),
            source,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unreadable_file_does_not_stop_worker() {
        let pool = pool(1);
        let (job_tx, job_rx) = mpsc::channel(4);
        let (result_tx, mut result_rx) = mpsc::channel(4);

        let handles = pool.spawn(job_rx, result_tx, CancellationToken::new());
        job_tx
            .send(job(0, "missing.csv", FileSource::Path("/no/such/missing.csv".into())))
            .await
            .unwrap();
        job_tx
            .send(job(1, "ok.csv", FileSource::Memory(Bytes::from_static(b"a\n1\n"))))
            .await
            .unwrap();
        drop(job_tx);

        let mut results = Vec::new();
        while let Some(result) = result_rx.recv().await {
            results.push(result);
        }
        let reported: usize = futures_util::future::join_all(handles)
            .await
            .into_iter()
            .map(|h| h.unwrap())
            .sum();

        assert_eq!(results.len(), 2);
        assert_eq!(reported, 2);
        match &results[0] {
            IngestionResult::Failed { failure, .. } => {
                assert_eq!(failure.kind, ErrorKind::FileUnreadable);
                assert_eq!(failure.filename, "missing.csv");
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(matches!(results[1], IngestionResult::Completed { .. }));
    }

    #[tokio::test]
    async fn test_workers_exit_when_channel_closes() {
        let pool = pool(3);
        let (job_tx, job_rx) = mpsc::channel::<IngestionJob>(1);
        let (result_tx, mut result_rx) = mpsc::channel(1);

        let handles = pool.spawn(job_rx, result_tx, CancellationToken::new());
        drop(job_tx);

        assert!(result_rx.recv().await.is_none());
        for handle in handles {
            assert_eq!(handle.await.unwrap(), 0);
        }
    }
}
