//! Turns an upload batch into ingestion jobs on a bounded channel

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::types::{IngestionJob, UploadBatch};

/// Emits one job per uploaded file, in submission order
pub struct WorkDistributor {
    jobs: Vec<IngestionJob>,
}

impl WorkDistributor {
    /// Pair the i-th file with the i-th title.
    ///
    /// Fails with `BatchMalformed` when the counts differ; no job is built.
    pub fn new(batch: UploadBatch) -> Result<Self> {
        if batch.files.len() != batch.titles.len() {
            return Err(Error::BatchMalformed {
                files: batch.files.len(),
                titles: batch.titles.len(),
            });
        }

        let owner_id = batch.owner_id;
        let jobs = batch
            .files
            .into_iter()
            .zip(batch.titles)
            .enumerate()
            .map(|(index, (file, title))| IngestionJob {
                index,
                owner_id,
                filename: file.filename,
                title,
                source: file.source,
            })
            .collect();

        Ok(Self { jobs })
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Send every job, then close the channel by dropping the sender.
    ///
    /// A full channel suspends the send. Returns the number of jobs handed
    /// off, which is short of `len()` only if the batch was cancelled or
    /// every worker went away.
    pub async fn run(self, sender: mpsc::Sender<IngestionJob>, cancel: CancellationToken) -> usize {
        let total = self.jobs.len();
        let mut sent = 0;

        for job in self.jobs {
            let filename = job.filename.clone();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("Distribution cancelled after {}/{} jobs", sent, total);
                    break;
                }
                result = sender.send(job) => {
                    if result.is_err() {
                        tracing::warn!("Job channel closed before '{}' was dispatched", filename);
                        break;
                    }
                    sent += 1;
                }
            }
        }

        tracing::debug!("Dispatched {}/{} jobs", sent, total);
        sent
    }
}
