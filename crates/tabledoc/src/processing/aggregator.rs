//! Fail-soft collection of worker results

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::types::{BatchOutcome, IngestionResult};

/// Single consumer of the result channel
///
/// Collects every result until the workers' completion signal has fired
/// and the channel is drained. Failures never stop collection.
pub struct ResultAggregator {
    outcome: BatchOutcome,
}

impl ResultAggregator {
    pub fn new(batch_id: Uuid) -> Self {
        Self {
            outcome: BatchOutcome::new(batch_id),
        }
    }

    /// Consume results until all workers are done and nothing is left
    pub async fn collect(
        mut self,
        mut results: mpsc::Receiver<IngestionResult>,
        mut finished: oneshot::Receiver<()>,
    ) -> BatchOutcome {
        let mut workers_done = false;

        loop {
            tokio::select! {
                biased;
                result = results.recv() => match result {
                    Some(result) => self.record(result),
                    None => break,
                },
                // A dropped latch also means the workers are gone
                _ = &mut finished, if !workers_done => {
                    workers_done = true;
                    tracing::debug!("All workers finished, draining remaining results");
                    results.close();
                }
            }
        }

        self.outcome
    }

    fn record(&mut self, result: IngestionResult) {
        tracing::debug!("Result for job {} ('{}')", result.index(), result.filename());
        match result {
            IngestionResult::Completed { document, .. } => self.outcome.documents.push(document),
            IngestionResult::Failed { failure, .. } => self.outcome.failures.push(failure),
        }
    }
}
