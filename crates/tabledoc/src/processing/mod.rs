//! Concurrent ingestion: distributor, worker pool and result aggregator

mod aggregator;
mod distributor;
mod pipeline;
mod worker;

pub use aggregator::ResultAggregator;
pub use distributor::WorkDistributor;
pub use pipeline::IngestPipeline;
pub use worker::WorkerPool;
