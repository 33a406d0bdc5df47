use common_kafka::kafka_producer::KafkaProduceError;
use common_kafka::transaction::TransactionError;
use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::source::SourceError;

/// Failures that stop the worker. The process is expected to exit and be
/// restarted, resuming from the last committed offsets.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to initialize producer transactions: {0}")]
    InitTransactions(#[source] KafkaError),
    #[error("failed to begin transaction: {0}")]
    Begin(#[source] TransactionError),
    #[error("failed to commit transaction: {0}")]
    Commit(#[source] TransactionError),
    #[error("failed to abort transaction after {failure}: {error}")]
    Abort {
        failure: ProcessingError,
        #[source]
        error: TransactionError,
    },
    #[error("failed to rewind to the aborted message: {0}")]
    Rewind(#[source] SourceError),
}

/// Failures of a single message. The transaction is aborted and the
/// message is delivered again.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("failed to read consumer offsets: {0}")]
    Offsets(#[source] SourceError),
    #[error("failed to add consumer offsets to transaction: {0}")]
    SendOffsets(#[source] TransactionError),
    #[error("failed to publish zone events: {0}")]
    Publish(#[from] KafkaProduceError),
    #[error("failed to commit transaction: {0}")]
    Commit(#[source] TransactionError),
    #[error("cancelled while zone events were in flight")]
    Cancelled,
}
