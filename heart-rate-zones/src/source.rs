use std::fmt::Debug;

use async_trait::async_trait;
use common_kafka::kafka_consumer::{
    ConsumerOffsets, Offset, OffsetErr, RecvErr, SingleTopicConsumer,
};
use rdkafka::error::KafkaError;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::Biometrics;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("receive cancelled")]
    Cancelled,
    /// The message was consumed but holds no usable record
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("consumer offsets unavailable: {0}")]
    Offsets(#[from] OffsetErr),
    #[error("no message to rewind to")]
    NothingToRewind,
    /// A rebalance moved the partition of the message to another consumer
    #[error("partition revoked")]
    Revoked,
}

/// Where the worker pulls biometrics from. Owned by a single worker, which
/// pulls one record at a time.
#[async_trait]
pub trait BiometricsSource: Send {
    /// Read positions, as committed along with a transaction
    type Offsets: Debug + Send + Sync;

    /// Waits until a record is available. Only returns early when `cancel`
    /// fires, never because the topic is idle.
    async fn next(&mut self, cancel: &CancellationToken) -> Result<Biometrics, SourceError>;

    /// Next offset to consume for each partition, including the record
    /// returned by the last call to `next`.
    fn current_offsets(&self) -> Result<Self::Offsets, SourceError>;

    /// Makes the next call to `next` return the last delivered record again.
    /// Returns `Revoked` if the record now belongs to another consumer.
    fn rewind(&mut self) -> Result<(), SourceError>;

    /// Releases the subscription.
    fn close(&mut self);
}

pub struct KafkaBiometricsSource {
    consumer: SingleTopicConsumer,
    last_delivered: Option<Offset>,
}

impl KafkaBiometricsSource {
    pub fn new(consumer: SingleTopicConsumer) -> Self {
        Self {
            consumer,
            last_delivered: None,
        }
    }
}

#[async_trait]
impl BiometricsSource for KafkaBiometricsSource {
    type Offsets = ConsumerOffsets;

    async fn next(&mut self, cancel: &CancellationToken) -> Result<Biometrics, SourceError> {
        let (result, offset) = self.consumer.json_recv::<Biometrics>(cancel).await;
        if offset.is_some() {
            self.last_delivered = offset;
        }

        result.map_err(|e| match e {
            RecvErr::Cancelled => SourceError::Cancelled,
            RecvErr::Kafka(e) => SourceError::Kafka(e),
            RecvErr::Serde(e) => SourceError::Malformed(e.to_string()),
            RecvErr::Empty => SourceError::Malformed("empty payload".to_string()),
        })
    }

    fn current_offsets(&self) -> Result<ConsumerOffsets, SourceError> {
        Ok(self.consumer.current_offsets()?)
    }

    fn rewind(&mut self) -> Result<(), SourceError> {
        let offset = self
            .last_delivered
            .as_ref()
            .ok_or(SourceError::NothingToRewind)?;
        debug!(
            partition = offset.partition(),
            offset = offset.get_value(),
            "rewinding to the aborted message"
        );
        match offset.rewind() {
            Ok(()) => Ok(()),
            Err(OffsetErr::NotAssigned) => Err(SourceError::Revoked),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) {
        self.consumer.close();
    }
}
