use async_trait::async_trait;
use common_kafka::kafka_consumer::ConsumerOffsets;
use common_kafka::kafka_producer::KafkaProduceError;
use common_kafka::transaction::{TransactionError, TransactionalProducer};
use rdkafka::error::KafkaError;

use crate::types::HeartRateZoneReached;

/// Transactional output of the worker. Implementations support a single
/// open transaction at a time and are driven by one worker only.
#[async_trait]
pub trait ZoneEventProducer: Send {
    /// Read positions of the source this producer commits for
    type Offsets: Send + Sync;

    fn init_transactions(&mut self) -> Result<(), KafkaError>;

    fn begin(&mut self) -> Result<(), TransactionError>;

    /// Publishes every event concurrently and waits for all the deliveries.
    /// Fails if any one of them fails.
    async fn publish(&mut self, events: Vec<HeartRateZoneReached>)
        -> Result<(), KafkaProduceError>;

    fn send_offsets(&mut self, offsets: &Self::Offsets) -> Result<(), TransactionError>;

    fn commit(&mut self) -> Result<(), TransactionError>;

    fn abort(&mut self) -> Result<(), TransactionError>;
}

pub struct KafkaZoneEventPublisher {
    producer: TransactionalProducer,
    topic: String,
}

impl KafkaZoneEventPublisher {
    pub fn new(producer: TransactionalProducer, topic: &str) -> Self {
        Self {
            producer,
            topic: topic.to_owned(),
        }
    }
}

/// Events of a device land on the same partition, in order
fn device_key(event: &HeartRateZoneReached) -> Option<String> {
    Some(event.device_id.to_string())
}

#[async_trait]
impl ZoneEventProducer for KafkaZoneEventPublisher {
    type Offsets = ConsumerOffsets;

    fn init_transactions(&mut self) -> Result<(), KafkaError> {
        self.producer.init_transactions()
    }

    fn begin(&mut self) -> Result<(), TransactionError> {
        self.producer.begin()
    }

    async fn publish(
        &mut self,
        events: Vec<HeartRateZoneReached>,
    ) -> Result<(), KafkaProduceError> {
        self.producer
            .send_keyed_iter_to_kafka(&self.topic, device_key, events)
            .await
    }

    fn send_offsets(&mut self, offsets: &ConsumerOffsets) -> Result<(), TransactionError> {
        self.producer.send_offsets(offsets)
    }

    fn commit(&mut self) -> Result<(), TransactionError> {
        self.producer.commit()
    }

    fn abort(&mut self) -> Result<(), TransactionError> {
        self.producer.abort()
    }
}
