use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

use health::HealthHandle;
use rdkafka::{
    consumer::{
        BaseConsumer, Consumer, ConsumerContext, ConsumerGroupMetadata, Rebalance, StreamConsumer,
    },
    error::KafkaError,
    ClientConfig, ClientContext, Message, Offset as KafkaOffset, TopicPartitionList,
};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConsumerConfig, KafkaConfig};

const SEEK_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ConsumerContextWithLiveness {
    liveness: HealthHandle,
}

impl From<HealthHandle> for ConsumerContextWithLiveness {
    fn from(liveness: HealthHandle) -> Self {
        Self { liveness }
    }
}

impl ClientContext for ConsumerContextWithLiveness {
    fn stats(&self, _: rdkafka::Statistics) {
        // Signal liveness, as the main rdkafka loop is running and calling us
        self.liveness.report_healthy_blocking();
    }
}

impl ConsumerContext for ConsumerContextWithLiveness {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(partitions) => {
                info!("revoking {} partitions", partitions.count())
            }
            Rebalance::Assign(partitions) => {
                info!("assigning {} partitions", partitions.count())
            }
            Rebalance::Error(e) => warn!("rebalance error: {}", e),
        }
    }
}

#[derive(Clone)]
pub struct SingleTopicConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    consumer: StreamConsumer<ConsumerContextWithLiveness>,
    topic: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RecvErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Received empty payload")]
    Empty,
    #[error("Receive cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum OffsetErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Consumer gone")]
    Gone,
    #[error("Consumer has no group metadata")]
    NoGroupMetadata,
    #[error("Partition is no longer assigned to this consumer")]
    NotAssigned,
}

/// The read positions of a consumer, in the form a transactional producer
/// needs to commit them as part of a transaction.
pub struct ConsumerOffsets {
    pub positions: TopicPartitionList,
    pub metadata: ConsumerGroupMetadata,
}

impl ConsumerOffsets {
    /// Next offset to consume, per partition
    pub fn by_partition(&self) -> BTreeMap<i32, i64> {
        next_offsets(&self.positions)
    }
}

impl fmt::Debug for ConsumerOffsets {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.by_partition())
    }
}

impl SingleTopicConsumer {
    pub fn new(
        common_config: &KafkaConfig,
        consumer_config: &ConsumerConfig,
        liveness: HealthHandle,
    ) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &common_config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            )
            // Offsets only ever move through a producer transaction
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            // Never read aborted output of an upstream transactional producer
            .set("isolation.level", "read_committed");

        if common_config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka consumer configuration: {:?}", client_config);
        let consumer: StreamConsumer<ConsumerContextWithLiveness> =
            client_config.create_with_context(liveness.into())?;
        consumer.subscribe(&[consumer_config.kafka_consumer_topic.as_str()])?;

        let inner = Inner {
            consumer,
            topic: consumer_config.kafka_consumer_topic.clone(),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Waits for the next message and deserializes its payload. Waiting only
    /// ends on a message, a client error or cancellation, never on an idle topic.
    ///
    /// The returned offset points at the received message, even when the
    /// payload could not be decoded, so that callers can decide to skip it.
    pub async fn json_recv<T>(
        &self,
        cancel: &CancellationToken,
    ) -> (Result<T, RecvErr>, Option<Offset>)
    where
        T: DeserializeOwned,
    {
        let message = tokio::select! {
            _ = cancel.cancelled() => return (Err(RecvErr::Cancelled), None),
            received = self.inner.consumer.recv() => match received {
                Ok(message) => message,
                Err(e) => return (Err(RecvErr::Kafka(e)), None),
            },
        };

        let offset = Offset {
            handle: Arc::downgrade(&self.inner),
            partition: message.partition(),
            offset: message.offset(),
        };

        let Some(payload) = message.payload() else {
            return (Err(RecvErr::Empty), Some(offset));
        };

        (
            serde_json::from_slice(payload).map_err(RecvErr::Serde),
            Some(offset),
        )
    }

    /// Current read position of every assigned partition that has one.
    pub fn current_offsets(&self) -> Result<ConsumerOffsets, OffsetErr> {
        let positions = self.inner.consumer.position()?;
        let metadata = self
            .inner
            .consumer
            .group_metadata()
            .ok_or(OffsetErr::NoGroupMetadata)?;

        let mut valid = TopicPartitionList::new();
        for elem in positions.elements() {
            if let KafkaOffset::Offset(next) = elem.offset() {
                valid.add_partition_offset(
                    elem.topic(),
                    elem.partition(),
                    KafkaOffset::Offset(next),
                )?;
            }
        }

        Ok(ConsumerOffsets {
            positions: valid,
            metadata,
        })
    }

    /// Leaves the consumer group, so its partitions get reassigned to the
    /// other members right away instead of after the session timeout.
    pub fn close(&self) {
        info!("unsubscribing from {}", self.inner.topic);
        self.inner.consumer.unsubscribe();
    }
}

impl Inner {
    fn is_assigned(&self, partition: i32) -> Result<bool, KafkaError> {
        let assignment = self.consumer.assignment()?;
        Ok(assignment.find_partition(&self.topic, partition).is_some())
    }
}

pub fn next_offsets(positions: &TopicPartitionList) -> BTreeMap<i32, i64> {
    positions
        .elements()
        .iter()
        .filter_map(|elem| match elem.offset() {
            KafkaOffset::Offset(next) => Some((elem.partition(), next)),
            _ => None,
        })
        .collect()
}

pub struct Offset {
    handle: Weak<Inner>,
    partition: i32,
    offset: i64,
}

impl Offset {
    /// Moves the read position of the partition back to this message, so
    /// that the next receive delivers it again.
    ///
    /// Fails with `NotAssigned` if a rebalance took the partition away: its
    /// new owner resumes from the committed offset, so nothing is lost.
    pub fn rewind(&self) -> Result<(), OffsetErr> {
        let inner = self.handle.upgrade().ok_or(OffsetErr::Gone)?;
        if !inner.is_assigned(self.partition)? {
            return Err(OffsetErr::NotAssigned);
        }

        let sought = inner.consumer.seek(
            &inner.topic,
            self.partition,
            KafkaOffset::Offset(self.offset),
            SEEK_TIMEOUT,
        );
        if let Err(e) = sought {
            // Revoked between the check and the seek
            if !inner.is_assigned(self.partition)? {
                return Err(OffsetErr::NotAssigned);
            }
            return Err(e.into());
        }
        Ok(())
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn get_value(&self) -> i64 {
        self.offset
    }
}

impl fmt::Debug for Offset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ partition: {}, offset: {} }}",
            self.partition, self.offset
        )
    }
}
