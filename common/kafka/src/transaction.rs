use std::time::Duration;

use health::HealthHandle;
use rdkafka::{
    error::KafkaError,
    producer::{FutureProducer, Producer},
    ClientConfig,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
    config::KafkaConfig,
    kafka_consumer::ConsumerOffsets,
    kafka_producer::{send_keyed_iter_to_kafka, KafkaContext, KafkaProduceError},
};

#[derive(Error, Debug)]
pub enum TransactionError {
    /// The open transaction can no longer commit, it must be aborted
    #[error("transaction must be aborted: {0}")]
    Abortable(KafkaError),
    /// The producer is unusable and must be recreated
    #[error("transactional producer failed: {0}")]
    Fatal(KafkaError),
}

impl TransactionError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransactionError::Fatal(_))
    }
}

impl From<KafkaError> for TransactionError {
    fn from(error: KafkaError) -> Self {
        match &error {
            KafkaError::Transaction(rd) if rd.txn_requires_abort() => {
                TransactionError::Abortable(error)
            }
            _ => TransactionError::Fatal(error),
        }
    }
}

/// A producer holding a transactional id. It supports one open transaction
/// at a time, so it must only ever be driven by a single loop.
pub struct TransactionalProducer {
    inner: FutureProducer<KafkaContext>,
    timeout: Duration,
}

impl TransactionalProducer {
    pub fn from_config(
        config: &KafkaConfig,
        transactional_id: &str,
        timeout: Duration,
        liveness: HealthHandle,
    ) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("linger.ms", config.kafka_producer_linger_ms.to_string())
            // Deliveries have to resolve within the transaction
            .set(
                "message.timeout.ms",
                u128::from(config.kafka_message_timeout_ms)
                    .min(timeout.as_millis())
                    .to_string(),
            )
            .set(
                "compression.codec",
                config.kafka_compression_codec.to_owned(),
            )
            .set(
                "queue.buffering.max.kbytes",
                (config.kafka_producer_queue_mib * 1024).to_string(),
            )
            .set(
                "queue.buffering.max.messages",
                config.kafka_producer_queue_messages.to_string(),
            )
            .set("transactional.id", transactional_id)
            .set("transaction.timeout.ms", timeout.as_millis().to_string());

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka configuration: {:?}", client_config);
        let api: FutureProducer<KafkaContext> =
            client_config.create_with_context(liveness.into())?;

        // "Ping" the Kafka brokers by requesting metadata
        match api
            .client()
            .fetch_metadata(None, std::time::Duration::from_secs(15))
        {
            Ok(metadata) => {
                info!(
                    "Successfully connected to Kafka brokers. Found {} topics.",
                    metadata.topics().len()
                );
            }
            Err(error) => {
                error!("Failed to fetch metadata from Kafka brokers: {:?}", error);
                return Err(error);
            }
        }

        Ok(TransactionalProducer {
            inner: api,
            timeout,
        })
    }

    /// Registers the transactional id with the brokers, fencing off any
    /// previous producer using it. Only needed once per producer.
    pub fn init_transactions(&self) -> Result<(), KafkaError> {
        self.inner.init_transactions(self.timeout)
    }

    pub fn begin(&self) -> Result<(), TransactionError> {
        Ok(self.inner.begin_transaction()?)
    }

    pub async fn send_keyed_iter_to_kafka<D>(
        &self,
        topic: &str,
        key_extractor: impl Fn(&D) -> Option<String>,
        iter: impl IntoIterator<Item = D>,
    ) -> Result<(), KafkaProduceError>
    where
        D: Serialize,
    {
        send_keyed_iter_to_kafka(&self.inner, topic, key_extractor, iter)
            .await
            .into_iter()
            .collect()
    }

    /// Adds the consumer positions to the open transaction: they get
    /// committed to the consumer group if, and only if, the transaction is.
    pub fn send_offsets(&self, offsets: &ConsumerOffsets) -> Result<(), TransactionError> {
        if offsets.positions.count() == 0 {
            return Ok(());
        }
        Ok(self.inner.send_offsets_to_transaction(
            &offsets.positions,
            &offsets.metadata,
            self.timeout,
        )?)
    }

    pub fn commit(&self) -> Result<(), TransactionError> {
        Ok(self.inner.commit_transaction(self.timeout)?)
    }

    pub fn abort(&self) -> Result<(), TransactionError> {
        Ok(self.inner.abort_transaction(self.timeout)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use health::HealthRegistry;
    use rdkafka::mocking::MockCluster;
    use rdkafka::producer::DefaultProducerContext;
    use serde_json::{json, Value};

    const TOPIC: &str = "HeartRateZoneReached";

    async fn start_on_mocked_cluster() -> (
        MockCluster<'static, DefaultProducerContext>,
        TransactionalProducer,
    ) {
        let registry = HealthRegistry::new("liveness");
        let handle = registry
            .register("producer".to_string(), Duration::from_secs(30))
            .await;
        let cluster = MockCluster::new(1).expect("failed to create mock brokers");
        cluster
            .create_topic(TOPIC, 1, 1)
            .expect("failed to create mock topic");

        let config = KafkaConfig {
            kafka_producer_linger_ms: 0,
            kafka_producer_queue_mib: 50,
            kafka_producer_queue_messages: 1000,
            kafka_message_timeout_ms: 5000,
            kafka_compression_codec: "none".to_string(),
            kafka_tls: false,
            kafka_hosts: cluster.bootstrap_servers(),
        };
        let producer = TransactionalProducer::from_config(
            &config,
            "heart-rate-zones-test",
            Duration::from_secs(10),
            handle,
        )
        .expect("failed to create transactional producer");
        (cluster, producer)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn commit_and_abort_transactions() {
        let (_cluster, producer) = start_on_mocked_cluster().await;
        producer
            .init_transactions()
            .expect("failed to init transactions");

        producer.begin().expect("failed to begin transaction");
        producer
            .send_keyed_iter_to_kafka(
                TOPIC,
                |v: &Value| v["DeviceId"].as_str().map(str::to_owned),
                vec![json!({"DeviceId": "a"}), json!({"DeviceId": "b"})],
            )
            .await
            .expect("failed to produce in transaction");
        producer.commit().expect("failed to commit transaction");

        // The producer is reusable once the previous transaction resolved
        producer.begin().expect("failed to begin second transaction");
        producer
            .send_keyed_iter_to_kafka(TOPIC, |_: &Value| None, vec![json!({"DeviceId": "c"})])
            .await
            .expect("failed to produce in transaction");
        producer.abort().expect("failed to abort transaction");
    }

    #[test]
    fn non_transactional_errors_are_fatal() {
        let error = TransactionError::from(KafkaError::Canceled);
        assert!(error.is_fatal());
    }
}
