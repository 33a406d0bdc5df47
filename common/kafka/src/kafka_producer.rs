use health::HealthHandle;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientContext;
use serde::Serialize;
use serde_json::error::Error as SerdeError;
use thiserror::Error;

pub struct KafkaContext {
    liveness: HealthHandle,
}

impl From<HealthHandle> for KafkaContext {
    fn from(value: HealthHandle) -> Self {
        KafkaContext { liveness: value }
    }
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, _: rdkafka::Statistics) {
        // Signal liveness, as the main rdkafka loop is running and calling us
        self.liveness.report_healthy_blocking();
    }
}

#[derive(Error, Debug)]
pub enum KafkaProduceError {
    #[error("failed to serialize: {error}")]
    SerializationError { error: SerdeError },
    #[error("failed to produce to kafka: {error}")]
    KafkaProduceError { error: KafkaError },
    #[error("failed to produce to kafka (timeout)")]
    KafkaProduceCanceled,
}

/// Enqueues every item before awaiting any delivery, so the records are in
/// flight together. Returns one result per item, in the passed-in order.
pub async fn send_keyed_iter_to_kafka<T, C: ClientContext + 'static>(
    kafka_producer: &FutureProducer<C>,
    topic: &str,
    key_extractor: impl Fn(&T) -> Option<String>,
    iter: impl IntoIterator<Item = T>,
) -> Vec<Result<(), KafkaProduceError>>
where
    T: Serialize,
{
    let mut results = Vec::new();
    let mut handles = Vec::new();

    for (index, item) in iter.into_iter().enumerate() {
        let key = key_extractor(&item);
        let payload = match serde_json::to_string(&item) {
            Ok(p) => p,
            Err(error) => {
                results.push((index, Err(KafkaProduceError::SerializationError { error })));
                continue;
            }
        };

        let record = FutureRecord {
            topic,
            key: key.as_deref(),
            payload: Some(&payload),
            timestamp: None,
            partition: None,
            headers: None,
        };

        match kafka_producer.send_result(record) {
            Ok(future_handle) => handles.push((index, future_handle)),
            Err((error, _)) => {
                results.push((index, Err(KafkaProduceError::KafkaProduceError { error })))
            }
        }
    }

    for (index, future_handle) in handles {
        match future_handle.await {
            Ok(Ok(_)) => results.push((index, Ok(()))),
            Ok(Err((error, _))) => {
                results.push((index, Err(KafkaProduceError::KafkaProduceError { error })))
            }
            Err(_) => results.push((index, Err(KafkaProduceError::KafkaProduceCanceled))),
        }
    }

    // Sort to return in passed-in order
    results.sort_by_key(|e| e.0);

    results.into_iter().map(|(_, r)| r).collect()
}
