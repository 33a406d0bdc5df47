use std::time::Duration;

use envconfig::Envconfig;

pub use common_kafka::config::{ConsumerConfig, KafkaConfig, TransactionalProducerConfig};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "::")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub consumer: ConsumerConfig,

    #[envconfig(nested = true)]
    pub producer: TransactionalProducerConfig,

    // Pause before pulling a message again after its transaction was aborted
    #[envconfig(default = "1000")]
    pub failure_backoff_ms: u64,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.producer.transaction_timeout_ms)
    }

    pub fn failure_backoff(&self) -> Duration {
        Duration::from_millis(self.failure_backoff_ms)
    }
}
