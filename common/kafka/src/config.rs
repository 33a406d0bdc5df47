use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "10000000")]
    pub kafka_producer_queue_messages: u32, // Maximum number of messages in the in-memory producer queue

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,
}

#[derive(Envconfig, Clone)]
pub struct ConsumerConfig {
    #[envconfig(default = "heart-rate-zones")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "BiometricsImported")]
    pub kafka_consumer_topic: String,

    // We default to "earliest" for this, but if you're bringing up a new service, you probably want "latest"
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest
}

#[derive(Envconfig, Clone)]
pub struct TransactionalProducerConfig {
    #[envconfig(default = "HeartRateZoneReached")]
    pub kafka_producer_topic: String,

    // Must be unique per running replica, brokers fence producers sharing an id
    #[envconfig(default = "heart-rate-zones")]
    pub kafka_transactional_id: String,

    #[envconfig(default = "30000")]
    pub transaction_timeout_ms: u64, // Used for init, offset association, commit and abort
}
