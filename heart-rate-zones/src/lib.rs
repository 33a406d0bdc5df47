pub mod config;
pub mod error;
pub mod metrics_consts;
pub mod publisher;
pub mod serve_metrics;
pub mod source;
pub mod types;
pub mod worker;
pub mod zones;
