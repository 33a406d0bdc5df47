use std::time::Duration;

use axum::{routing::get, Router};
use common_kafka::kafka_consumer::SingleTopicConsumer;
use common_kafka::transaction::TransactionalProducer;
use envconfig::Envconfig;
use health::HealthRegistry;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use heart_rate_zones::config::Config;
use heart_rate_zones::publisher::KafkaZoneEventPublisher;
use heart_rate_zones::serve_metrics::{serve, setup_metrics_recorder, setup_metrics_routes};
use heart_rate_zones::source::KafkaBiometricsSource;
use heart_rate_zones::worker::HeartRateZoneWorker;

const HEALTH_DEADLINE: Duration = Duration::from_secs(30);

fn setup_tracing() -> Result<(), anyhow::Error> {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy()
            .add_directive("rdkafka=warn".parse()?),
    );
    tracing_subscriber::registry().with(log_layer).init();
    Ok(())
}

pub async fn index() -> &'static str {
    "heart rate zones"
}

/// Cancels the token on ctrl+c or SIGTERM, letting the worker resolve its
/// open transaction before exiting.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
    cancel.cancel();
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    setup_tracing()?;
    info!("starting heart rate zones worker");

    let config = Config::init_from_env()?;
    info!(
        input_topic = config.consumer.kafka_consumer_topic,
        output_topic = config.producer.kafka_producer_topic,
        group_id = config.consumer.kafka_consumer_group,
        transactional_id = config.producer.kafka_transactional_id,
        "configuration loaded"
    );

    let liveness = HealthRegistry::new("liveness");
    let consumer_liveness = liveness
        .register("rdkafka_consumer".to_string(), HEALTH_DEADLINE)
        .await;
    let producer_liveness = liveness
        .register("rdkafka_producer".to_string(), HEALTH_DEADLINE)
        .await;
    let worker_liveness = liveness.register("worker".to_string(), HEALTH_DEADLINE).await;

    let consumer = SingleTopicConsumer::new(&config.kafka, &config.consumer, consumer_liveness)?;
    let producer = TransactionalProducer::from_config(
        &config.kafka,
        &config.producer.kafka_transactional_id,
        config.transaction_timeout(),
        producer_liveness,
    )?;

    let source = KafkaBiometricsSource::new(consumer);
    let publisher = KafkaZoneEventPublisher::new(producer, &config.producer.kafka_producer_topic);

    let recorder_handle = setup_metrics_recorder()?;
    let status = liveness.clone();
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || std::future::ready(status.get_status())));
    let router = setup_metrics_routes(router, recorder_handle);

    let bind = config.bind();
    tokio::task::spawn(async move {
        if let Err(e) = serve(router, &bind).await {
            error!(error = %e, bind = %bind, "failed to start health server");
        }
    });

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let worker = HeartRateZoneWorker::new(
        source,
        publisher,
        worker_liveness,
        config.failure_backoff(),
    );
    worker.run(cancel).await?;

    info!("heart rate zones worker shut down");
    Ok(())
}
