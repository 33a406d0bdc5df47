use std::time::{Duration, Instant};

use health::HealthHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ProcessingError, WorkerError};
use crate::metrics_consts::{
    MESSAGES_RECEIVED, PROCESSING_DURATION, RECEIVE_ERRORS, TRANSACTIONS, ZONE_EVENTS_PUBLISHED,
};
use crate::publisher::ZoneEventProducer;
use crate::source::{BiometricsSource, SourceError};
use crate::types::{Biometrics, HeartRateZoneReached};
use crate::zones::zone_events;

const LIVENESS_INTERVAL: Duration = Duration::from_secs(10);
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Progress of the transaction of the message being handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    TransactionBegun,
    EventsInFlight,
    Committed,
    Aborted,
}

enum Failure {
    /// The transaction was aborted, the message has to be delivered again
    Aborted(ProcessingError),
    Fatal(WorkerError),
}

/// Reads biometrics, and publishes the zone events of each record in a
/// transaction that also commits the record's offset.
///
/// Messages are handled one at a time: the producer supports one open
/// transaction only, so a transaction is always resolved before the next
/// message is pulled.
pub struct HeartRateZoneWorker<S, P> {
    source: S,
    producer: P,
    liveness: HealthHandle,
    failure_backoff: Duration,
    state: TransactionState,
}

impl<S, P> HeartRateZoneWorker<S, P>
where
    S: BiometricsSource,
    P: ZoneEventProducer<Offsets = S::Offsets>,
{
    pub fn new(source: S, producer: P, liveness: HealthHandle, failure_backoff: Duration) -> Self {
        Self {
            source,
            producer,
            liveness,
            failure_backoff,
            state: TransactionState::Idle,
        }
    }

    /// Runs until `cancel` fires or a fatal error happens. The transaction
    /// in progress when cancellation is requested is resolved first.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), WorkerError> {
        let result = self.consume(&cancel).await;
        self.source.close();
        info!("heart rate zone worker stopped");
        result
    }

    async fn consume(&mut self, cancel: &CancellationToken) -> Result<(), WorkerError> {
        self.producer
            .init_transactions()
            .map_err(WorkerError::InitTransactions)?;
        info!("producer transactions initialized");

        let mut liveness_tick = tokio::time::interval(LIVENESS_INTERVAL);
        liveness_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !cancel.is_cancelled() {
            let received = tokio::select! {
                received = self.source.next(cancel) => received,
                _ = liveness_tick.tick() => {
                    self.liveness.report_healthy().await;
                    continue;
                }
            };
            self.liveness.report_healthy().await;

            let biometrics = match received {
                Ok(biometrics) => {
                    metrics::counter!(MESSAGES_RECEIVED, "record" => "valid").increment(1);
                    Some(biometrics)
                }
                Err(SourceError::Cancelled) => break,
                // Committed with no events, so that the offset moves past it
                Err(SourceError::Malformed(reason)) => {
                    warn!(reason = %reason, "skipping malformed biometrics message");
                    metrics::counter!(MESSAGES_RECEIVED, "record" => "malformed").increment(1);
                    None
                }
                Err(e) => {
                    // The client retries on its own, keep waiting
                    warn!(error = %e, "error while waiting for biometrics");
                    metrics::counter!(RECEIVE_ERRORS).increment(1);
                    pause(cancel, RECEIVE_ERROR_BACKOFF).await;
                    continue;
                }
            };

            match self.process(biometrics.as_ref(), cancel).await {
                Ok(()) => {}
                Err(Failure::Fatal(e)) => return Err(e),
                Err(Failure::Aborted(ProcessingError::Cancelled)) => {
                    info!("transaction aborted on shutdown, message will be consumed again");
                    self.rewind()?;
                }
                Err(Failure::Aborted(e)) => {
                    error!(error = %e, "transaction aborted, message will be delivered again");
                    self.rewind()?;
                    pause(cancel, self.failure_backoff).await;
                }
            }
            self.transition(TransactionState::Idle);
        }

        Ok(())
    }

    fn rewind(&mut self) -> Result<(), WorkerError> {
        match self.source.rewind() {
            Ok(()) => Ok(()),
            // The new owner reads it from the committed offset
            Err(SourceError::Revoked) => {
                warn!("partition revoked after abort, message left to its new owner");
                Ok(())
            }
            Err(e) => Err(WorkerError::Rewind(e)),
        }
    }

    /// Handles one message in its own transaction: either its zone events
    /// and its offset are committed together, or neither is.
    async fn process(
        &mut self,
        biometrics: Option<&Biometrics>,
        cancel: &CancellationToken,
    ) -> Result<(), Failure> {
        let started = Instant::now();
        let device_id = biometrics.map(|b| b.device_id);
        let events = biometrics.map(zone_events).unwrap_or_default();
        let zones: Vec<_> = events.iter().map(|event| event.zone).collect();

        self.producer
            .begin()
            .map_err(|e| Failure::Fatal(WorkerError::Begin(e)))?;
        self.transition(TransactionState::TransactionBegun);

        if let Err(failure) = self.send(events, cancel).await {
            return Err(self.abort(failure, started));
        }

        match self.producer.commit() {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(Failure::Fatal(WorkerError::Commit(e))),
            Err(e) => return Err(self.abort(ProcessingError::Commit(e), started)),
        }
        self.transition(TransactionState::Committed);

        metrics::counter!(TRANSACTIONS, "outcome" => "committed").increment(1);
        metrics::histogram!(PROCESSING_DURATION).record(started.elapsed().as_secs_f64());
        for zone in &zones {
            metrics::counter!(ZONE_EVENTS_PUBLISHED, "zone" => zone.as_str()).increment(1);
        }
        info!(device_id = ?device_id, events = zones.len(), "transaction committed");
        Ok(())
    }

    async fn send(
        &mut self,
        events: Vec<HeartRateZoneReached>,
        cancel: &CancellationToken,
    ) -> Result<(), ProcessingError> {
        let offsets = self
            .source
            .current_offsets()
            .map_err(ProcessingError::Offsets)?;
        self.producer
            .send_offsets(&offsets)
            .map_err(ProcessingError::SendOffsets)?;

        self.transition(TransactionState::EventsInFlight);
        debug!(offsets = ?offsets, events = events.len(), "publishing zone events");

        tokio::select! {
            biased;
            published = self.producer.publish(events) => Ok(published?),
            _ = cancel.cancelled() => Err(ProcessingError::Cancelled),
        }
    }

    fn abort(&mut self, failure: ProcessingError, started: Instant) -> Failure {
        if let Err(error) = self.producer.abort() {
            return Failure::Fatal(WorkerError::Abort { failure, error });
        }
        self.transition(TransactionState::Aborted);

        metrics::counter!(TRANSACTIONS, "outcome" => "aborted").increment(1);
        metrics::histogram!(PROCESSING_DURATION).record(started.elapsed().as_secs_f64());
        Failure::Aborted(failure)
    }

    fn transition(&mut self, next: TransactionState) {
        debug!(from = ?self.state, to = ?next, "transaction state");
        self.state = next;
    }
}

async fn pause(cancel: &CancellationToken, duration: Duration) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}
