use super::processor::process_entry;
use crate::server::{
    config::WorkerConfig,
    dataset::FlightCatalog,
    telemetry::{
        increment_fulfillment_errors, increment_results_published, record_matches_per_search,
    },
};
use flightstream_core::{
    Error, Result,
    codec::encode_result,
    log::{EntryId, GroupCursor, LogEntry, LogError, LogStore, StartPosition},
    types::SearchOutcome,
};
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Entries re-read per batch while draining the pending list on startup.
const PENDING_BATCH: usize = 64;

/// Creates `group` on `stream` unless it already exists.
///
/// # Errors
///
/// Returns [`Error::Log`] for any failure other than the group existing.
pub async fn ensure_group(
    log: &dyn LogStore,
    stream: &str,
    group: &str,
    start: StartPosition,
) -> Result<()> {
    match log.create_group(stream, group, start).await {
        Ok(()) => {
            tracing::info!(%stream, %group, ?start, "Created consumer group");
            Ok(())
        }
        Err(LogError::GroupExists) => {
            tracing::debug!(%stream, %group, "Consumer group already exists");
            Ok(())
        }
        Err(e) => {
            tracing::error!(%stream, %group, "Failed to create consumer group: {e}");
            Err(Error::Log(e))
        }
    }
}

/// What a worker did with one delivered entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// A result was appended and the entry acknowledged (or an ack was at
    /// least attempted).
    Published,
    /// The entry could not be decoded. It was acknowledged so it is never
    /// redelivered.
    Skipped,
    /// The result could not be appended. The entry stays pending and is
    /// redelivered when this consumer restarts.
    Retained,
}

/// A single consumer within the fulfillment consumer group.
pub struct FulfillmentWorker {
    config: WorkerConfig,
    log: Arc<dyn LogStore>,
    catalog: Arc<dyn FlightCatalog>,
}

impl FulfillmentWorker {
    pub fn new(
        config: WorkerConfig,
        log: Arc<dyn LogStore>,
        catalog: Arc<dyn FlightCatalog>,
    ) -> Self {
        Self {
            config,
            log,
            catalog,
        }
    }

    pub fn consumer(&self) -> &str {
        &self.config.consumer
    }

    /// Runs the worker until `shutdown` is cancelled.
    ///
    /// Joins the consumer group (an existing group is fine), re-processes
    /// anything still pending for this consumer, then reads one new entry at a
    /// time. Every suspension point races the token, so shutdown is observed
    /// immediately rather than after the current blocking read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Log`] if the group cannot be created or the log is
    /// closed underneath the worker. Any other read error is logged and
    /// retried after a back-off of `read_block`.
    #[tracing::instrument(skip_all, fields(consumer = %self.config.consumer))]
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(
            stream = %self.config.requests_stream,
            group = %self.config.group,
            "Starting fulfillment worker"
        );

        self.join_group().await?;
        self.drain_pending(&shutdown).await?;

        loop {
            let batch = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                batch = self.log.read_group(
                    &self.config.requests_stream,
                    &self.config.group,
                    &self.config.consumer,
                    GroupCursor::New,
                    1,
                    self.config.read_block,
                ) => batch,
            };

            match batch {
                // Nothing arrived within `read_block`.
                Ok(entries) if entries.is_empty() => {}
                Ok(entries) => {
                    for entry in &entries {
                        tokio::select! {
                            biased;
                            () = shutdown.cancelled() => break,
                            _ = self.handle(entry) => {}
                        }
                    }
                }
                Err(LogError::Closed) => {
                    tracing::warn!("Requests log closed, stopping worker");
                    return Err(Error::Log(LogError::Closed));
                }
                Err(e) => {
                    tracing::error!("Error reading from stream: {e}");
                    increment_fulfillment_errors();
                    if self.backoff(&shutdown).await {
                        break;
                    }
                }
            }
        }

        tracing::info!("Fulfillment worker received shutdown signal, exiting loop");
        Ok(())
    }

    async fn join_group(&self) -> Result<()> {
        ensure_group(
            self.log.as_ref(),
            &self.config.requests_stream,
            &self.config.group,
            self.config.start,
        )
        .await
    }

    /// Re-processes entries delivered to this consumer but never
    /// acknowledged, paging through the pending list by id. Entries that stay
    /// pending (their result could not be published) are not retried within
    /// the same drain.
    async fn drain_pending(&self, shutdown: &CancellationToken) -> Result<()> {
        let mut after = None;
        let mut redelivered = 0_usize;

        loop {
            let batch = tokio::select! {
                biased;
                () = shutdown.cancelled() => return Ok(()),
                batch = self.log.read_group(
                    &self.config.requests_stream,
                    &self.config.group,
                    &self.config.consumer,
                    GroupCursor::Pending { after },
                    PENDING_BATCH,
                    self.config.read_block,
                ) => batch.map_err(Error::Log)?,
            };

            let Some(last) = batch.last() else {
                break;
            };
            after = Some(last.id);

            for entry in &batch {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => return Ok(()),
                    _ = self.handle(entry) => redelivered += 1,
                }
            }
        }

        if redelivered > 0 {
            tracing::info!(count = redelivered, "Re-processed pending entries");
        }
        Ok(())
    }

    /// Processes one delivered entry: fulfill, publish, acknowledge.
    pub async fn handle(&self, entry: &LogEntry) -> Disposition {
        tracing::info!(id = %entry.id, "Processing message");

        let result = match process_entry(entry, self.catalog.as_ref()).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(id = %entry.id, "Skipping malformed search request: {e}");
                increment_fulfillment_errors();
                self.ack(entry.id).await;
                return Disposition::Skipped;
            }
        };

        if let SearchOutcome::Failed { reason } = &result.outcome {
            tracing::error!(search_id = %result.search_id, "Fulfillment failed: {reason}");
            increment_fulfillment_errors();
        }

        let record = match encode_result(&result) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(search_id = %result.search_id, "Failed to encode result: {e}");
                increment_fulfillment_errors();
                return Disposition::Retained;
            }
        };

        if let Err(e) = self.log.append(&self.config.results_stream, record).await {
            tracing::error!(search_id = %result.search_id, "Failed to publish results: {e}");
            increment_fulfillment_errors();
            return Disposition::Retained;
        }

        increment_results_published(result.status());
        record_matches_per_search(result.flights().len() as f64);
        tracing::info!(
            search_id = %result.search_id,
            status = %result.status(),
            "Published flight search results"
        );

        self.ack(entry.id).await;
        Disposition::Published
    }

    async fn ack(&self, id: EntryId) {
        match self
            .log
            .ack(&self.config.requests_stream, &self.config.group, id)
            .await
        {
            Ok(true) => tracing::debug!(%id, "Message acknowledged"),
            Ok(false) => tracing::debug!(%id, "Message was not pending"),
            Err(e) => {
                tracing::error!(%id, "Failed to ack message: {e}");
                increment_fulfillment_errors();
            }
        }
    }

    /// Sleeps for `read_block`. Returns `true` if shutdown was requested
    /// meanwhile.
    async fn backoff(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            () = shutdown.cancelled() => true,
            () = sleep(self.config.read_block) => false,
        }
    }
}
