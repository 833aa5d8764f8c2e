//! Pool of fulfillment workers.
//!
//! This module defines the [`WorkerPool`] struct, which creates the consumer
//! group, spawns one [`FulfillmentWorker`] task per configured consumer and
//! stops them through a shared [`CancellationToken`].
//!
//! Workers pull their own work from the requests log, so unlike a push-based
//! pool there is nothing to dispatch: the pool only owns the tasks' lifetime.

use crate::server::{
    config::WorkerConfig,
    dataset::FlightCatalog,
    worker::{FulfillmentWorker, ensure_group},
};
use core::time::Duration;
use flightstream_core::{Result, log::LogStore};
use std::sync::Arc;
use tokio::{sync::Mutex, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;

struct WorkerHandle {
    consumer: String,
    task: JoinHandle<Result<()>>,
}

/// A set of running fulfillment workers sharing one shutdown token.
pub struct WorkerPool {
    workers: Mutex<Vec<WorkerHandle>>,
    consumers: Vec<String>,
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    /// Creates every configured consumer group, then spawns one worker per
    /// entry of `configs`.
    ///
    /// The groups exist once this returns, so an entry appended afterwards is
    /// delivered even when the groups start at [`StartPosition::Latest`].
    ///
    /// [`StartPosition::Latest`]: flightstream_core::log::StartPosition::Latest
    ///
    /// # Errors
    ///
    /// Returns [`flightstream_core::Error::Log`] if a group cannot be created.
    pub async fn start(
        configs: Vec<WorkerConfig>,
        log: Arc<dyn LogStore>,
        catalog: Arc<dyn FlightCatalog>,
        shutdown_token: CancellationToken,
        shutdown_timeout: Duration,
    ) -> Result<Self> {
        for config in &configs {
            ensure_group(
                log.as_ref(),
                &config.requests_stream,
                &config.group,
                config.start,
            )
            .await?;
        }

        let mut workers = Vec::with_capacity(configs.len());
        let mut consumers = Vec::with_capacity(configs.len());

        for config in configs {
            let consumer = config.consumer.clone();
            let worker = FulfillmentWorker::new(config, Arc::clone(&log), Arc::clone(&catalog));
            let task = tokio::spawn(worker.run(shutdown_token.child_token()));

            tracing::debug!(%consumer, "Spawned fulfillment worker");
            consumers.push(consumer.clone());
            workers.push(WorkerHandle { consumer, task });
        }

        Ok(Self {
            workers: Mutex::new(workers),
            consumers,
            shutdown_token,
            shutdown_timeout,
        })
    }

    /// Consumer identities of the workers, in spawn order.
    pub fn consumers(&self) -> &[String] {
        &self.consumers
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Stops every worker.
    ///
    /// - Cancels the shared [`CancellationToken`].
    /// - Waits up to `shutdown_timeout` per worker for its task to return,
    ///   aborting those that do not.
    ///
    /// Calling this more than once is harmless; later calls find no workers.
    pub async fn shutdown(&self) {
        tracing::debug!("Cancelling fulfillment workers via shutdown token");
        self.shutdown_token.cancel();

        let workers = core::mem::take(&mut *self.workers.lock().await);
        let shutdown_timeout = self.shutdown_timeout;

        let joins = workers.into_iter().map(|mut handle| async move {
            match timeout(shutdown_timeout, &mut handle.task).await {
                Ok(Ok(Ok(()))) => {
                    tracing::trace!(consumer = %handle.consumer, "Worker stopped");
                }
                Ok(Ok(Err(e))) => {
                    tracing::error!(consumer = %handle.consumer, "Worker exited with error: {e}");
                }
                Ok(Err(e)) => {
                    tracing::error!(consumer = %handle.consumer, "Worker task failed: {e}");
                }
                Err(_) => {
                    tracing::warn!(consumer = %handle.consumer, "Worker shutdown timed out, aborting");
                    handle.task.abort();
                }
            }
        });

        futures::future::join_all(joins).await;
        tracing::info!("Worker pool shutdown complete");
    }
}
