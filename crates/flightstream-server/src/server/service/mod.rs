//! HTTP service and process lifecycle.
//!
//! ## Structure
//!
//! - [`FlightService`] - Owns the log, the publisher, the worker pool and the
//!   shutdown tokens; everything a request handler needs.
//! - [`handler`] - axum routes and handlers.

pub mod handler;

pub use handler::router;

use crate::server::{
    config::ServerConfig,
    dataset::{FlightCatalog, JsonFileCatalog},
    pool::manager::WorkerPool,
    publisher::RequestPublisher,
    streaming::{ResultTailer, StreamGuard, into_sse},
};
use axum::response::sse::{Event, Sse};
use core::{convert::Infallible, time::Duration};
use flightstream_core::{
    Error, Result,
    log::{FileLog, InMemoryLog, LogStore},
    types::{SearchCriteria, SearchId},
};
use futures::Stream;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use tokio::{sync::mpsc, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// The flight search service.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct FlightService {
    inner: Arc<Inner>,
}

struct Inner {
    config: ServerConfig,
    log: Arc<dyn LogStore>,
    publisher: RequestPublisher,
    tailer: ResultTailer,
    pool: WorkerPool,
    /// Parent of every per-stream token.
    streams_token: CancellationToken,
    shutdown_token: CancellationToken,
    streams_inflight: Arc<AtomicUsize>,
    serving: AtomicBool,
}

impl FlightService {
    /// Builds the service and starts its fulfillment workers.
    ///
    /// The consumer group exists once this returns, so a search submitted
    /// right away is delivered whatever `group_start` is.
    ///
    /// # Errors
    ///
    /// [`Error::Log`] if the consumer group cannot be created.
    pub async fn start(
        config: ServerConfig,
        log: Arc<dyn LogStore>,
        catalog: Arc<dyn FlightCatalog>,
    ) -> Result<Self> {
        let shutdown_token = CancellationToken::new();

        let publisher = RequestPublisher::new(Arc::clone(&log), config.requests_stream.clone());
        let tailer = ResultTailer::new(
            Arc::clone(&log),
            config.results_stream.clone(),
            config.read_block,
        );
        let pool = WorkerPool::start(
            config.worker_configs(),
            Arc::clone(&log),
            catalog,
            shutdown_token.child_token(),
            config.shutdown_timeout,
        )
        .await?;

        Ok(Self {
            inner: Arc::new(Inner {
                streams_token: shutdown_token.child_token(),
                shutdown_token,
                config,
                log,
                publisher,
                tailer,
                pool,
                streams_inflight: Arc::new(AtomicUsize::new(0)),
                serving: AtomicBool::new(true),
            }),
        })
    }

    /// Builds the service over the JSON catalog at `config.dataset_path` and
    /// a log journaled under `config.log_dir`, or an in-process log when no
    /// directory is configured.
    ///
    /// # Errors
    ///
    /// [`Error::Log`] if the journal cannot be opened or replayed, or the
    /// consumer group cannot be created.
    pub async fn from_config(config: ServerConfig) -> Result<Self> {
        let catalog = Arc::new(JsonFileCatalog::new(config.dataset_path.clone()));
        let log: Arc<dyn LogStore> = match &config.log_dir {
            Some(dir) => Arc::new(FileLog::open(dir)?),
            None => Arc::new(InMemoryLog::new()),
        };
        Self::start(config, log, catalog).await
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn log(&self) -> &Arc<dyn LogStore> {
        &self.inner.log
    }

    pub fn is_serving(&self) -> bool {
        self.inner.serving.load(Ordering::Acquire)
    }

    pub fn streams_inflight(&self) -> usize {
        self.inner.streams_inflight.load(Ordering::Relaxed)
    }

    /// Validates and publishes a search.
    ///
    /// # Errors
    ///
    /// [`Error::ServiceShutdown`] once shutdown has begun, otherwise see
    /// [`RequestPublisher::submit`].
    pub async fn submit(&self, criteria: &SearchCriteria) -> Result<SearchId> {
        if !self.is_serving() {
            return Err(Error::ServiceShutdown);
        }
        self.inner.publisher.submit(criteria).await
    }

    /// Opens a live result stream for `search_id`.
    ///
    /// Spawns the stream's tailer and returns the SSE response that drains
    /// it. The tailer's token is a child of the service's stream token and is
    /// cancelled when the response is dropped.
    ///
    /// # Errors
    ///
    /// [`Error::ServiceShutdown`] once shutdown has begun.
    pub fn open_stream(
        &self,
        search_id: SearchId,
    ) -> Result<Sse<impl Stream<Item = core::result::Result<Event, Infallible>> + Send + use<>>> {
        if !self.is_serving() {
            return Err(Error::ServiceShutdown);
        }

        let (tx, rx) = mpsc::channel(self.inner.config.stream_buffer_size);
        let cancel = self.inner.streams_token.child_token();
        let guard = StreamGuard::new(
            search_id.clone(),
            cancel.clone().drop_guard(),
            Arc::clone(&self.inner.streams_inflight),
        );

        let tailer = self.inner.tailer.clone();
        let span = tracing::info_span!("stream", %search_id);
        tokio::spawn(
            async move {
                let exit = tailer.tail(search_id, tx, cancel).await;
                tracing::debug!(?exit, "Tailer stopped");
            }
            .instrument(span),
        );

        Ok(into_sse(rx, guard, self.inner.config.keepalive))
    }

    /// Gracefully shuts the service down.
    ///
    /// 1. Refuses new submissions and streams.
    /// 2. Waits up to `shutdown_timeout` for open streams to finish.
    /// 3. Cancels the streams still open.
    /// 4. Stops the fulfillment workers.
    pub async fn shutdown(&self) {
        tracing::info!("Refusing new requests");
        self.inner.serving.store(false, Ordering::Release);

        tracing::info!(
            "Draining in-flight streams ({} active)",
            self.streams_inflight()
        );
        let drained = tokio::time::timeout(self.inner.config.shutdown_timeout, async {
            while self.streams_inflight() > 0 {
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        match drained {
            Ok(()) => tracing::debug!("All in-flight streams drained"),
            Err(_) => tracing::warn!(
                "Graceful drain timed out ({} streams still active)",
                self.streams_inflight()
            ),
        }

        self.inner.streams_token.cancel();
        self.inner.pool.shutdown().await;
        self.inner.shutdown_token.cancel();
    }
}
