use super::TailEvent;
use crate::server::telemetry::{decrement_streams_inflight, increment_streams_inflight, record_stream_duration};
use axum::response::sse::{Event, KeepAlive, Sse};
use core::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use flightstream_core::types::{SearchId, SearchStatus};
use futures::{Stream, StreamExt};
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Instant,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::DropGuard;

/// Ties a tailer to the lifetime of its response body.
///
/// Dropping the guard (the client disconnected, or the stream ended) cancels
/// the tailer's token and releases the in-flight slot.
pub struct StreamGuard {
    search_id: SearchId,
    started: Instant,
    inflight: Arc<AtomicUsize>,
    _cancel: DropGuard,
}

impl StreamGuard {
    pub fn new(search_id: SearchId, cancel: DropGuard, inflight: Arc<AtomicUsize>) -> Self {
        inflight.fetch_add(1, Ordering::Relaxed);
        increment_streams_inflight();
        Self {
            search_id,
            started: Instant::now(),
            inflight,
            _cancel: cancel,
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.inflight.fetch_sub(1, Ordering::Relaxed);
        decrement_streams_inflight();
        record_stream_duration(self.started.elapsed().as_secs_f64() * 1_000.0);
        tracing::info!(search_id = %self.search_id, "SSE stream closed");
    }
}

/// Stream wrapper that keeps its [`StreamGuard`] alive exactly as long as
/// the stream itself.
struct Guarded<S> {
    inner: S,
    _guard: StreamGuard,
}

impl<S: Stream + Unpin> Stream for Guarded<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Renders a [`TailEvent`] as an SSE event.
///
/// - `result`: a non-failed update, data is the JSON search result.
/// - `error`: a failed update, same payload.
/// - `summary`: `{search_id, status, total_results}`, always last.
pub fn to_event(event: &TailEvent) -> Event {
    let encoded = match event {
        TailEvent::Update(result) => {
            let name = match result.status() {
                SearchStatus::Failed => "error",
                SearchStatus::Processing | SearchStatus::Completed | SearchStatus::NotFound => {
                    "result"
                }
            };
            tracing::info!(
                search_id = %result.search_id,
                status = %result.status(),
                total_results = result.flights().len(),
                "SSE send"
            );
            Event::default().event(name).json_data(result)
        }
        TailEvent::Finished(summary) => Event::default().event("summary").json_data(summary),
    };

    encoded.unwrap_or_else(|e| {
        tracing::error!("Failed to encode SSE event: {e}");
        Event::default().comment("encoding error")
    })
}

/// Turns the receiving half of a tailer channel into an SSE response.
///
/// The response ends when the channel closes, i.e. right after the summary
/// or when the tailer stops for any other reason.
pub fn into_sse(
    rx: mpsc::Receiver<TailEvent>,
    guard: StreamGuard,
    keepalive: Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static> {
    let events = ReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(to_event(&event)));
    Sse::new(Guarded {
        inner: events,
        _guard: guard,
    })
    .keep_alive(KeepAlive::new().interval(keepalive))
}
