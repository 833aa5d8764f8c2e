//! Result Tailer and Live Delivery Sink.
//!
//! Every open client stream owns one tailer task and one SSE response body,
//! joined by a bounded channel of [`TailEvent`]s:
//!
//! ```text
//! results log --keyed read--> ResultTailer --TailEvent--> into_sse --> client
//! ```
//!
//! The channel is the only buffer, so a slow client slows its tailer down.
//! When the client goes away the response body is dropped, its
//! [`sink::StreamGuard`] cancels the tailer's token, and the tailer abandons
//! whatever read or send it was waiting on.

pub mod sink;
pub mod tailer;


use flightstream_core::types::{SearchResult, SearchStatus, StreamSummary};

pub use sink::{StreamGuard, into_sse};
pub use tailer::ResultTailer;

/// Item handed from a tailer to its sink.
#[derive(Clone, Debug, PartialEq)]
pub enum TailEvent {
    /// A result observed for the tailed search id.
    Update(SearchResult),
    /// Sent once, right after the first terminal update. Nothing follows it.
    Finished(StreamSummary),
}

/// Why a tailer stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TailExit {
    /// A terminal result and its summary were delivered.
    Terminal(SearchStatus),
    /// The stream's token was cancelled (client gone or shutdown).
    Cancelled,
    /// The sink dropped its receiver.
    ReceiverClosed,
    /// The results log was closed.
    LogClosed,
}
