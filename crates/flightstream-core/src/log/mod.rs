//! # Shared Append-Only Log
//!
//! The transport between the Request Publisher, the Fulfillment Worker and
//! the Result Tailers. A log is a set of named streams; every stream is an
//! append-only, totally ordered sequence of [`LogEntry`] values shared by all
//! producers and consumers.
//!
//! Two read styles are supported:
//!
//! - **Tailing** ([`LogStore::read`]): a reader keeps its own cursor (the last
//!   [`EntryId`] it saw) and optionally restricts itself to a single record
//!   key. Keyed reads are served from a secondary index, so a reader
//!   following one search id never scans entries that belong to others.
//! - **Consumer groups** ([`LogStore::read_group`]): the log tracks a
//!   per-group cursor and a pending list per consumer. Each entry is delivered
//!   to exactly one member and stays pending until acknowledged with
//!   [`LogStore::ack`].
//!
//! Two stores implement [`LogStore`]: [`InMemoryLog`] keeps everything in
//! process, [`FileLog`] additionally journals every change to disk and
//! replays it on open.
//!
//! All blocking reads take an explicit upper bound and return an empty batch
//! once it elapses, so callers can interleave cancellation checks.

mod file;
mod journal;
mod memory;
mod model;


pub use file::{FileLog, JOURNAL_FILE};
pub use memory::InMemoryLog;
pub use model::{EntryId, GroupCursor, LogEntry, Record, StartPosition};

use async_trait::async_trait;
use core::time::Duration;

/// Errors returned by a [`LogStore`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LogError {
    /// The consumer group already exists. Group creation is idempotent, so
    /// callers usually treat this as success.
    #[error("consumer group already exists")]
    GroupExists,

    /// A group operation referenced a group (or stream) that does not exist.
    #[error("no such consumer group: {group} on stream {stream}")]
    NoSuchGroup { stream: String, group: String },

    /// The log has been closed and accepts no further operations.
    #[error("log is closed")]
    Closed,

    /// Backend failure.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Operations on the shared log.
///
/// Implementations must be safe to share across tasks; every method takes
/// `&self`.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Appends a record to `stream`, creating the stream if needed, and
    /// returns the id assigned to it.
    async fn append(&self, stream: &str, record: Record) -> Result<EntryId, LogError>;

    /// Reads up to `count` entries appended after `after` (or from the start
    /// of the stream when `None`), in log order.
    ///
    /// When `key` is given only entries with that key are returned. If no
    /// entry is available the call waits up to `block` for one to arrive and
    /// returns an empty batch on timeout.
    async fn read(
        &self,
        stream: &str,
        key: Option<&[u8]>,
        after: Option<EntryId>,
        count: usize,
        block: Duration,
    ) -> Result<Vec<LogEntry>, LogError>;

    /// Creates a consumer group on `stream`, creating the stream if needed.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::GroupExists`] if the group is already present.
    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartPosition,
    ) -> Result<(), LogError>;

    /// Reads up to `count` entries for `consumer` within `group`.
    ///
    /// With [`GroupCursor::New`] the call waits up to `block` when nothing is
    /// available and returns an empty batch on timeout.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        cursor: GroupCursor,
        count: usize,
        block: Duration,
    ) -> Result<Vec<LogEntry>, LogError>;

    /// Acknowledges a delivered entry. Returns `true` if the entry was
    /// pending and is now removed from the pending list.
    async fn ack(&self, stream: &str, group: &str, id: EntryId) -> Result<bool, LogError>;

    /// Number of delivered but unacknowledged entries in `group`.
    async fn pending(&self, stream: &str, group: &str) -> Result<usize, LogError>;

    /// Number of entries in `stream` (zero if it does not exist).
    async fn entry_count(&self, stream: &str) -> Result<usize, LogError>;
}
