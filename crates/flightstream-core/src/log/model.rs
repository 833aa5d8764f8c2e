//! Core data types for the shared log.

use bytes::Bytes;
use core::fmt;

/// Identifier assigned to an entry at append time.
///
/// Ids start at 1 and are strictly increasing within a single log stream.
/// There is no ordering relationship between ids of different streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub u64);

impl EntryId {
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A record to be appended to a log stream.
///
/// The `key` is indexed so readers can seek straight to the entries of one
/// key instead of scanning the whole stream. The `value` is opaque to the
/// log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Bytes,
    pub value: Bytes,
}

/// An entry read from a log stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: EntryId,
    pub key: Bytes,
    pub value: Bytes,
}

/// Where a newly created consumer group starts delivering from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StartPosition {
    /// Deliver every entry already in the stream.
    Earliest,
    /// Deliver only entries appended after the group was created.
    #[default]
    Latest,
}

/// Which entries a consumer-group read returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupCursor {
    /// Entries never delivered to any member of the group. Returned entries
    /// become pending for the reading consumer until acknowledged.
    New,
    /// Entries already delivered to the reading consumer but not yet
    /// acknowledged, with ids strictly greater than `after`. Never blocks.
    Pending { after: Option<EntryId> },
}
