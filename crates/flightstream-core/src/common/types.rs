//! # Search Pipeline Data Model
//!
//! This module defines the values that travel through the pipeline:
//!
//! - [`SearchCriteria`] - what a client submits.
//! - [`SearchRequest`] - what the Publisher appends to the requests log.
//! - [`Flight`] - immutable reference data served by the dataset provider.
//! - [`SearchResult`] - what the Fulfillment Worker appends to the results
//!   log, carrying a closed [`SearchOutcome`].
//! - [`StreamSummary`] - the terminal record closing a client stream.
//!
//! ## Wire format
//!
//! A [`SearchResult`] is serialized as
//! `{"search_id": .., "status": .., "results": [..], "error": ..}` where
//! `error` is only present for failed searches. Internally the status and the
//! matching flights are a single [`SearchOutcome`] so terminal-state handling
//! is checked exhaustively by the compiler.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Opaque correlation id linking a request entry to its result entries.
///
/// Generated by [`SearchIdGenerator`](crate::id::SearchIdGenerator) as a
/// Crockford base32 ULID, but treated as an opaque string everywhere else.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchId(String);

impl SearchId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for SearchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SearchId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SearchId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl AsRef<str> for SearchId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Search submission as received from a client.
///
/// Every field defaults when absent so that a missing field is reported by
/// validation alongside the other field errors instead of failing body
/// parsing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchCriteria {
    /// Three-letter uppercase origin airport code.
    pub from: String,
    /// Three-letter uppercase destination airport code.
    pub to: String,
    /// Travel date, `YYYY-MM-DD`.
    pub date: String,
    /// Number of passengers, `1..=10`.
    pub passengers: i64,
}

/// A published search request. Immutable once appended to the requests log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub search_id: SearchId,
    pub from: String,
    pub to: String,
    pub date: String,
}

impl SearchRequest {
    /// Builds the request entry for already validated criteria.
    pub fn new(search_id: SearchId, criteria: &SearchCriteria) -> Self {
        Self {
            search_id,
            from: criteria.from.clone(),
            to: criteria.to.clone(),
            date: criteria.date.clone(),
        }
    }
}

/// A single flight from the reference catalog.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Flight {
    pub id: String,
    pub airline: String,
    pub flight_number: String,
    pub from: String,
    pub to: String,
    pub departure_time: String,
    pub arrival_time: String,
    pub price: f64,
    pub currency: String,
    pub available: bool,
}

/// Wire tag of a [`SearchOutcome`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Processing,
    Completed,
    NotFound,
    Failed,
}

impl SearchStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::NotFound => "not_found",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a search as reported on the results log.
#[derive(Clone, Debug, PartialEq)]
pub enum SearchOutcome {
    /// Accepted but not yet fulfilled.
    Processing,
    /// At least one flight matched, in catalog order.
    Completed(Vec<Flight>),
    /// Fulfilled without any match.
    NotFound,
    /// Fulfillment was abandoned, e.g. because the catalog was unavailable.
    Failed { reason: String },
}

impl SearchOutcome {
    /// Classifies a filtered match set.
    pub fn from_matches(flights: Vec<Flight>) -> Self {
        if flights.is_empty() {
            Self::NotFound
        } else {
            Self::Completed(flights)
        }
    }

    pub const fn status(&self) -> SearchStatus {
        match self {
            Self::Processing => SearchStatus::Processing,
            Self::Completed(_) => SearchStatus::Completed,
            Self::NotFound => SearchStatus::NotFound,
            Self::Failed { .. } => SearchStatus::Failed,
        }
    }

    /// Whether no further updates are expected after this outcome.
    pub const fn is_terminal(&self) -> bool {
        match self {
            Self::Processing => false,
            Self::Completed(_) | Self::NotFound | Self::Failed { .. } => true,
        }
    }

    pub fn flights(&self) -> &[Flight] {
        match self {
            Self::Completed(flights) => flights,
            Self::Processing | Self::NotFound | Self::Failed { .. } => &[],
        }
    }
}

/// A result record for one search id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "SearchResultWire", into = "SearchResultWire")]
pub struct SearchResult {
    pub search_id: SearchId,
    pub outcome: SearchOutcome,
}

impl SearchResult {
    pub const fn new(search_id: SearchId, outcome: SearchOutcome) -> Self {
        Self { search_id, outcome }
    }

    pub const fn status(&self) -> SearchStatus {
        self.outcome.status()
    }

    pub const fn is_terminal(&self) -> bool {
        self.outcome.is_terminal()
    }

    pub fn flights(&self) -> &[Flight] {
        self.outcome.flights()
    }

    /// Builds the summary record sent after this result closes a stream.
    pub fn summary(&self) -> StreamSummary {
        StreamSummary {
            search_id: self.search_id.clone(),
            status: self.status(),
            total_results: self.flights().len(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SearchResultWire {
    search_id: SearchId,
    status: SearchStatus,
    #[serde(default)]
    results: Vec<Flight>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<SearchResultWire> for SearchResult {
    fn from(wire: SearchResultWire) -> Self {
        let outcome = match wire.status {
            SearchStatus::Processing => SearchOutcome::Processing,
            SearchStatus::Completed => SearchOutcome::Completed(wire.results),
            SearchStatus::NotFound => SearchOutcome::NotFound,
            SearchStatus::Failed => SearchOutcome::Failed {
                reason: wire.error.unwrap_or_default(),
            },
        };
        Self {
            search_id: wire.search_id,
            outcome,
        }
    }
}

impl From<SearchResult> for SearchResultWire {
    fn from(result: SearchResult) -> Self {
        let status = result.status();
        let (results, error) = match result.outcome {
            SearchOutcome::Completed(flights) => (flights, None),
            SearchOutcome::Failed { reason } => (Vec::new(), Some(reason)),
            SearchOutcome::Processing | SearchOutcome::NotFound => (Vec::new(), None),
        };
        Self {
            search_id: result.search_id,
            status,
            results,
            error,
        }
    }
}

/// Terminal record written to a client stream after its last result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSummary {
    pub search_id: SearchId,
    pub status: SearchStatus,
    pub total_results: usize,
}
