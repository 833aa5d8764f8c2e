//! # Correlation Id Generation
//!
//! Search ids are ULIDs built with the [`ferroid`] layout: a 48-bit
//! millisecond timestamp followed by 80 random bits, rendered as 26 Crockford
//! base32 characters.
//!
//! [`SearchIdGenerator`] wraps ferroid's [`LockMonoUlidGenerator`] over a
//! [`MonotonicClock`]: ids drawn within the same millisecond increment the
//! random part of the previous id, so a generator never hands out the same id
//! twice and ids sort in issue order.

use crate::types::SearchId;
use ferroid::{
    generator::{IdGenStatus, LockMonoUlidGenerator},
    id::ULID,
    rand::ThreadRandom,
    time::MonotonicClock,
};

/// Clock behind every search id generator.
pub type Clock = MonotonicClock;

/// Lock-based monotonic ULID generator shared by all publisher tasks.
pub type Generator = LockMonoUlidGenerator<ULID, Clock, ThreadRandom>;

/// Thread-safe, monotonic ULID generator for search ids.
pub struct SearchIdGenerator {
    inner: Generator,
}

impl Default for SearchIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchIdGenerator {
    pub fn new() -> Self {
        Self::with_clock(Clock::default())
    }

    /// Builds a generator over an existing clock, so several generators can
    /// share one ticker thread.
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            inner: Generator::new(clock, ThreadRandom),
        }
    }

    /// Returns the next id, strictly greater than every id this generator
    /// returned before.
    pub fn next_id(&self) -> SearchId {
        let id = loop {
            match self.inner.next_id() {
                IdGenStatus::Ready { id } => break id,
                // Random bits exhausted within this millisecond.
                IdGenStatus::Pending { .. } => std::thread::yield_now(),
            }
        };
        SearchId::new(id.to_string())
    }
}
