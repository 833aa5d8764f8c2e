//! Fulfillment Worker.
//!
//! A worker is one member of the consumer group on the requests log. For each
//! entry delivered to it, it fetches the catalog, filters it, appends exactly
//! one result to the results log and only then acknowledges the entry.
//! Delivery is at-least-once: an entry whose result was appended but which was
//! never acknowledged (crash, shutdown) is redelivered to the same consumer
//! when it starts again, which may produce a duplicate result.
//!
//! ## Structure
//!
//! - [`processor`] - Pure fulfillment logic: decode, fetch, filter.
//! - [`consumer`] - The [`FulfillmentWorker`] read/process/ack loop.

pub mod consumer;
pub mod processor;

#[cfg(test)]
mod tests;

pub use consumer::{Disposition, FulfillmentWorker, ensure_group};
pub use processor::{filter_flights, fulfill, process_entry};
