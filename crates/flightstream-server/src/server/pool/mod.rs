//! Lifecycle of the fulfillment workers.
//!
//! - [`manager`] - [`manager::WorkerPool`]: spawns one task per consumer and
//!   stops them cooperatively.

pub mod manager;
