//! Server-side components of the search pipeline.
//!
//! ## Structure
//!
//! - [`config`] - CLI/environment configuration.
//! - [`telemetry`] - Logging, optional OpenTelemetry tracing and metrics.
//! - [`dataset`] - Dataset Provider (`FlightCatalog`).
//! - [`publisher`] - Request Publisher: validation and submission.
//! - [`worker`] - Fulfillment Worker: consumer-group loop over the requests
//!   log.
//! - [`pool`] - Lifecycle of the fulfillment workers.
//! - [`streaming`] - Result Tailer and Live Delivery Sink.
//! - [`service`] - HTTP routes and the [`service::FlightService`] that wires
//!   everything together.

pub mod config;
pub mod dataset;
pub mod pool;
pub mod publisher;
pub mod service;
pub mod streaming;
pub mod telemetry;
pub mod worker;
