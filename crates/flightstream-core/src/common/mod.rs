//! Shared types, error definitions and log codecs used across the
//! `flightstream` server.
//!
//! ## Submodules
//!
//! - [`error`] - Centralized error type used throughout request handling,
//!   fulfillment and streaming.
//! - [`types`] - Search criteria, flights and search results.
//! - [`id`] - Monotonic ULID correlation ids.
//! - [`codec`] - Conversion between domain values and log records.

pub mod codec;
pub mod error;
pub mod id;
pub mod types;

pub use error::{DatasetError, Error, FieldError, Result, ValidationErrors};
