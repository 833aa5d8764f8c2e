//! Error types for the flight search pipeline.
//!
//! This module defines the central [`Error`] enum, which captures all
//! recoverable and reportable error cases, and implements
//! [`IntoResponse`] for it so handlers can return errors directly with the
//! matching HTTP status and the JSON envelope clients expect.
//!
//! ## Error Cases
//! - `Validation`: A submission failed field validation (400).
//! - `InvalidBody`: The submission body could not be parsed (400).
//! - `Submission`: Appending the request to the log failed (500).
//! - `Log`: Any other log operation failed.
//! - `Decode`: A log payload could not be encoded or decoded.
//! - `Dataset`: The reference catalog could not be loaded.
//! - `ChannelError`: An internal communication failure between tasks.
//! - `ServiceShutdown`: A request arrived while the service was shutting
//!   down (503).

use crate::log::LogError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use core::fmt;
use serde::Serialize;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the search service.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// The submission violated one or more field constraints.
    #[error("Validation error: {0}")]
    Validation(ValidationErrors),

    /// The submission body was not valid JSON for a search.
    #[error("Invalid request body: {reason}")]
    InvalidBody { reason: String },

    /// The request could not be appended to the requests log. Not retried.
    #[error("Submission failed: {0}")]
    Submission(#[source] LogError),

    /// A log operation failed.
    #[error("Log error: {0}")]
    Log(#[from] LogError),

    /// A log payload was malformed.
    #[error("Decode error: {reason}")]
    Decode { reason: String },

    /// The reference catalog could not be loaded.
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

/// Failure to load the reference flight catalog.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DatasetError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// A single field that failed validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// All field errors found in one submission, in field order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.iter().map(|e| e.field)
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    /// `Ok(())` when no error was recorded.
    pub fn into_result(self) -> core::result::Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", e.field, e.message)?;
        }
        Ok(())
    }
}

impl From<ValidationErrors> for Error {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a str>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message, errors, detail) = match &self {
            Error::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                "Validation error",
                serde_json::to_value(errors).ok(),
                None,
            ),
            Error::InvalidBody { reason } => (
                StatusCode::BAD_REQUEST,
                "Invalid request body",
                None,
                Some(reason.as_str()),
            ),
            Error::Submission(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to initiate search",
                None,
                None,
            ),
            Error::ServiceShutdown => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service is shutting down",
                None,
                None,
            ),
            Error::Log(_)
            | Error::Decode { .. }
            | Error::Dataset(_)
            | Error::ChannelError { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error",
                None,
                None,
            ),
        };

        let body = ErrorBody {
            success: false,
            message,
            errors,
            detail,
        };
        (status, Json(body)).into_response()
    }
}
