//! Request Publisher.
//!
//! Validates a submission, assigns it a fresh [`SearchId`] and appends it to
//! the requests log. Fulfillment happens elsewhere; the id is returned as soon
//! as the append succeeds.

use crate::server::telemetry::{increment_searches_submitted, increment_validation_rejects};
use chrono::NaiveDate;
use flightstream_core::{
    Error, Result, ValidationErrors,
    codec::encode_request,
    id::SearchIdGenerator,
    log::LogStore,
    types::{SearchCriteria, SearchId, SearchRequest},
};
use std::sync::Arc;

pub const MIN_PASSENGERS: i64 = 1;
pub const MAX_PASSENGERS: i64 = 10;

fn is_airport_code(code: &str) -> bool {
    code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase())
}

/// Checks every field of a submission and reports all failures at once.
pub fn validate(criteria: &SearchCriteria) -> core::result::Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    for (field, value) in [("from", &criteria.from), ("to", &criteria.to)] {
        if value.is_empty() {
            errors.add(field, "is required");
        } else if !is_airport_code(value) {
            errors.add(field, "must be exactly 3 uppercase letters");
        }
    }

    if criteria.date.is_empty() {
        errors.add("date", "is required");
    } else if criteria.date.len() != 10
        || NaiveDate::parse_from_str(&criteria.date, "%Y-%m-%d").is_err()
    {
        errors.add("date", "must be a valid date in YYYY-MM-DD format");
    }

    if !(MIN_PASSENGERS..=MAX_PASSENGERS).contains(&criteria.passengers) {
        errors.add(
            "passengers",
            format!("must be between {MIN_PASSENGERS} and {MAX_PASSENGERS}"),
        );
    }

    errors.into_result()
}

pub struct RequestPublisher {
    log: Arc<dyn LogStore>,
    stream: String,
    ids: SearchIdGenerator,
}

impl RequestPublisher {
    pub fn new(log: Arc<dyn LogStore>, stream: impl Into<String>) -> Self {
        Self {
            log,
            stream: stream.into(),
            ids: SearchIdGenerator::new(),
        }
    }

    /// Publishes a search and returns its correlation id.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if any field is invalid. Nothing is written.
    /// - [`Error::Submission`] if the append fails. The append is not retried.
    #[tracing::instrument(skip_all, fields(from = %criteria.from, to = %criteria.to))]
    pub async fn submit(&self, criteria: &SearchCriteria) -> Result<SearchId> {
        if let Err(errors) = validate(criteria) {
            tracing::warn!("Validation failed: {errors}");
            increment_validation_rejects();
            return Err(Error::Validation(errors));
        }

        let search_id = self.ids.next_id();
        let request = SearchRequest::new(search_id.clone(), criteria);
        let record = encode_request(&request)?;

        if let Err(e) = self.log.append(&self.stream, record).await {
            tracing::error!(%search_id, "Failed to publish search request: {e}");
            return Err(Error::Submission(e));
        }

        increment_searches_submitted();
        tracing::info!(
            %search_id,
            from = %request.from,
            to = %request.to,
            date = %request.date,
            passengers = criteria.passengers,
            "Search request submitted"
        );
        Ok(search_id)
    }
}
