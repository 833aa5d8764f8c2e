use crate::server::dataset::FlightCatalog;
use flightstream_core::{
    Result,
    codec::decode_request,
    log::LogEntry,
    types::{Flight, SearchOutcome, SearchRequest, SearchResult},
};

/// Whether `flight` satisfies `request`: same route ignoring ASCII case, and a
/// departure time that starts with the requested date.
pub fn matches(flight: &Flight, request: &SearchRequest) -> bool {
    flight.from.eq_ignore_ascii_case(&request.from)
        && flight.to.eq_ignore_ascii_case(&request.to)
        && flight.departure_time.starts_with(&request.date)
}

/// Returns the flights matching `request`, in catalog order.
pub fn filter_flights(flights: &[Flight], request: &SearchRequest) -> Vec<Flight> {
    flights
        .iter()
        .filter(|flight| matches(flight, request))
        .cloned()
        .collect()
}

/// Fulfills a decoded request. A catalog failure yields a
/// [`SearchOutcome::Failed`] result rather than an error, so the search still
/// reaches a terminal state.
pub async fn fulfill(catalog: &dyn FlightCatalog, request: &SearchRequest) -> SearchResult {
    let outcome = match catalog.get_all_flights().await {
        Ok(flights) => SearchOutcome::from_matches(filter_flights(&flights, request)),
        Err(e) => SearchOutcome::Failed {
            reason: e.to_string(),
        },
    };
    SearchResult::new(request.search_id.clone(), outcome)
}

/// Decodes a requests-log entry and fulfills it.
///
/// # Errors
///
/// Returns [`flightstream_core::Error::Decode`] if the entry is not a search
/// request.
pub async fn process_entry(entry: &LogEntry, catalog: &dyn FlightCatalog) -> Result<SearchResult> {
    let request = decode_request(entry)?;
    tracing::info!(
        search_id = %request.search_id,
        from = %request.from,
        to = %request.to,
        date = %request.date,
        "Searching flights"
    );

    let result = fulfill(catalog, &request).await;
    tracing::info!(
        search_id = %request.search_id,
        status = %result.status(),
        count = result.flights().len(),
        "Flights found"
    );
    Ok(result)
}
