//! HTTP surface of the flight search service.
//!
//! | method | path | |
//! |---|---|---|
//! | `POST` | `/api/v1/flights/search` | submit a search |
//! | `GET` | `/api/v1/flights/search/{search_id}/stream` | SSE result stream |
//! | `GET` | `/healthz` | serving status |
//!
//! Errors are rendered by [`flightstream_core::Error`]'s `IntoResponse` impl
//! as `{"success": false, "message": ..}`.

use super::FlightService;
use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use flightstream_core::{
    Error,
    types::{SearchCriteria, SearchId, SearchStatus},
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub const SEARCH_PATH: &str = "/api/v1/flights/search";
pub const STREAM_PATH: &str = "/api/v1/flights/search/{search_id}/stream";
pub const HEALTH_PATH: &str = "/healthz";

/// Body of a successful submission.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub message: &'static str,
    pub data: SubmitData,
}

#[derive(Debug, Serialize)]
pub struct SubmitData {
    pub search_id: SearchId,
    pub status: SearchStatus,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
}

pub fn router(service: FlightService) -> Router {
    Router::new()
        .route(SEARCH_PATH, post(search_flights))
        .route(STREAM_PATH, get(stream_results))
        .route(HEALTH_PATH, get(health))
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(service)
}

async fn search_flights(
    State(service): State<FlightService>,
    body: Result<Json<SearchCriteria>, JsonRejection>,
) -> Result<Json<SubmitResponse>, Error> {
    let Json(criteria) = body.map_err(|rejection| {
        tracing::warn!("Invalid request body: {rejection}");
        Error::InvalidBody {
            reason: rejection.body_text(),
        }
    })?;

    let search_id = service.submit(&criteria).await?;

    Ok(Json(SubmitResponse {
        success: true,
        message: "Search request submitted",
        data: SubmitData {
            search_id,
            status: SearchStatus::Processing,
        },
    }))
}

async fn stream_results(
    State(service): State<FlightService>,
    Path(search_id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    tracing::info!(%search_id, "SSE stream opened");
    service.open_stream(SearchId::from(search_id))
}

async fn health(State(service): State<FlightService>) -> impl IntoResponse {
    if service.is_serving() {
        (StatusCode::OK, Json(Health { status: "serving" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(Health {
                status: "not_serving",
            }),
        )
    }
}
