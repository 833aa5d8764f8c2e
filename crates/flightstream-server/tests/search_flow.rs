use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use core::time::Duration;
use flightstream_core::log::{InMemoryLog, LogStore, StartPosition};
use std::path::PathBuf;
use flightstream_server::server::{
    config::ServerConfig,
    dataset::JsonFileCatalog,
    service::{FlightService, router},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

const DATASET: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../data/flights.json");

fn config() -> ServerConfig {
    ServerConfig {
        group_start: StartPosition::Earliest,
        read_block: Duration::from_millis(50),
        shutdown_timeout: Duration::from_millis(200),
        ..ServerConfig::default()
    }
}

async fn service() -> (FlightService, Arc<InMemoryLog>) {
    let log = Arc::new(InMemoryLog::new());
    let service = FlightService::start(
        config(),
        log.clone(),
        Arc::new(JsonFileCatalog::new(DATASET)),
    )
    .await
    .unwrap();
    (service, log)
}

async fn post_search(app: &Router, body: impl Into<Body>) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::post("/api/v1/flights/search")
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn read_stream(app: &Router, search_id: &str) -> String {
    let response = app
        .clone()
        .oneshot(
            Request::get(format!("/api/v1/flights/search/{search_id}/stream"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );

    let body = tokio::time::timeout(
        Duration::from_secs(5),
        to_bytes(response.into_body(), usize::MAX),
    )
    .await
    .expect("stream did not close")
    .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

/// `data:` payloads of every event named `name`, in order.
fn events(text: &str, name: &str) -> Vec<Value> {
    text.split("\n\n")
        .filter(|block| block.lines().any(|l| l == format!("event: {name}")))
        .filter_map(|block| block.lines().find_map(|l| l.strip_prefix("data: ")))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn matching_search_streams_completed_result_and_summary() {
    let (service, _log) = service().await;
    let app = router(service.clone());

    let (status, body) = post_search(
        &app,
        json!({"from": "JKT", "to": "DPS", "date": "2025-08-15", "passengers": 2}).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Search request submitted");
    assert_eq!(body["data"]["status"], "processing");
    let search_id = body["data"]["search_id"].as_str().unwrap().to_owned();

    let text = read_stream(&app, &search_id).await;
    let results = events(&text, "result");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["search_id"], search_id.as_str());
    assert_eq!(results[0]["status"], "completed");
    assert_eq!(results[0]["results"].as_array().unwrap().len(), 1);
    assert_eq!(results[0]["results"][0]["flight_number"], "GA-404");

    let summary = events(&text, "summary");
    assert_eq!(
        summary,
        [json!({"search_id": search_id, "status": "completed", "total_results": 1})]
    );
    assert!(text.find("event: result").unwrap() < text.find("event: summary").unwrap());

    service.shutdown().await;
    assert_eq!(service.streams_inflight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn search_without_matches_ends_with_not_found() {
    let (service, log) = service().await;
    let app = router(service.clone());

    let (status, body) = post_search(
        &app,
        json!({"from": "XXX", "to": "YYY", "date": "2099-01-01", "passengers": 1}).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let search_id = body["data"]["search_id"].as_str().unwrap().to_owned();

    let text = read_stream(&app, &search_id).await;
    assert_eq!(events(&text, "result")[0]["status"], "not_found");
    assert_eq!(events(&text, "result")[0]["results"], json!([]));
    assert_eq!(events(&text, "summary")[0]["total_results"], 0);

    let config = service.config();
    assert_eq!(log.entry_count(&config.requests_stream).await.unwrap(), 1);
    assert_eq!(log.entry_count(&config.results_stream).await.unwrap(), 1);
    // The ack follows the result append, so it may land just after the stream closes.
    tokio::time::timeout(Duration::from_secs(1), async {
        while log
            .pending(&config.requests_stream, &config.consumer_group)
            .await
            .unwrap()
            > 0
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("request was never acknowledged");

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_searches_are_correlated_by_id() {
    let (service, _log) = service().await;
    let app = router(service.clone());

    let (_, a) = post_search(
        &app,
        json!({"from": "JKT", "to": "DPS", "date": "2025-08-16", "passengers": 1}).to_string(),
    )
    .await;
    let (_, b) = post_search(
        &app,
        json!({"from": "DPS", "to": "JKT", "date": "2025-08-20", "passengers": 1}).to_string(),
    )
    .await;
    let a = a["data"]["search_id"].as_str().unwrap().to_owned();
    let b = b["data"]["search_id"].as_str().unwrap().to_owned();
    assert_ne!(a, b);

    let (text_a, text_b) = tokio::join!(read_stream(&app, &a), read_stream(&app, &b));
    assert_eq!(events(&text_a, "result")[0]["results"][0]["flight_number"], "JT-36");
    assert_eq!(events(&text_b, "result")[0]["results"][0]["flight_number"], "QG-690");
    assert_eq!(events(&text_a, "summary")[0]["search_id"], a.as_str());
    assert_eq!(events(&text_b, "summary")[0]["search_id"], b.as_str());

    service.shutdown().await;
}

#[tokio::test]
async fn invalid_criteria_are_rejected_with_field_errors() {
    let (service, log) = service().await;
    let app = router(service.clone());

    let (status, body) = post_search(
        &app,
        json!({"from": "jkt", "to": "", "date": "2025-13-01", "passengers": 11}).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Validation error");

    let fields: Vec<_> = body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, ["from", "to", "date", "passengers"]);

    // Nothing was published.
    assert_eq!(
        log.entry_count(&service.config().requests_stream)
            .await
            .unwrap(),
        0
    );
    service.shutdown().await;
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let (service, _log) = service().await;
    let app = router(service.clone());

    let (status, body) = post_search(&app, "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Invalid request body");

    service.shutdown().await;
}

#[tokio::test]
async fn health_reflects_shutdown() {
    let (service, _log) = service().await;
    let app = router(service.clone());

    let health = |app: Router| async move {
        let response = app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice::<Value>(&body).unwrap())
    };

    let (status, body) = health(app.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "serving");

    service.shutdown().await;

    let (status, body) = health(app.clone()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "not_serving");

    let (status, body) = post_search(
        &app,
        json!({"from": "JKT", "to": "DPS", "date": "2025-08-15", "passengers": 1}).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);

    let response = app
        .oneshot(
            Request::get("/api/v1/flights/search/any/stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_closes_streams_that_never_finish() {
    let (service, _log) = service().await;
    let app = router(service.clone());

    let response = app
        .oneshot(
            Request::get("/api/v1/flights/search/unknown/stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(service.streams_inflight(), 1);

    let body = tokio::spawn(to_bytes(response.into_body(), usize::MAX));
    tokio::time::timeout(Duration::from_secs(2), service.shutdown())
        .await
        .expect("shutdown exceeded its bound");

    let text = tokio::time::timeout(Duration::from_secs(1), body)
        .await
        .expect("stream stayed open after shutdown")
        .unwrap()
        .unwrap();
    assert!(!String::from_utf8_lossy(&text).contains("event: summary"));
    assert_eq!(service.streams_inflight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn search_submitted_right_after_start_is_fulfilled_with_default_config() {
    let config = ServerConfig {
        dataset_path: DATASET.into(),
        ..ServerConfig::default()
    };
    assert_eq!(config.group_start, StartPosition::Latest);
    let log = Arc::new(InMemoryLog::new());
    let service = FlightService::start(
        config.clone(),
        log.clone(),
        Arc::new(JsonFileCatalog::new(DATASET)),
    )
    .await
    .unwrap();
    let app = router(service.clone());

    let (status, body) = post_search(
        &app,
        json!({"from": "JKT", "to": "DPS", "date": "2025-08-15", "passengers": 1}).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let search_id = body["data"]["search_id"].as_str().unwrap().to_owned();

    let results = log
        .read(
            &config.results_stream,
            Some(search_id.as_bytes()),
            None,
            10,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 1);

    service.shutdown().await;
}

fn log_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "flightstream-server-{}-{name}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn journaled_results_can_be_streamed_after_a_restart() {
    let dir = log_dir("restart");
    let config = ServerConfig {
        dataset_path: DATASET.into(),
        log_dir: Some(dir.clone()),
        ..config()
    };

    let service = FlightService::from_config(config.clone()).await.unwrap();
    let app = router(service.clone());
    let (_, body) = post_search(
        &app,
        json!({"from": "JKT", "to": "DPS", "date": "2025-08-15", "passengers": 1}).to_string(),
    )
    .await;
    let search_id = body["data"]["search_id"].as_str().unwrap().to_owned();
    let first = read_stream(&app, &search_id).await;
    tokio::time::timeout(Duration::from_secs(1), async {
        while service
            .log()
            .pending(&config.requests_stream, &config.consumer_group)
            .await
            .unwrap()
            > 0
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("request was never acknowledged");
    service.shutdown().await;
    drop(app);
    drop(service);

    let service = FlightService::from_config(config).await.unwrap();
    let app = router(service.clone());
    let replayed = read_stream(&app, &search_id).await;
    assert_eq!(events(&replayed, "result"), events(&first, "result"));
    assert_eq!(events(&replayed, "summary")[0]["total_results"], 1);

    // The request was acknowledged before the restart, so nothing is redelivered.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        service
            .log()
            .entry_count(&service.config().results_stream)
            .await
            .unwrap(),
        1
    );

    service.shutdown().await;
    std::fs::remove_dir_all(&dir).unwrap();
}
