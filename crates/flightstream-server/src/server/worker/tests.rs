use super::*;
use crate::server::{
    config::WorkerConfig,
    dataset::{FlightCatalog, InMemoryCatalog},
};
use async_trait::async_trait;
use core::time::Duration;
use flightstream_core::{
    DatasetError,
    codec::{decode_result, encode_request},
    log::{
        EntryId, GroupCursor, InMemoryLog, LogEntry, LogError, LogStore, Record, StartPosition,
    },
    types::{Flight, SearchOutcome, SearchRequest, SearchResult, SearchStatus},
};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio_util::sync::CancellationToken;

const REQUESTS: &str = "requests";
const RESULTS: &str = "results";
const GROUP: &str = "flight_group";

fn flight(id: &str, from: &str, to: &str, departure: &str) -> Flight {
    Flight {
        id: id.into(),
        airline: "Garuda Indonesia".into(),
        flight_number: format!("GA-{id}"),
        from: from.into(),
        to: to.into(),
        departure_time: departure.into(),
        arrival_time: departure.into(),
        price: 1_000_000.0,
        currency: "IDR".into(),
        available: true,
    }
}

fn catalog() -> Vec<Flight> {
    vec![
        flight("1", "JKT", "DPS", "2025-08-15T08:00"),
        flight("2", "SUB", "DPS", "2025-08-15T10:00"),
        flight("3", "jkt", "dps", "2025-08-15T19:30"),
        flight("4", "JKT", "DPS", "2025-08-16T08:00"),
    ]
}

fn request(id: &str, from: &str, to: &str, date: &str) -> SearchRequest {
    SearchRequest {
        search_id: id.into(),
        from: from.into(),
        to: to.into(),
        date: date.into(),
    }
}

fn worker_config(consumer: &str, read_block: Duration) -> WorkerConfig {
    WorkerConfig {
        requests_stream: REQUESTS.into(),
        results_stream: RESULTS.into(),
        group: GROUP.into(),
        consumer: consumer.into(),
        start: StartPosition::Earliest,
        read_block,
    }
}

fn worker(log: Arc<dyn LogStore>, catalog: Arc<dyn FlightCatalog>) -> FulfillmentWorker {
    FulfillmentWorker::new(
        worker_config("flight_app", Duration::from_millis(50)),
        log,
        catalog,
    )
}

async fn publish(log: &InMemoryLog, request: &SearchRequest) -> EntryId {
    log.append(REQUESTS, encode_request(request).unwrap())
        .await
        .unwrap()
}

/// Delivers the next requests-log entry to `consumer`, as the worker loop
/// would.
async fn deliver(log: &InMemoryLog, consumer: &str) -> LogEntry {
    let _ = log
        .create_group(REQUESTS, GROUP, StartPosition::Earliest)
        .await;
    log.read_group(REQUESTS, GROUP, consumer, GroupCursor::New, 1, Duration::ZERO)
        .await
        .unwrap()
        .remove(0)
}

async fn results(log: &InMemoryLog) -> Vec<SearchResult> {
    log.read(RESULTS, None, None, 100, Duration::ZERO)
        .await
        .unwrap()
        .iter()
        .map(|e| decode_result(e).unwrap())
        .collect()
}

struct UnavailableCatalog;

#[async_trait]
impl FlightCatalog for UnavailableCatalog {
    async fn get_all_flights(&self) -> Result<Vec<Flight>, DatasetError> {
        Err(DatasetError::Read {
            path: "flights.json".into(),
            reason: "No such file or directory".into(),
        })
    }
}

/// Delegates to an [`InMemoryLog`] but rejects appends to the results stream.
struct ResultsUnavailable(Arc<InMemoryLog>, AtomicUsize);

impl ResultsUnavailable {
    fn new(inner: Arc<InMemoryLog>) -> Self {
        Self(inner, AtomicUsize::new(0))
    }

    fn rejected(&self) -> usize {
        self.1.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LogStore for ResultsUnavailable {
    async fn append(&self, stream: &str, record: Record) -> Result<EntryId, LogError> {
        if stream == RESULTS {
            self.1.fetch_add(1, Ordering::Relaxed);
            return Err(LogError::Storage("results stream unavailable".into()));
        }
        self.0.append(stream, record).await
    }

    async fn read(
        &self,
        stream: &str,
        key: Option<&[u8]>,
        after: Option<EntryId>,
        count: usize,
        block: Duration,
    ) -> Result<Vec<LogEntry>, LogError> {
        self.0.read(stream, key, after, count, block).await
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartPosition,
    ) -> Result<(), LogError> {
        self.0.create_group(stream, group, start).await
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        cursor: GroupCursor,
        count: usize,
        block: Duration,
    ) -> Result<Vec<LogEntry>, LogError> {
        self.0
            .read_group(stream, group, consumer, cursor, count, block)
            .await
    }

    async fn ack(&self, stream: &str, group: &str, id: EntryId) -> Result<bool, LogError> {
        self.0.ack(stream, group, id).await
    }

    async fn pending(&self, stream: &str, group: &str) -> Result<usize, LogError> {
        self.0.pending(stream, group).await
    }

    async fn entry_count(&self, stream: &str) -> Result<usize, LogError> {
        self.0.entry_count(stream).await
    }
}

#[test]
fn filter_matches_route_case_insensitively_and_date_by_prefix() {
    let flights = catalog();
    let matched = filter_flights(&flights, &request("s", "JKT", "DPS", "2025-08-15"));
    let ids: Vec<_> = matched.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, ["1", "3"]);
}

#[test]
fn filter_returns_nothing_for_unknown_route() {
    let matched = filter_flights(&catalog(), &request("s", "XXX", "YYY", "2099-01-01"));
    assert!(matched.is_empty());
}

#[tokio::test]
async fn fulfill_classifies_matches() {
    let catalog = InMemoryCatalog::new(catalog());

    let found = fulfill(&catalog, &request("a", "SUB", "DPS", "2025-08-15")).await;
    assert_eq!(found.status(), SearchStatus::Completed);
    assert_eq!(found.flights().len(), 1);

    let missing = fulfill(&catalog, &request("b", "SUB", "DPS", "2025-08-16")).await;
    assert_eq!(missing.outcome, SearchOutcome::NotFound);
}

#[tokio::test]
async fn catalog_failure_becomes_failed_outcome() {
    let result = fulfill(&UnavailableCatalog, &request("a", "JKT", "DPS", "2025-08-15")).await;
    match result.outcome {
        SearchOutcome::Failed { reason } => assert!(reason.contains("flights.json")),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn handle_publishes_result_then_acks() {
    let log = Arc::new(InMemoryLog::new());
    let worker = worker(log.clone(), Arc::new(InMemoryCatalog::new(catalog())));

    publish(&log, &request("s1", "JKT", "DPS", "2025-08-15")).await;
    let entry = deliver(&log, "flight_app").await;

    assert_eq!(worker.handle(&entry).await, Disposition::Published);
    assert_eq!(log.pending(REQUESTS, GROUP).await.unwrap(), 0);

    let published = results(&log).await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].search_id.as_str(), "s1");
    assert_eq!(published[0].status(), SearchStatus::Completed);
    let ids: Vec<_> = published[0].flights().iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, ["1", "3"]);
}

#[tokio::test]
async fn handle_publishes_failed_result_when_catalog_is_down() {
    let log = Arc::new(InMemoryLog::new());
    let worker = worker(log.clone(), Arc::new(UnavailableCatalog));

    publish(&log, &request("s1", "JKT", "DPS", "2025-08-15")).await;
    let entry = deliver(&log, "flight_app").await;

    assert_eq!(worker.handle(&entry).await, Disposition::Published);
    let published = results(&log).await;
    assert_eq!(published[0].status(), SearchStatus::Failed);
    assert_eq!(log.pending(REQUESTS, GROUP).await.unwrap(), 0);
}

#[tokio::test]
async fn malformed_entry_is_acked_without_a_result() {
    let log = Arc::new(InMemoryLog::new());
    let worker = worker(log.clone(), Arc::new(InMemoryCatalog::new(catalog())));

    log.append(
        REQUESTS,
        Record {
            key: "junk".into(),
            value: "{\"search_id\":".into(),
        },
    )
    .await
    .unwrap();
    let entry = deliver(&log, "flight_app").await;

    assert_eq!(worker.handle(&entry).await, Disposition::Skipped);
    assert_eq!(log.pending(REQUESTS, GROUP).await.unwrap(), 0);
    assert_eq!(log.entry_count(RESULTS).await.unwrap(), 0);
}

#[tokio::test]
async fn failed_publish_leaves_entry_pending() {
    let inner = Arc::new(InMemoryLog::new());
    let log = Arc::new(ResultsUnavailable::new(inner.clone()));
    let worker = worker(log, Arc::new(InMemoryCatalog::new(catalog())));

    publish(&inner, &request("s1", "JKT", "DPS", "2025-08-15")).await;
    let entry = deliver(&inner, "flight_app").await;

    assert_eq!(worker.handle(&entry).await, Disposition::Retained);
    assert_eq!(inner.pending(REQUESTS, GROUP).await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_fulfills_requests_until_cancelled() {
    let log = Arc::new(InMemoryLog::new());
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(
        worker(log.clone(), Arc::new(InMemoryCatalog::new(catalog()))).run(shutdown.clone()),
    );

    publish(&log, &request("a", "JKT", "DPS", "2025-08-15")).await;
    publish(&log, &request("b", "XXX", "YYY", "2099-01-01")).await;

    let mut found = Vec::new();
    let mut after = None;
    while found.len() < 2 {
        let batch = log
            .read(RESULTS, None, after, 10, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!batch.is_empty(), "worker produced no result in time");
        after = batch.last().map(|e| e.id);
        found.extend(batch.iter().map(|e| decode_result(e).unwrap()));
    }

    assert_eq!(found[0].status(), SearchStatus::Completed);
    assert_eq!(found[1].status(), SearchStatus::NotFound);
    assert!(found[1].flights().is_empty());

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("worker ignored cancellation")
        .unwrap()
        .unwrap();
    assert_eq!(log.pending(REQUESTS, GROUP).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_interrupts_a_blocked_read() {
    let log = Arc::new(InMemoryLog::new());
    let shutdown = CancellationToken::new();
    let worker = FulfillmentWorker::new(
        worker_config("flight_app", Duration::from_secs(60)),
        log,
        Arc::new(InMemoryCatalog::new(catalog())),
    );
    let handle = tokio::spawn(worker.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("worker waited out its read bound")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn restart_reprocesses_unacked_entry_once_more() {
    let log = Arc::new(InMemoryLog::new());
    let catalog: Arc<dyn FlightCatalog> = Arc::new(InMemoryCatalog::new(catalog()));

    // First life: publish the result but crash before acking.
    publish(&log, &request("dup", "JKT", "DPS", "2025-08-15")).await;
    let entry = deliver(&log, "flight_app").await;
    let result = process_entry(&entry, catalog.as_ref()).await.unwrap();
    log.append(RESULTS, flightstream_core::codec::encode_result(&result).unwrap())
        .await
        .unwrap();
    assert_eq!(log.pending(REQUESTS, GROUP).await.unwrap(), 1);

    // Second life drains the pending entry before reading new ones.
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(worker(log.clone(), catalog).run(shutdown.clone()));
    let second = log
        .read(RESULTS, None, Some(EntryId(1)), 1, Duration::from_secs(5))
        .await
        .unwrap();
    shutdown.cancel();
    handle.await.unwrap().unwrap();

    assert_eq!(second.len(), 1);
    let published = results(&log).await;
    assert_eq!(published.len(), 2);
    assert_eq!(published[0], published[1]);
    assert_eq!(log.pending(REQUESTS, GROUP).await.unwrap(), 0);
}

#[tokio::test]
async fn restart_drains_pending_entries_beyond_one_batch() {
    const BACKLOG: usize = 150;
    let log = Arc::new(InMemoryLog::new());

    for i in 0..BACKLOG {
        publish(&log, &request(&format!("s{i}"), "JKT", "DPS", "2025-08-15")).await;
    }
    log.create_group(REQUESTS, GROUP, StartPosition::Earliest)
        .await
        .unwrap();
    let delivered = log
        .read_group(
            REQUESTS,
            GROUP,
            "flight_app",
            GroupCursor::New,
            BACKLOG,
            Duration::ZERO,
        )
        .await
        .unwrap();
    assert_eq!(delivered.len(), BACKLOG);

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(
        worker(log.clone(), Arc::new(InMemoryCatalog::new(catalog()))).run(shutdown.clone()),
    );
    tokio::time::timeout(Duration::from_secs(5), async {
        while log.pending(REQUESTS, GROUP).await.unwrap() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("pending backlog was not drained");
    shutdown.cancel();
    handle.await.unwrap().unwrap();

    let published = results(&log).await;
    assert_eq!(published.len(), BACKLOG);
    assert_eq!(published[BACKLOG - 1].search_id.as_str(), format!("s{}", BACKLOG - 1));
}

#[tokio::test]
async fn drain_visits_every_page_when_nothing_can_be_published() {
    let inner = Arc::new(InMemoryLog::new());
    let log = Arc::new(ResultsUnavailable::new(inner.clone()));

    for i in 0..100 {
        publish(&inner, &request(&format!("s{i}"), "JKT", "DPS", "2025-08-15")).await;
    }
    inner
        .create_group(REQUESTS, GROUP, StartPosition::Earliest)
        .await
        .unwrap();
    inner
        .read_group(REQUESTS, GROUP, "flight_app", GroupCursor::New, 100, Duration::ZERO)
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let run = tokio::spawn(
        FulfillmentWorker::new(
            worker_config("flight_app", Duration::from_millis(10)),
            log.clone(),
            Arc::new(InMemoryCatalog::new(catalog())),
        )
        .run(shutdown.clone()),
    );
    tokio::time::timeout(Duration::from_secs(5), async {
        while log.rejected() < 100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("drain stopped before the last page");
    shutdown.cancel();
    run.await.unwrap().unwrap();

    // Each entry was tried exactly once and is still pending.
    assert_eq!(log.rejected(), 100);
    assert_eq!(inner.pending(REQUESTS, GROUP).await.unwrap(), 100);
}

#[tokio::test]
async fn closed_log_stops_the_worker() {
    let log = Arc::new(InMemoryLog::new());
    log.close();
    let err = worker(log, Arc::new(InMemoryCatalog::new(catalog())))
        .run(CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, flightstream_core::Error::Log(LogError::Closed)));
}
