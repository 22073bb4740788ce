//! End-to-end runs against a mock report server and the in-memory broker.
//!
//! Each test mounts its own feeds on a fresh wiremock server, so tests never
//! share HTTP state.

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use stormfeed::delivery::{MemoryBroker, PublishError, Publisher, RetryPolicy, MAX_MESSAGE_BYTES};
use stormfeed::feed::{parse_base_url, FeedDate, FeedLimits, FetchError};
use stormfeed::pipeline::{Pipeline, RunError, RunState, Scheduler};
use stormfeed::report::{Category, FixedClock, Normalizer};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOPIC: &str = "raw-weather-reports";

const TORNADO_CSV: &str = "Time,F_Scale,Location,County,State,Lat,Lon,Comments\n\
    1830,UNK,2 N Denver,Denver,CO,39.77,-104.99,Brief touchdown\n";
const HAIL_CSV: &str = "Time,Size,Location,County,State,Lat,Lon,Comments\n\
    1200,100,Norman,Cleveland,OK,35.22,-97.44,Quarter size\n\
    1215,175,Moore,Cleveland,OK,35.34,-97.49,Golf ball\n";
const WIND_CSV: &str = "Time,Speed,Location,County,State,Lat,Lon,Comments\n\
    0905,UNK,Lubbock,Lubbock,TX,33.58,-101.85,Tree down\n";

fn fixed_normalizer() -> Normalizer {
    let now = Utc.with_ymd_and_hms(2024, 12, 6, 0, 0, 0).unwrap();
    Normalizer::new(Arc::new(FixedClock(now)))
}

fn pipeline_for(server: &MockServer, broker: &Arc<MemoryBroker>, max_attempts: u32) -> Pipeline {
    pipeline_at(&server.uri(), broker, max_attempts)
}

fn pipeline_at(base_url: &str, broker: &Arc<MemoryBroker>, max_attempts: u32) -> Pipeline {
    let policy = RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(10),
    };
    let publisher = Arc::new(Publisher::new(broker.clone(), policy, MAX_MESSAGE_BYTES));
    Pipeline::new(
        reqwest::Client::new(),
        parse_base_url(base_url).unwrap(),
        FeedLimits::default(),
        fixed_normalizer(),
        publisher,
        TOPIC,
    )
}

async fn mount_feed(server: &MockServer, file: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/{file}")))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn mount_today(server: &MockServer) {
    mount_feed(server, "today_torn.csv", TORNADO_CSV).await;
    mount_feed(server, "today_hail.csv", HAIL_CSV).await;
    mount_feed(server, "today_wind.csv", WIND_CSV).await;
}

fn sent_json(broker: &MemoryBroker) -> Vec<serde_json::Value> {
    broker.sent().iter().map(|m| m.json().unwrap()).collect()
}

async fn wait_for_sent(broker: &MemoryBroker, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while broker.sent().len() < count {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {count} messages, have {}",
            broker.sent().len()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ============================================================================
// Successful Runs
// ============================================================================

#[tokio::test]
async fn test_today_run_publishes_in_category_order() {
    let server = MockServer::start().await;
    mount_today(&server).await;
    let broker = Arc::new(MemoryBroker::new());
    let pipeline = pipeline_for(&server, &broker, 1);

    let summary = pipeline.run(&FeedDate::Today).await.unwrap();

    assert_eq!((summary.tornado, summary.hail, summary.wind), (1, 2, 1));
    assert_eq!(summary.delivered, 4);
    assert_eq!(summary.located, 4);
    assert_eq!(summary.dropped, 0);
    assert_eq!(pipeline.state(), RunState::Idle);

    let messages = sent_json(&broker);
    let order: Vec<(&str, &str)> = messages
        .iter()
        .map(|m| (m["category"].as_str().unwrap(), m["Location"].as_str().unwrap()))
        .collect();
    assert_eq!(
        order,
        vec![
            ("tornado", "2 N Denver"),
            ("hail", "Norman"),
            ("hail", "Moore"),
            ("wind", "Lubbock"),
        ]
    );
    assert!(messages.iter().all(|m| m["observedAt"] == "1733443200000"));
    assert!(broker.sent().iter().all(|m| m.topic == TOPIC));
}

#[tokio::test]
async fn test_message_keeps_raw_columns_as_strings() {
    let server = MockServer::start().await;
    mount_today(&server).await;
    let broker = Arc::new(MemoryBroker::new());
    let pipeline = pipeline_for(&server, &broker, 1);

    pipeline.run(&FeedDate::Today).await.unwrap();

    let first = &sent_json(&broker)[0];
    assert_eq!(
        *first,
        serde_json::json!({
            "Time": "1830",
            "F_Scale": "UNK",
            "Location": "2 N Denver",
            "County": "Denver",
            "State": "CO",
            "Lat": "39.77",
            "Lon": "-104.99",
            "Comments": "Brief touchdown",
            "category": "tornado",
            "observedAt": "1733443200000",
        })
    );
}

#[tokio::test]
async fn test_backfill_run_uses_date_coded_feeds_and_uniform_stamp() {
    let server = MockServer::start().await;
    mount_feed(&server, "240526_rpts_torn.csv", TORNADO_CSV).await;
    mount_feed(&server, "240526_rpts_hail.csv", HAIL_CSV).await;
    mount_feed(&server, "240526_rpts_wind.csv", WIND_CSV).await;
    let broker = Arc::new(MemoryBroker::new());
    let pipeline = pipeline_for(&server, &broker, 1);

    let date = FeedDate::Backfill("1716764227".parse().unwrap());
    let summary = pipeline.run(&date).await.unwrap();

    assert_eq!(summary.total(), 4);
    let messages = sent_json(&broker);
    assert_eq!(messages.len(), 4);
    assert!(messages.iter().all(|m| m["observedAt"] == "1716764227"));
}

#[tokio::test]
async fn test_header_only_feeds_publish_nothing() {
    let server = MockServer::start().await;
    mount_feed(&server, "today_torn.csv", "Time,F_Scale,Location\n").await;
    mount_feed(&server, "today_hail.csv", "Time,Size,Location\n").await;
    mount_feed(&server, "today_wind.csv", "Time,Speed,Location\n").await;
    let broker = Arc::new(MemoryBroker::new());
    let pipeline = pipeline_for(&server, &broker, 1);

    let summary = pipeline.run(&FeedDate::Today).await.unwrap();

    assert_eq!(summary.total(), 0);
    assert_eq!(summary.delivered, 0);
    assert!(broker.sent().is_empty());
}

// ============================================================================
// Failed Runs
// ============================================================================

#[tokio::test]
async fn test_one_failed_feed_abandons_the_whole_run() {
    let server = MockServer::start().await;
    mount_feed(&server, "today_torn.csv", TORNADO_CSV).await;
    mount_feed(&server, "today_wind.csv", WIND_CSV).await;
    Mock::given(method("GET"))
        .and(path("/today_hail.csv"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let broker = Arc::new(MemoryBroker::new());
    let pipeline = pipeline_for(&server, &broker, 1);

    let err = pipeline.run(&FeedDate::Today).await.unwrap_err();

    match err {
        RunError::Fetch { category, source } => {
            assert_eq!(category, Category::Hail);
            assert!(matches!(source, FetchError::HttpStatus(503)));
        }
        other => panic!("Expected fetch failure, got {:?}", other),
    }
    assert_eq!(broker.send_attempts(), 0);
    assert_eq!(broker.connect_calls(), 0);
    assert_eq!(pipeline.state(), RunState::Failed);
}

#[tokio::test]
async fn test_malformed_feed_fails_run() {
    let server = MockServer::start().await;
    mount_feed(&server, "today_torn.csv", TORNADO_CSV).await;
    mount_feed(&server, "today_hail.csv", "Time,Size\n1200\n").await;
    mount_feed(&server, "today_wind.csv", WIND_CSV).await;
    let broker = Arc::new(MemoryBroker::new());
    let pipeline = pipeline_for(&server, &broker, 1);

    let err = pipeline.run(&FeedDate::Today).await.unwrap_err();

    assert!(matches!(
        err,
        RunError::Fetch {
            category: Category::Hail,
            source: FetchError::Parse(_),
        }
    ));
    assert!(broker.sent().is_empty());
}

#[tokio::test]
async fn test_exhausted_delivery_fails_run_and_keeps_messages() {
    let server = MockServer::start().await;
    mount_today(&server).await;
    let broker = Arc::new(MemoryBroker::new());
    broker.fail_next_sends(10);
    let pipeline = pipeline_for(&server, &broker, 2);

    let err = pipeline.run(&FeedDate::Today).await.unwrap_err();

    assert!(matches!(
        err,
        RunError::Publish(PublishError::Exhausted { attempts: 2, .. })
    ));
    assert_eq!(pipeline.publisher().pending().await, 4);
    assert_eq!(pipeline.state(), RunState::Failed);
    assert_eq!(broker.disconnect_calls(), 1);
    assert!(!pipeline.publisher().is_connected().await);
}

#[tokio::test]
async fn test_unreachable_feed_server_fails_run_without_sending() {
    // Bind then drop a listener so nothing is listening on the port
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let broker = Arc::new(MemoryBroker::new());
    let pipeline = pipeline_at(&format!("http://127.0.0.1:{port}/"), &broker, 1);

    let err = pipeline.run(&FeedDate::Today).await.unwrap_err();

    assert!(
        matches!(
            err,
            RunError::Fetch {
                source: FetchError::Network(_),
                ..
            }
        ),
        "expected network fetch failure, got {:?}",
        err
    );
    assert_eq!(broker.send_attempts(), 0);
    assert_eq!(broker.connect_calls(), 0);
    assert_eq!(pipeline.state(), RunState::Failed);
}

// ============================================================================
// Run Guard
// ============================================================================

#[tokio::test]
async fn test_overlapping_run_is_rejected() {
    let server = MockServer::start().await;
    mount_feed(&server, "today_hail.csv", HAIL_CSV).await;
    mount_feed(&server, "today_wind.csv", WIND_CSV).await;
    Mock::given(method("GET"))
        .and(path("/today_torn.csv"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(TORNADO_CSV)
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    let broker = Arc::new(MemoryBroker::new());
    let pipeline = pipeline_for(&server, &broker, 1);

    let (first, second) = tokio::join!(pipeline.run(&FeedDate::Today), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        pipeline.run(&FeedDate::Today).await
    });

    assert!(first.is_ok());
    assert!(matches!(second, Err(RunError::AlreadyRunning)));
    assert_eq!(broker.sent().len(), 4);
}

#[tokio::test]
async fn test_abandoned_run_releases_guard() {
    let server = MockServer::start().await;
    mount_feed(&server, "today_hail.csv", HAIL_CSV).await;
    mount_feed(&server, "today_wind.csv", WIND_CSV).await;
    Mock::given(method("GET"))
        .and(path("/today_torn.csv"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(TORNADO_CSV)
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;
    let broker = Arc::new(MemoryBroker::new());
    let pipeline = pipeline_for(&server, &broker, 1);
    let mut states = pipeline.subscribe();

    let abandoned =
        tokio::time::timeout(Duration::from_millis(100), pipeline.run(&FeedDate::Today)).await;
    assert!(abandoned.is_err());
    assert_eq!(*states.borrow_and_update(), RunState::Failed);

    // Guard released: a new run is admitted instead of AlreadyRunning.
    let next = tokio::time::timeout(Duration::from_millis(100), pipeline.run(&FeedDate::Today)).await;
    assert!(next.is_err(), "second run should reach the slow fetch, not be rejected");
}

// ============================================================================
// One-shot Runs
// ============================================================================

#[tokio::test]
async fn test_one_shot_run_closes_connection_when_done() {
    let server = MockServer::start().await;
    mount_today(&server).await;
    let broker = Arc::new(MemoryBroker::new());
    let pipeline = pipeline_for(&server, &broker, 1);

    let summary = pipeline
        .run_to_completion(&FeedDate::Today, std::future::pending(), Duration::from_secs(1))
        .await
        .unwrap();

    assert_eq!(summary.delivered, 4);
    assert_eq!(broker.disconnect_calls(), 1);
}

#[tokio::test]
async fn test_shutdown_during_one_shot_run_disconnects_broker() {
    let server = MockServer::start().await;
    mount_feed(&server, "today_hail.csv", HAIL_CSV).await;
    mount_feed(&server, "today_wind.csv", WIND_CSV).await;
    Mock::given(method("GET"))
        .and(path("/today_torn.csv"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(TORNADO_CSV)
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;
    let broker = Arc::new(MemoryBroker::new());
    let pipeline = pipeline_for(&server, &broker, 1);
    pipeline.publisher().ensure_connected().await.unwrap();

    let err = pipeline
        .run_to_completion(
            &FeedDate::Today,
            tokio::time::sleep(Duration::from_millis(100)),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::Interrupted));
    assert_eq!(pipeline.state(), RunState::Failed);
    assert_eq!(broker.disconnect_calls(), 1);
    assert!(!broker.is_connected());
    assert!(broker.sent().is_empty());
}

// ============================================================================
// Scheduler
// ============================================================================

#[tokio::test]
async fn test_scheduler_runs_immediately_then_on_trigger_and_closes_on_shutdown() {
    let server = MockServer::start().await;
    mount_today(&server).await;
    mount_feed(&server, "241206_rpts_torn.csv", TORNADO_CSV).await;
    mount_feed(&server, "241206_rpts_hail.csv", "Time,Size\n").await;
    mount_feed(&server, "241206_rpts_wind.csv", "Time,Speed\n").await;
    let broker = Arc::new(MemoryBroker::new());
    let pipeline = Arc::new(pipeline_for(&server, &broker, 1));

    let (scheduler, trigger) = Scheduler::new(
        pipeline.clone(),
        Duration::from_secs(3600),
        Duration::from_secs(1),
    );
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(scheduler.run_until(async {
        let _ = stop_rx.await;
    }));

    wait_for_sent(&broker, 4).await;

    assert!(trigger.trigger(FeedDate::Backfill("2024-12-06".parse().unwrap())));
    wait_for_sent(&broker, 5).await;
    assert_eq!(sent_json(&broker)[4]["observedAt"], "2024-12-06");

    stop_tx.send(()).unwrap();
    handle.await.unwrap();

    assert_eq!(broker.disconnect_calls(), 1);
    assert!(!broker.is_connected());
    assert!(!pipeline.publisher().is_connected().await);
}
