//! End-to-end tests for the service wiring.
//!
//! A simulated sensor feeds the real sampler; samples flow through the
//! collector into the store and the daily CSV file, lifecycle events land in
//! `connection.log`, and the API reports on all of it.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use time::UtcOffset;
use tower::ServiceExt;

use pmsense_core::mock::{MockModernFactory, MockModernSensor, MockTransport};
use pmsense_core::{DriverSet, EventDispatcher, Sampler, StaticPorts};
use pmsense_service::collector::CONNECTION_LOG_FILE;
use pmsense_service::{AppState, Backend, Collector, Config, ConnectionLog, api};
use pmsense_store::{CsvLog, DataStore};

struct Service {
    state: Arc<AppState>,
    collector: tokio::task::JoinHandle<u64>,
    log_task: tokio::task::JoinHandle<()>,
    transport: MockTransport,
    dir: tempfile::TempDir,
}

fn start() -> Service {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.logging.directory = dir.path().to_path_buf();
    config.sensor.sample_period_secs = 1.0;
    config.validate().unwrap();

    let transport = MockTransport::new();
    let backend = Backend {
        transport: Arc::new(transport.clone()),
        ports: Arc::new(StaticPorts::new(["SIM0"])),
        drivers: DriverSet::new().with_modern(Arc::new(MockModernFactory::with_sensor(
            MockModernSensor::simulated(),
        ))),
    };

    let events = EventDispatcher::default();
    let log_task = ConnectionLog::new(dir.path(), UtcOffset::UTC)
        .unwrap()
        .spawn(events.subscribe());
    let csv = CsvLog::with_prefix(dir.path(), config.logging.file_prefix.clone()).unwrap();

    let (sampler, samples) = Sampler::builder(config.sensor.sampler_config(UtcOffset::UTC))
        .transport(Arc::clone(&backend.transport))
        .ports(Arc::clone(&backend.ports))
        .drivers(backend.drivers.clone())
        .events(events)
        .spawn()
        .unwrap();

    let store = Arc::new(DataStore::new());
    let collector = Collector::new(Arc::clone(&store))
        .with_sink(Arc::new(csv))
        .spawn(samples);

    Service {
        state: AppState::new(sampler, store, backend, config),
        collector,
        log_task,
        transport,
        dir,
    }
}

async fn get_json(state: &Arc<AppState>, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = api::app(Arc::clone(state))
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn csv_lines(dir: &std::path::Path) -> Vec<String> {
    let mut lines = Vec::new();
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().is_some_and(|ext| ext == "csv") {
            let content = std::fs::read_to_string(&path).unwrap();
            lines.extend(content.lines().map(str::to_string));
        }
    }
    lines
}

#[tokio::test(start_paused = true)]
async fn test_simulated_sensor_end_to_end() {
    let service = start();
    tokio::time::sleep(Duration::from_millis(10_500)).await;

    let (status, json) = get_json(&service.state, "/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["sampler"]["connected"], true);
    assert_eq!(json["sampler"]["active_port"], "SIM0");
    assert_eq!(json["sampler"]["driver"], "modern");
    assert!(json["latest"]["pm2_5"].is_number());

    let (_, stats) = get_json(&service.state, "/api/stats?window=all").await;
    assert!(stats["count"].as_u64().unwrap() >= 4);
    assert!(stats["pm10_0"]["max"].as_f64().unwrap() >= stats["pm1_0"]["avg"].as_f64().unwrap());

    service.state.sampler.stop().await;
    let collected = service.collector.await.unwrap();
    assert_eq!(service.state.store.len() as u64, collected);
    assert_eq!(service.transport.open_links(), 0);

    let lines = csv_lines(service.dir.path());
    assert_eq!(lines[0], "timestamp,pm1,pm2_5,pm4,pm10");
    assert_eq!(lines.len() as u64, collected + 1);
    let fields: Vec<&str> = lines[1].split(',').collect();
    assert_eq!(fields.len(), 5);
    assert_eq!(fields[0].len(), "2025-01-01T00:00:00".len());
    assert!(fields[1].contains('.'));

    drop(service.state);
    tokio::time::timeout(Duration::from_secs(5), service.log_task)
        .await
        .unwrap()
        .unwrap();
    let log = std::fs::read_to_string(service.dir.path().join(CONNECTION_LOG_FILE)).unwrap();
    assert!(log.contains("Using UART driver on SIM0"));
    assert!(log.contains("Measurement started on SIM0"));
    assert!(log.contains("Disconnected from SIM0"));
}

#[tokio::test(start_paused = true)]
async fn test_pause_over_http_stops_collection() {
    let service = start();
    tokio::time::sleep(Duration::from_millis(7_500)).await;

    let response = api::app(Arc::clone(&service.state))
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/pause")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let before = service.state.store.len();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(service.state.store.len(), before);

    let (_, status) = get_json(&service.state, "/api/status").await;
    assert_eq!(status["sampler"]["paused"], true);
    assert_eq!(status["sampler"]["active_port"], "SIM0");

    service.state.sampler.stop().await;
    service.collector.await.unwrap();
    let log = std::fs::read_to_string(service.dir.path().join(CONNECTION_LOG_FILE)).unwrap();
    assert!(log.contains("Sampling paused"));
}
