mod common;

use std::sync::Arc;
use std::time::Duration;

use framework_bench::config::{
    default_endpoints, schema_validate_fixture, LoadSettings, TestEndpoint,
};
use framework_bench::driver::{probe_endpoints, ConnectionMode, HttpDriver, RequestDriver};
use framework_bench::load::LoadGenerator;
use framework_bench::metrics::{summarize, ValidityGate};

fn settings(duration: Duration, concurrency: usize) -> LoadSettings {
    LoadSettings {
        duration,
        concurrency,
        batch_size: 10,
        request_timeout: Duration::from_secs(5),
    }
}

/// A short run against a healthy target yields plenty of successful samples
/// and internally consistent statistics.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn load_run_against_reference_target() {
    let addr = common::spawn_reference().await;
    let driver = Arc::new(
        HttpDriver::new(
            "127.0.0.1",
            addr.port(),
            ConnectionMode::KeepAlive,
            Duration::from_secs(5),
        )
        .unwrap(),
    );

    let generator = LoadGenerator::new(
        settings(Duration::from_secs(2), 5),
        default_endpoints().into(),
    );
    let samples = generator.run(driver).await;

    assert!(samples.actual_duration >= Duration::from_secs(2));
    assert!(samples.total_requests >= samples.latencies_ms.len() as u64);
    assert_eq!(
        samples.total_requests,
        samples.latencies_ms.len() as u64 + samples.error_requests
    );

    let metrics = summarize("reference", "Reference", samples, Duration::ZERO).unwrap();
    assert!(metrics.total_successful_requests > 50);
    assert_eq!(metrics.error_requests, 0);
    assert!(metrics.min_latency_ms <= metrics.p50_latency_ms);
    assert!(metrics.p50_latency_ms <= metrics.p95_latency_ms);
    assert!(metrics.p95_latency_ms <= metrics.p99_latency_ms);
    assert!(metrics.p99_latency_ms <= metrics.max_latency_ms);
    assert!(metrics.average_latency_ms >= metrics.min_latency_ms);
    assert!(metrics.average_latency_ms <= metrics.max_latency_ms);
    assert!(metrics.requests_per_second > 0.0);
    ValidityGate::default().check(&metrics).unwrap();
}

/// POST bodies arrive intact: the validation route echoes what it received.
#[tokio::test]
async fn request_body_round_trip() {
    let addr = common::spawn_reference().await;
    let fixture = schema_validate_fixture();

    let driver = HttpDriver::new(
        "127.0.0.1",
        addr.port(),
        ConnectionMode::Fresh,
        Duration::from_secs(5),
    )
    .unwrap();
    let endpoint = TestEndpoint::post("/schema/validate?page=1&limit=10", fixture.clone(), "");
    let record = driver.send_request(&endpoint).await;
    assert!(record.success);
    assert_eq!(record.status, Some(200));

    let response: serde_json::Value = reqwest::Client::new()
        .post(format!("http://{}/schema/validate?page=1&limit=10", addr))
        .json(&fixture)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(response["success"], true);
    assert_eq!(response["validatedBody"], fixture);
    assert_eq!(response["validatedQuery"]["page"], "1");
}

/// Invalid bodies are answered with 400 and counted as failures.
#[tokio::test]
async fn rejected_body_is_a_failed_record() {
    let addr = common::spawn_reference().await;
    let mut body = schema_validate_fixture();
    body["user"]["phone"] = serde_json::json!("123");

    let driver = HttpDriver::new(
        "127.0.0.1",
        addr.port(),
        ConnectionMode::KeepAlive,
        Duration::from_secs(5),
    )
    .unwrap();
    let record = driver
        .send_request(&TestEndpoint::post("/schema/validate", body, ""))
        .await;
    assert!(!record.success);
    assert_eq!(record.status, Some(400));
}

/// Every built-in endpoint answers successfully on fresh connections.
#[tokio::test]
async fn sequential_probe_covers_all_endpoints() {
    let addr = common::spawn_reference().await;
    let driver = HttpDriver::new(
        "127.0.0.1",
        addr.port(),
        ConnectionMode::Fresh,
        Duration::from_secs(5),
    )
    .unwrap();
    let endpoints = default_endpoints();

    let results = probe_endpoints(&driver, &endpoints, 3).await;
    assert_eq!(results.len(), endpoints.len());
    for probe in results {
        assert_eq!(probe.successes, 3, "{} {}", probe.method, probe.path);
        assert!(probe.min_ms.unwrap() <= probe.max_ms.unwrap());
    }
}
