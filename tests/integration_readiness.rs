mod common;

use std::time::{Duration, Instant};

use framework_bench::config::TestEndpoint;
use framework_bench::process::{ProcessHandle, ProcessManager};

fn manager() -> ProcessManager {
    ProcessManager::new(
        "127.0.0.1",
        Duration::from_millis(100),
        Duration::from_millis(500),
        Duration::from_secs(2),
    )
}

/// A listening target is reported ready within a couple of polls.
#[tokio::test]
async fn ready_target_is_detected_quickly() {
    let addr = common::spawn_reference().await;
    let pm = manager();
    let mut handle = ProcessHandle::external("reference");

    let started = Instant::now();
    let ready = pm
        .wait_until_ready(
            &mut handle,
            addr.port(),
            &TestEndpoint::get("/health", "Health check"),
            Duration::from_secs(5),
        )
        .await;

    assert!(ready);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(handle.cold_start().is_some());
}

/// 4xx counts as "up": the server answered, it just lacks the route.
#[tokio::test]
async fn client_error_status_counts_as_ready() {
    let addr = common::spawn_reference().await;
    let mut handle = ProcessHandle::external("reference");
    let ready = manager()
        .wait_until_ready(
            &mut handle,
            addr.port(),
            &TestEndpoint::get("/no-such-route", ""),
            Duration::from_secs(5),
        )
        .await;
    assert!(ready);
}

/// Nothing listening: `false` once the timeout has elapsed.
#[tokio::test]
async fn silent_port_times_out() {
    let port = common::free_port();
    let mut handle = ProcessHandle::external("nobody");

    let started = Instant::now();
    let ready = manager()
        .wait_until_ready(
            &mut handle,
            port,
            &TestEndpoint::get("/", ""),
            Duration::from_secs(1),
        )
        .await;

    assert!(!ready);
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert!(started.elapsed() < Duration::from_secs(5));
}

/// The binary's reference mode behaves like any other launched target.
#[cfg(unix)]
#[tokio::test]
async fn launched_reference_binary_becomes_ready_and_stops() {
    let port = common::free_port();
    let target = common::reference_target("launched", port);
    let pm = manager();

    let mut handle = pm.start(&target).expect("spawn reference binary");
    let ready = pm
        .wait_until_ready(
            &mut handle,
            port,
            &TestEndpoint::get("/health", ""),
            Duration::from_secs(15),
        )
        .await;
    assert!(ready);
    assert!(handle.cold_start().unwrap() > Duration::ZERO);

    pm.stop(&mut handle).await;
    pm.stop(&mut handle).await;

    // The port is free again once the group is gone.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(std::net::TcpListener::bind(("127.0.0.1", port)).is_ok());
}
