//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use framework_bench::config::{HarnessConfig, TargetConfig};
use framework_bench::orchestrator::RetryPolicy;
use framework_bench::reference;

/// Port with nothing listening on it (at the time of the call).
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}

/// Serve the reference routes in-process on an ephemeral port.
pub async fn spawn_reference() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind reference listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, reference::router()).await;
    });
    addr
}

/// Target that launches this crate's binary as the reference server.
pub fn reference_target(name: &str, port: u16) -> TargetConfig {
    TargetConfig::new(name, format!("Reference ({})", name), port).with_command([
        env!("CARGO_BIN_EXE_framework-bench").to_string(),
        "--internal-reference-target".to_string(),
        port.to_string(),
    ])
}

/// Harness config tuned for fast tests.
pub fn quick_config(targets: Vec<TargetConfig>, duration: Duration) -> HarnessConfig {
    let mut config = HarnessConfig::new(targets);
    config.load.duration = duration;
    config.load.concurrency = 4;
    config.load.batch_size = 8;
    config.cooldown = Duration::from_millis(100);
    config.startup_timeout = Duration::from_secs(15);
    config.health_path = "/health".to_string();
    config.retry = RetryPolicy {
        max_attempts: 1,
        base_delay: Duration::from_millis(10),
    };
    config
}
