//! # Framework Bench Library
//!
//! A comparative load-testing harness for HTTP web frameworks. Each framework
//! is an external server process; the harness launches it, measures its cold
//! start, drives a fixed endpoint mix against it for a time window, and
//! reduces the samples into a per-framework performance record.
//!
//! ## Architecture Overview
//!
//! - `process`: launch, readiness polling and teardown of target servers
//! - `driver`: one measured HTTP request/response cycle
//! - `load`: concurrent, duration-bounded load generation
//! - `metrics`: reduction of raw samples into statistics, validity gate
//! - `orchestrator`: sequential per-target lifecycle with retry and isolation
//! - `results`: JSON report, markdown comparison table, console summary
//! - `reference`: built-in reference target exposing the benchmark routes
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use framework_bench::{config::TargetConfig, orchestrator::run_benchmarks};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Servers already running on their ports.
//!     let targets = vec![
//!         TargetConfig::new("gin", "Gin", 3000),
//!         TargetConfig::new("hono", "Hono", 3002),
//!     ];
//!     for m in run_benchmarks(targets, 5, true).await? {
//!         println!("{}: {:.0} req/s", m.display_label, m.requests_per_second);
//!     }
//!     Ok(())
//! }
//! ```

/// Command-line interface
///
/// Argument parsing with clap, including human-readable durations
/// ("10s", "500ms") for every time-based option.
pub mod cli;

/// Targets, endpoints and run-wide settings
pub mod config;

/// Single HTTP request measurement
///
/// Defines the `RequestDriver` trait the load generator is generic over, and
/// the reqwest-backed implementation used against real targets.
pub mod driver;

pub mod error;

/// Duration-bounded concurrent load generation
pub mod load;

/// Console and file logging setup
pub mod logging;

/// Statistics over raw latency samples
///
/// Nearest-rank percentiles, throughput and error rate, plus the validity
/// gate that rejects statistically unreliable runs.
pub mod metrics;

/// Per-target lifecycle, retries and failure isolation
pub mod orchestrator;

/// Target server process management
///
/// Spawns each target in its own process group, polls its health endpoint
/// until it answers, and tears the whole group down afterwards.
pub mod process;

pub mod reference;

/// Report output
///
/// Writes the structured JSON report and the markdown comparison table, and
/// prints the ranked summary to the console.
pub mod results;

pub mod utils;

pub use cli::Args;
pub use config::{HarnessConfig, TargetConfig, TestEndpoint};
pub use error::{BenchError, Result};
pub use metrics::PerformanceMetrics;
pub use orchestrator::{run_benchmarks, Orchestrator, RunReport};
pub use results::ResultsManager;

/// The current version of the harness
///
/// Populated from Cargo.toml and recorded in every report.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Load window per target
    pub const DURATION: Duration = Duration::from_secs(10);

    /// Concurrent load workers
    pub const CONCURRENCY: usize = 20;

    /// Requests each worker issues together before awaiting them
    pub const BATCH_SIZE: usize = 50;

    /// Per-request timeout during load generation
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// Timeout of a single readiness probe
    pub const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

    /// Delay between readiness probes
    pub const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// How long a target may take to become ready
    ///
    /// Generous enough for `go run`, which compiles before serving.
    pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(20);

    /// Wait between SIGTERM and SIGKILL when stopping a target
    pub const STOP_GRACE: Duration = Duration::from_secs(5);

    /// Pause between targets in automatic mode
    pub const COOLDOWN: Duration = Duration::from_secs(3);

    /// Attempts per target, including the first
    pub const MAX_ATTEMPTS: u32 = 2;

    /// Backoff unit between attempts
    pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);

    /// Runs with this many requests or fewer are discarded
    pub const MIN_TOTAL_REQUESTS: u64 = 10;

    /// Runs at or above this error rate are discarded
    pub const MAX_ERROR_RATE_PERCENT: f64 = 50.0;

    /// Readiness probe path
    pub const HEALTH_PATH: &str = "/";

    pub const HOST: &str = "127.0.0.1";

    /// Report directory
    pub const OUTPUT_DIR: &str = "benchmark-results";
}
