//! # Utility Functions and Helper Module
//!
//! Formatting for human-readable output, validation of user-supplied
//! parameters, and system information used in report metadata.
//!
//! ## Usage Examples
//!
//! ```rust
//! use framework_bench::utils::*;
//! use std::time::Duration;
//!
//! # fn main() -> framework_bench::error::Result<()> {
//! assert_eq!(format_duration(Duration::from_micros(1500)), "1.50ms");
//! assert_eq!(format_request_rate(15500.0), "15.50K req/s");
//! validate_port(3000)?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BenchError, Result};

/// Generate a unique identifier for a benchmark run
///
/// Used to tag report files and log lines so results from several runs on the
/// same machine can be told apart.
pub fn generate_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Format a duration in a human-readable way
///
/// Automatically selects the most appropriate unit based on magnitude:
///
/// - **Nanoseconds**: < 1,000 ns (e.g., "500ns")
/// - **Microseconds**: < 1,000,000 ns (e.g., "1.50μs")
/// - **Milliseconds**: < 1,000,000,000 ns (e.g., "25.75ms")
/// - **Seconds**: < 60 seconds (e.g., "5.25s")
/// - **Minutes and Hours**: For longer durations (e.g., "5m 30s", "2h 15m 30s")
///
/// ## Examples
///
/// ```rust
/// # use framework_bench::utils::format_duration;
/// # use std::time::Duration;
/// assert_eq!(format_duration(Duration::from_nanos(750)), "750ns");
/// assert_eq!(format_duration(Duration::from_micros(2500)), "2.50ms");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_ns = duration.as_nanos();

    if total_ns < 1_000 {
        format!("{}ns", total_ns)
    } else if total_ns < 1_000_000 {
        format!("{:.2}μs", total_ns as f64 / 1_000.0)
    } else if total_ns < 1_000_000_000 {
        format!("{:.2}ms", total_ns as f64 / 1_000_000.0)
    } else if total_ns < 60_000_000_000 {
        format!("{:.2}s", total_ns as f64 / 1_000_000_000.0)
    } else {
        let seconds = duration.as_secs();
        let minutes = seconds / 60;
        let remaining_seconds = seconds % 60;

        if minutes < 60 {
            format!("{}m {}s", minutes, remaining_seconds)
        } else {
            let hours = minutes / 60;
            let remaining_minutes = minutes % 60;
            format!("{}h {}m {}s", hours, remaining_minutes, remaining_seconds)
        }
    }
}

/// Format a latency given in (fractional) milliseconds.
pub fn format_latency_ms(ms: f64) -> String {
    match Duration::try_from_secs_f64(ms / 1_000.0) {
        Ok(duration) => format_duration(duration),
        Err(_) => "n/a".to_string(),
    }
}

/// Format a request rate in a human-readable way
///
/// Uses decimal scaling (powers of 1000):
/// - < 1,000: e.g. "750 req/s"
/// - < 1,000,000: e.g. "15.50K req/s"
/// - otherwise: e.g. "2.30M req/s"
pub fn format_request_rate(requests_per_second: f64) -> String {
    if requests_per_second < 1000.0 {
        format!("{:.0} req/s", requests_per_second)
    } else if requests_per_second < 1_000_000.0 {
        format!("{:.2}K req/s", requests_per_second / 1000.0)
    } else {
        format!("{:.2}M req/s", requests_per_second / 1_000_000.0)
    }
}

/// Format a kilobyte count with binary scaling ("512 KB", "80.00 MB").
pub fn format_kb(kb: u64) -> String {
    let kb = kb as f64;
    if kb < 1024.0 {
        format!("{:.0} KB", kb)
    } else if kb < 1024.0 * 1024.0 {
        format!("{:.2} MB", kb / 1024.0)
    } else {
        format!("{:.2} GB", kb / (1024.0 * 1024.0))
    }
}

/// Validate that a port number is in the valid range
///
/// Ports below 1024 are reserved for system services and typically require
/// root privileges to bind; benchmark targets are expected to run as a normal
/// user. The upper bound is enforced by the `u16` type.
pub fn validate_port(port: u16) -> Result<()> {
    if port < 1024 {
        return Err(BenchError::config(format!(
            "Port number {} is too low (below 1024)",
            port
        )));
    }
    Ok(())
}

/// Validate that concurrency level is reasonable
///
/// - **Minimum**: 1 worker
/// - **Maximum**: 1024 workers
pub fn validate_concurrency(concurrency: usize) -> Result<()> {
    if concurrency == 0 {
        return Err(BenchError::config("Concurrency cannot be zero"));
    }
    if concurrency > 1024 {
        return Err(BenchError::config(format!(
            "Concurrency {} is too high (maximum 1024)",
            concurrency
        )));
    }
    Ok(())
}

/// System information recorded alongside results for reproducibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub physical_cores: usize,
    pub hostname: Option<String>,
    pub harness_version: String,
}

impl SystemInfo {
    pub fn collect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: num_cpus::get(),
            physical_cores: num_cpus::get_physical(),
            hostname: std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()),
            harness_version: crate::VERSION.to_string(),
        }
    }
}
