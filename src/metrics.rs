use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{BenchError, Result};

/// Outcome of a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyRecord {
    pub latency: Duration,
    pub success: bool,
    /// Response status, `None` when no response arrived.
    pub status: Option<u16>,
}

impl LatencyRecord {
    pub fn success(latency: Duration, status: u16) -> Self {
        Self {
            latency,
            success: true,
            status: Some(status),
        }
    }

    pub fn failure(latency: Duration, status: Option<u16>) -> Self {
        Self {
            latency,
            success: false,
            status,
        }
    }

    pub fn latency_ms(&self) -> f64 {
        self.latency.as_secs_f64() * 1_000.0
    }
}

/// Resident memory of a target process at the end of its test window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub rss_kb: u64,
    pub peak_rss_kb: Option<u64>,
}

/// Final summary for one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub target_name: String,
    pub display_label: String,
    pub cold_start_time_ms: f64,
    pub total_requests: u64,
    pub total_successful_requests: u64,
    pub error_requests: u64,
    pub requests_per_second: f64,
    pub average_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub actual_test_duration_ms: f64,
    pub error_rate_percent: f64,
    pub memory_snapshot: Option<MemorySnapshot>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Raw counters handed to [`summarize`].
#[derive(Debug, Clone, Default)]
pub struct SampleSet {
    /// Latencies of successful requests only, in milliseconds, any order.
    pub latencies_ms: Vec<f64>,
    pub total_requests: u64,
    pub error_requests: u64,
    pub actual_duration: Duration,
}

/// Nearest-rank percentile over an ascending slice: `sorted[floor(len * q)]`,
/// clamped to the last element.
///
/// No interpolation is done. With small sample sets the upper percentiles
/// collapse onto the maximum.
pub fn nearest_rank(sorted: &[f64], quantile: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let index = (sorted.len() as f64 * quantile).floor() as usize;
    Some(sorted[index.min(sorted.len() - 1)])
}

/// Reduce raw samples for one target into a [`PerformanceMetrics`] record.
///
/// ## Errors
///
/// [`BenchError::InsufficientSamples`] when no successful latency was
/// recorded; such a target cannot produce meaningful statistics.
pub fn summarize(
    target_name: &str,
    display_label: &str,
    samples: SampleSet,
    cold_start: Duration,
) -> Result<PerformanceMetrics> {
    let SampleSet {
        mut latencies_ms,
        total_requests,
        error_requests,
        actual_duration,
    } = samples;

    if latencies_ms.is_empty() {
        return Err(BenchError::InsufficientSamples {
            target: target_name.to_string(),
            total_requests,
        });
    }

    latencies_ms.sort_unstable_by(f64::total_cmp);

    let successes = latencies_ms.len() as u64;
    let sum: f64 = latencies_ms.iter().sum();
    let average = sum / latencies_ms.len() as f64;
    let min = latencies_ms[0];
    let max = latencies_ms[latencies_ms.len() - 1];
    // Non-empty, checked above.
    let p50 = nearest_rank(&latencies_ms, 0.50).unwrap_or(max);
    let p95 = nearest_rank(&latencies_ms, 0.95).unwrap_or(max);
    let p99 = nearest_rank(&latencies_ms, 0.99).unwrap_or(max);

    let duration_secs = actual_duration.as_secs_f64();
    let requests_per_second = if duration_secs > 0.0 {
        successes as f64 / duration_secs
    } else {
        0.0
    };

    let error_rate_percent = if total_requests > 0 {
        (error_requests.min(total_requests) as f64 / total_requests as f64) * 100.0
    } else {
        0.0
    };

    Ok(PerformanceMetrics {
        target_name: target_name.to_string(),
        display_label: display_label.to_string(),
        cold_start_time_ms: cold_start.as_secs_f64() * 1_000.0,
        total_requests,
        total_successful_requests: successes,
        error_requests,
        requests_per_second,
        // Summation error can push the mean a hair outside [min, max].
        average_latency_ms: average.clamp(min, max),
        min_latency_ms: min,
        max_latency_ms: max,
        p50_latency_ms: p50,
        p95_latency_ms: p95,
        p99_latency_ms: p99,
        actual_test_duration_ms: duration_secs * 1_000.0,
        error_rate_percent,
        memory_snapshot: None,
        timestamp: chrono::Utc::now(),
    })
}

/// Post-hoc sanity check rejecting statistically unreliable runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ValidityGate {
    /// Total requests must be strictly greater than this.
    pub min_total_requests: u64,
    /// Error rate must be strictly below this.
    pub max_error_rate_percent: f64,
}

impl Default for ValidityGate {
    fn default() -> Self {
        Self {
            min_total_requests: defaults::MIN_TOTAL_REQUESTS,
            max_error_rate_percent: defaults::MAX_ERROR_RATE_PERCENT,
        }
    }
}

impl ValidityGate {
    pub fn check(&self, metrics: &PerformanceMetrics) -> Result<()> {
        if metrics.total_requests <= self.min_total_requests {
            return Err(BenchError::ValidityGate {
                target: metrics.target_name.clone(),
                reason: format!(
                    "only {} requests completed (need more than {})",
                    metrics.total_requests, self.min_total_requests
                ),
            });
        }
        if metrics.error_rate_percent >= self.max_error_rate_percent {
            return Err(BenchError::ValidityGate {
                target: metrics.target_name.clone(),
                reason: format!(
                    "error rate {:.1}% exceeds {:.1}%",
                    metrics.error_rate_percent, self.max_error_rate_percent
                ),
            });
        }
        Ok(())
    }
}
