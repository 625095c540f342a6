//! Error taxonomy for benchmark runs.
//!
//! Per-request network failures are never represented here: they are folded
//! into [`LatencyRecord`](crate::metrics::LatencyRecord) values and end up in
//! the error-rate statistic. Everything in [`BenchError`] is a per-target (or
//! configuration) failure that the orchestrator catches, logs and retries.

use std::io;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BenchError>;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("failed to launch target '{target}': {source}")]
    Launch {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error("target '{0}' has no launch command and manual start mode is off")]
    MissingLaunchCommand(String),
    #[error("target '{target}' did not become ready on port {port} within {timeout:?}")]
    ReadinessTimeout {
        target: String,
        port: u16,
        timeout: Duration,
    },
    #[error("target '{target}' produced no successful responses ({total_requests} requests sent)")]
    InsufficientSamples { target: String, total_requests: u64 },
    #[error("results for target '{target}' rejected: {reason}")]
    ValidityGate { target: String, reason: String },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl BenchError {
    /// Whether another attempt at the same target could plausibly succeed.
    ///
    /// Only configuration mistakes are permanent; launch failures, readiness
    /// timeouts, empty sample sets and rejected results all count against the
    /// retry budget.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            BenchError::Config(_) | BenchError::MissingLaunchCommand(_)
        )
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        BenchError::Config(msg.into())
    }
}
