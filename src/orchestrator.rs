//! # Test Orchestrator
//!
//! Runs the full list of targets strictly one after another, isolating
//! failures so that one broken framework never costs the rest of the report.
//!
//! ## Per-Target Lifecycle
//!
//! ```text
//! Pending -> Starting -> Ready -> Testing -> Done
//!               |                   |
//!               +------> Failed <---+
//! ```
//!
//! A failed attempt is retried (with a fresh process) according to the
//! [`RetryPolicy`]. When attempts run out the target is recorded as a
//! [`TargetFailure`] and left out of the metrics list.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::{HarnessConfig, TargetConfig};
use crate::defaults;
use crate::driver::{probe_endpoints, ConnectionMode, EndpointLatency, HttpDriver};
use crate::error::{BenchError, Result};
use crate::load::LoadGenerator;
use crate::metrics::{summarize, PerformanceMetrics};
use crate::process::{ProcessHandle, ProcessManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetState {
    Pending,
    Starting,
    Ready,
    Testing,
    Done,
    Failed,
}

impl std::fmt::Display for TargetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TargetState::Pending => "pending",
            TargetState::Starting => "starting",
            TargetState::Ready => "ready",
            TargetState::Testing => "testing",
            TargetState::Done => "done",
            TargetState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Backoff between attempts at the same target: `base_delay * attempt`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_ATTEMPTS,
            base_delay: defaults::RETRY_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    pub fn should_retry(&self, attempt: u32, err: &BenchError) -> bool {
        attempt < self.max_attempts && err.is_retryable()
    }
}

/// A target that could not be benchmarked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetFailure {
    pub target_name: String,
    pub attempts: u32,
    pub last_state: TargetState,
    pub reason: String,
}

/// Everything one orchestration run produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    /// Successful targets, in configuration order.
    pub metrics: Vec<PerformanceMetrics>,
    pub failures: Vec<TargetFailure>,
    /// Sequential latency probe results keyed by target name (empty unless
    /// probing is enabled).
    #[serde(default)]
    pub endpoint_latencies: Vec<(String, Vec<EndpointLatency>)>,
}

/// Tracks and logs state transitions of one target.
struct TargetRun<'a> {
    target: &'a TargetConfig,
    state: TargetState,
}

impl<'a> TargetRun<'a> {
    fn new(target: &'a TargetConfig) -> Self {
        Self {
            target,
            state: TargetState::Pending,
        }
    }

    fn transition(&mut self, next: TargetState) {
        info!("[{}] {} -> {}", self.target.name, self.state, next);
        self.state = next;
    }
}

pub struct Orchestrator {
    config: HarnessConfig,
    processes: ProcessManager,
}

impl Orchestrator {
    pub fn new(config: HarnessConfig) -> Self {
        let processes = ProcessManager::from_config(&config);
        Self { config, processes }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Benchmark every configured target, sequentially.
    pub async fn run(&self) -> RunReport {
        let mut report = RunReport::default();
        let total = self.config.targets.len();
        info!(
            "Benchmarking {} targets ({} mode)",
            total,
            if self.config.manual_start { "manual start" } else { "automatic" }
        );

        for (i, target) in self.config.targets.iter().enumerate() {
            if i > 0 && !self.config.manual_start && !self.config.cooldown.is_zero() {
                info!("Cooling down for {:?} before next target", self.config.cooldown);
                sleep(self.config.cooldown).await;
            }
            info!("[{}/{}] {}", i + 1, total, target.display_label);

            match self.run_target(target).await {
                Ok((metrics, probe)) => {
                    info!(
                        "{}: {:.0} req/s, avg {:.2}ms, p95 {:.2}ms, errors {:.2}%",
                        target.name,
                        metrics.requests_per_second,
                        metrics.average_latency_ms,
                        metrics.p95_latency_ms,
                        metrics.error_rate_percent
                    );
                    report.metrics.push(metrics);
                    if let Some(probe) = probe {
                        report.endpoint_latencies.push((target.name.clone(), probe));
                    }
                }
                Err(failure) => {
                    error!(
                        "{} dropped after {} attempt(s): {}",
                        failure.target_name, failure.attempts, failure.reason
                    );
                    report.failures.push(failure);
                }
            }
        }

        info!(
            "Run complete: {} succeeded, {} failed",
            report.metrics.len(),
            report.failures.len()
        );
        report
    }

    /// All attempts at one target.
    async fn run_target(
        &self,
        target: &TargetConfig,
    ) -> std::result::Result<(PerformanceMetrics, Option<Vec<EndpointLatency>>), TargetFailure>
    {
        let retry = self.config.retry;
        let mut attempt = 1;
        loop {
            let mut run = TargetRun::new(target);
            match self.attempt(&mut run).await {
                Ok(outcome) => {
                    run.transition(TargetState::Done);
                    return Ok(outcome);
                }
                Err(e) => {
                    let failed_in = run.state;
                    run.transition(TargetState::Failed);
                    if retry.should_retry(attempt, &e) {
                        let delay = retry.delay_for(attempt);
                        warn!(
                            "{} attempt {}/{} failed while {}: {}. Retrying in {:?}",
                            target.name, attempt, retry.max_attempts, failed_in, e, delay
                        );
                        sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(TargetFailure {
                        target_name: target.name.clone(),
                        attempts: attempt,
                        last_state: failed_in,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    /// One attempt: start, wait, test, always stop.
    async fn attempt(
        &self,
        run: &mut TargetRun<'_>,
    ) -> Result<(PerformanceMetrics, Option<Vec<EndpointLatency>>)> {
        let target = run.target;
        run.transition(TargetState::Starting);
        let mut handle = if self.config.manual_start {
            ProcessHandle::external(target.name.clone())
        } else {
            self.processes.start(target)?
        };

        let outcome = self.exercise(run, &mut handle).await;
        self.processes.stop(&mut handle).await;
        outcome
    }

    async fn exercise(
        &self,
        run: &mut TargetRun<'_>,
        handle: &mut ProcessHandle,
    ) -> Result<(PerformanceMetrics, Option<Vec<EndpointLatency>>)> {
        let target = run.target;
        let ready = self
            .processes
            .wait_until_ready(
                handle,
                target.port,
                &self.config.health_endpoint(),
                self.config.startup_timeout,
            )
            .await;
        if !ready {
            return Err(BenchError::ReadinessTimeout {
                target: target.name.clone(),
                port: target.port,
                timeout: self.config.startup_timeout,
            });
        }
        run.transition(TargetState::Ready);

        let cold_start = if self.config.manual_start {
            Duration::ZERO
        } else {
            handle.cold_start().unwrap_or_default()
        };

        let probe = if self.config.probe_samples > 0 {
            let driver = HttpDriver::new(
                &self.config.host,
                target.port,
                ConnectionMode::Fresh,
                self.config.load.request_timeout,
            )?;
            Some(probe_endpoints(&driver, &self.config.endpoints, self.config.probe_samples).await)
        } else {
            None
        };

        run.transition(TargetState::Testing);
        let driver = Arc::new(HttpDriver::new(
            &self.config.host,
            target.port,
            ConnectionMode::KeepAlive,
            self.config.load.request_timeout,
        )?);
        let generator = LoadGenerator::new(self.config.load.clone(), self.config.endpoints.clone());
        let samples = generator.run(driver).await;

        let mut metrics = summarize(&target.name, &target.display_label, samples, cold_start)?;
        metrics.memory_snapshot = self.processes.memory_snapshot(handle);
        self.config.gate.check(&metrics)?;
        Ok((metrics, probe))
    }
}

/// Benchmark `targets` with default settings and return the successful
/// results in order.
pub async fn run_benchmarks(
    targets: Vec<TargetConfig>,
    test_duration_seconds: u64,
    manual_start: bool,
) -> Result<Vec<PerformanceMetrics>> {
    let mut config = HarnessConfig::new(targets);
    config.load.duration = Duration::from_secs(test_duration_seconds);
    config.manual_start = manual_start;
    config.validate()?;
    Ok(Orchestrator::new(config).run().await.metrics)
}
