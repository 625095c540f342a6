//! # Load Generator
//!
//! Drives concurrent traffic at one target for a fixed wall-clock window and
//! collects latency samples.
//!
//! ## Execution Model
//!
//! 1. The start instant is captured once and handed to every worker together
//!    with the deadline. Nothing is kept in statics, so the generator can be run
//!    back to back against different targets in the same process.
//! 2. `concurrency` workers are spawned on a [`JoinSet`]. Each checks the wall
//!    clock itself before every batch.
//! 3. A worker issues `batch_size` requests to randomly chosen endpoints
//!    concurrently and awaits them together, then folds the outcomes into its
//!    own tally.
//! 4. Late in the window workers pause briefly between batches (1 ms past 50%
//!    of the window, 2 ms past 80%) so a struggling target is not buried.
//! 5. A batch in flight at the deadline is drained, then the worker returns
//!    its tally. Tallies are merged after joining; workers never touch shared
//!    counters.
//!
//! Only successful latencies are kept for percentile computation. Failures
//! are counted, not timed.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use rand::Rng;
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::{LoadSettings, TestEndpoint};
use crate::driver::RequestDriver;
use crate::metrics::{LatencyRecord, SampleSet};

/// Timing shared by all workers of one run.
#[derive(Debug, Clone, Copy)]
struct RunWindow {
    started: Instant,
    deadline: Instant,
    length: Duration,
}

impl RunWindow {
    fn new(started: Instant, length: Duration) -> Self {
        Self {
            started,
            deadline: started + length,
            length,
        }
    }

    fn elapsed_fraction(&self, now: Instant) -> f64 {
        if self.length.is_zero() {
            return 1.0;
        }
        now.duration_since(self.started).as_secs_f64() / self.length.as_secs_f64()
    }

    /// Pause inserted between batches as the window progresses.
    fn throttle(&self, now: Instant) -> Option<Duration> {
        let fraction = self.elapsed_fraction(now);
        if fraction > 0.8 {
            Some(Duration::from_millis(2))
        } else if fraction > 0.5 {
            Some(Duration::from_millis(1))
        } else {
            None
        }
    }
}

/// Per-worker counters, merged once the worker finishes.
#[derive(Debug, Default)]
struct WorkerTally {
    total: u64,
    success: u64,
    errors: u64,
    latencies_ms: Vec<f64>,
}

impl WorkerTally {
    fn record(&mut self, record: LatencyRecord) {
        self.total += 1;
        if record.success {
            self.success += 1;
            self.latencies_ms.push(record.latency_ms());
        } else {
            self.errors += 1;
        }
    }

    fn record_panicked(&mut self) {
        self.total += 1;
        self.errors += 1;
    }

    fn merge(&mut self, other: WorkerTally) {
        self.total += other.total;
        self.success += other.success;
        self.errors += other.errors;
        self.latencies_ms.extend(other.latencies_ms);
    }
}

#[derive(Debug, Clone)]
pub struct LoadGenerator {
    settings: LoadSettings,
    endpoints: Arc<[TestEndpoint]>,
}

impl LoadGenerator {
    pub fn new(settings: LoadSettings, endpoints: Arc<[TestEndpoint]>) -> Self {
        Self {
            settings,
            endpoints,
        }
    }

    pub fn settings(&self) -> &LoadSettings {
        &self.settings
    }

    /// Run one load window against whatever `driver` points at.
    ///
    /// Always returns; targets that fail every request simply produce a sample
    /// set with no latencies, which [`summarize`](crate::metrics::summarize)
    /// turns into an error.
    pub async fn run<D>(&self, driver: Arc<D>) -> SampleSet
    where
        D: RequestDriver + 'static,
    {
        let window = RunWindow::new(Instant::now(), self.settings.duration);
        info!(
            "Generating load for {:?} with {} workers (batch size {})",
            self.settings.duration, self.settings.concurrency, self.settings.batch_size
        );

        let mut workers = JoinSet::new();
        for worker_id in 0..self.settings.concurrency {
            workers.spawn(run_worker(
                worker_id,
                window,
                self.settings.batch_size,
                driver.clone(),
                self.endpoints.clone(),
            ));
        }

        let mut tally = WorkerTally::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(worker_tally) => tally.merge(worker_tally),
                Err(e) => warn!("Load worker failed: {}", e),
            }
        }
        let actual_duration = window.started.elapsed();

        info!(
            "Load window finished after {:?}: {} requests, {} ok, {} failed",
            actual_duration, tally.total, tally.success, tally.errors
        );

        SampleSet {
            latencies_ms: tally.latencies_ms,
            total_requests: tally.total,
            error_requests: tally.errors,
            actual_duration,
        }
    }
}

async fn run_worker<D>(
    worker_id: usize,
    window: RunWindow,
    batch_size: usize,
    driver: Arc<D>,
    endpoints: Arc<[TestEndpoint]>,
) -> WorkerTally
where
    D: RequestDriver + 'static,
{
    let mut tally = WorkerTally::default();
    if endpoints.is_empty() {
        return tally;
    }

    while Instant::now() < window.deadline {
        let picks: Vec<usize> = {
            let mut rng = rand::thread_rng();
            (0..batch_size)
                .map(|_| rng.gen_range(0..endpoints.len()))
                .collect()
        };

        let batch = picks.into_iter().map(|i| {
            let driver = driver.as_ref();
            let endpoint = &endpoints[i];
            AssertUnwindSafe(driver.send_request(endpoint)).catch_unwind()
        });

        for outcome in join_all(batch).await {
            match outcome {
                Ok(record) => tally.record(record),
                Err(_) => tally.record_panicked(),
            }
        }

        if let Some(pause) = window.throttle(Instant::now()) {
            sleep(pause).await;
        }
    }

    debug!(
        "Worker {} done: {} requests ({} failed)",
        worker_id, tally.total, tally.errors
    );
    tally
}
