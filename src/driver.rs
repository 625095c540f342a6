//! # Request Driver
//!
//! Performs exactly one HTTP request/response cycle and reports its outcome as
//! a [`LatencyRecord`]. Network failures (refused, reset, timed out) are data,
//! not errors: they come back as `success == false` with the time spent up to
//! the failure.
//!
//! Two client configurations exist and are used by different callers:
//!
//! - [`ConnectionMode::KeepAlive`]: pooled connections, used by the load
//!   generator for throughput.
//! - [`ConnectionMode::Fresh`]: a new connection per request, used by health
//!   checks and the sequential latency probe.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONNECTION, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{HttpMethod, TestEndpoint};
use crate::error::Result;
use crate::metrics::LatencyRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    KeepAlive,
    Fresh,
}

/// Anything that can turn an endpoint into a measured request.
///
/// The load generator is generic over this so it can be exercised without a
/// network.
#[async_trait]
pub trait RequestDriver: Send + Sync {
    async fn send_request(&self, endpoint: &TestEndpoint) -> LatencyRecord;
}

/// reqwest-backed driver bound to one target's base URL.
#[derive(Debug, Clone)]
pub struct HttpDriver {
    client: Client,
    base_url: String,
    timeout: Duration,
    mode: ConnectionMode,
}

impl HttpDriver {
    pub fn new(host: &str, port: u16, mode: ConnectionMode, timeout: Duration) -> Result<Self> {
        let builder = Client::builder()
            .http1_only()
            .tcp_nodelay(true)
            .no_proxy()
            .timeout(timeout);
        let builder = match mode {
            ConnectionMode::KeepAlive => builder,
            ConnectionMode::Fresh => builder.pool_max_idle_per_host(0),
        };

        Ok(Self {
            client: builder.build()?,
            base_url: format!("http://{}:{}", host, port),
            timeout,
            mode,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Lightweight GET used for readiness polling. Returns the status code, or
    /// `None` when no response arrived before the timeout.
    pub async fn probe_status(&self, path: &str) -> Option<u16> {
        let mut request = self.client.get(self.url(path));
        if self.mode == ConnectionMode::Fresh {
            request = request.header(CONNECTION, HeaderValue::from_static("close"));
        }
        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                // Drain so the connection closes cleanly.
                let _ = response.bytes().await;
                Some(status)
            }
            Err(e) => {
                debug!("Probe {} failed: {}", path, e);
                None
            }
        }
    }
}

#[async_trait]
impl RequestDriver for HttpDriver {
    async fn send_request(&self, endpoint: &TestEndpoint) -> LatencyRecord {
        let body = match endpoint.encode_body() {
            Ok(body) => body,
            Err(e) => {
                // Endpoints are validated at config load, so this is unreachable
                // for configured endpoints.
                warn!("Could not encode body for {}: {}", endpoint.path, e);
                return LatencyRecord::failure(Duration::ZERO, None);
            }
        };

        let method = match endpoint.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };
        let mut request = self.client.request(method, self.url(&endpoint.path));
        if self.mode == ConnectionMode::Fresh {
            request = request.header(CONNECTION, HeaderValue::from_static("close"));
        }
        if let Some(body) = body {
            request = request
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .body(body);
        }

        let start = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(_) => return LatencyRecord::failure(start.elapsed().min(self.timeout), None),
        };
        let status = response.status();
        let drained = response.bytes().await.is_ok();
        let latency = start.elapsed();

        if drained && status.is_success() {
            LatencyRecord::success(latency, status.as_u16())
        } else {
            LatencyRecord::failure(latency.min(self.timeout), Some(status.as_u16()))
        }
    }
}

/// Per-endpoint result of the sequential latency probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointLatency {
    pub method: HttpMethod,
    pub path: String,
    pub samples: usize,
    pub successes: usize,
    pub average_ms: Option<f64>,
    pub min_ms: Option<f64>,
    pub max_ms: Option<f64>,
}

/// Strict single-request latency measurement: `samples` sequential requests
/// per endpoint, one at a time, so no request competes with another.
pub async fn probe_endpoints<D: RequestDriver + ?Sized>(
    driver: &D,
    endpoints: &[TestEndpoint],
    samples: usize,
) -> Vec<EndpointLatency> {
    let mut results = Vec::with_capacity(endpoints.len());
    for endpoint in endpoints {
        let mut latencies = Vec::with_capacity(samples);
        for _ in 0..samples {
            let record = driver.send_request(endpoint).await;
            if record.success {
                latencies.push(record.latency_ms());
            }
        }

        let successes = latencies.len();
        let (average_ms, min_ms, max_ms) = if latencies.is_empty() {
            (None, None, None)
        } else {
            let sum: f64 = latencies.iter().sum();
            (
                Some(sum / successes as f64),
                latencies.iter().copied().reduce(f64::min),
                latencies.iter().copied().reduce(f64::max),
            )
        };

        results.push(EndpointLatency {
            method: endpoint.method,
            path: endpoint.path.clone(),
            samples,
            successes,
            average_ms,
            min_ms,
            max_ms,
        });
    }
    results
}
