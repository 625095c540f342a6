//! # Harness Configuration
//!
//! Static description of what gets benchmarked and how hard. Everything here
//! is constructed once at startup (from CLI flags plus an optional JSON file)
//! and treated as immutable for the rest of the run.
//!
//! ## Config File Format
//!
//! ```json
//! {
//!   "health_path": "/health",
//!   "targets": [
//!     {
//!       "name": "gin",
//!       "display_label": "Gin (Go)",
//!       "launch_command": ["go", "run", "main.go"],
//!       "working_directory": "frameworks/gin",
//!       "port": 3000
//!     }
//!   ],
//!   "endpoints": [
//!     { "path": "/techempower/json", "method": "GET", "description": "JSON serialization" }
//!   ]
//! }
//! ```
//!
//! Every top-level key is optional; missing keys fall back to the built-in
//! target and endpoint sets.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::cli::Args;
use crate::defaults;
use crate::error::{BenchError, Result};
use crate::metrics::ValidityGate;
use crate::orchestrator::RetryPolicy;
use crate::utils::{validate_concurrency, validate_port};

/// HTTP methods the load generator knows how to issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
        }
    }
}

/// One HTTP operation used to generate load.
///
/// The body is kept as a structured JSON value and serialized fresh for every
/// request, so a single endpoint definition can be shared by all workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestEndpoint {
    pub path: String,
    pub method: HttpMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub description: String,
}

impl TestEndpoint {
    pub fn get(path: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: HttpMethod::Get,
            body: None,
            description: description.into(),
        }
    }

    pub fn post(
        path: impl Into<String>,
        body: serde_json::Value,
        description: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            method: HttpMethod::Post,
            body: Some(body),
            description: description.into(),
        }
    }

    /// Serialize the request body, if any.
    pub fn encode_body(&self) -> Result<Option<Vec<u8>>> {
        match &self.body {
            Some(body) => Ok(Some(serde_json::to_vec(body)?)),
            None => Ok(None),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.path.starts_with('/') {
            return Err(BenchError::config(format!(
                "endpoint path '{}' must start with '/'",
                self.path
            )));
        }
        if self.method == HttpMethod::Post && self.body.is_none() {
            return Err(BenchError::config(format!(
                "POST endpoint '{}' requires a request body",
                self.path
            )));
        }
        self.encode_body()?;
        Ok(())
    }
}

/// One benchmark subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub display_label: String,
    /// Program followed by its arguments. `None` means the process is managed
    /// outside the harness.
    #[serde(default)]
    pub launch_command: Option<Vec<String>>,
    #[serde(default = "default_working_directory")]
    pub working_directory: PathBuf,
    pub port: u16,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Command-line pattern of stray processes to reap after stop.
    #[serde(default)]
    pub cleanup_pattern: Option<String>,
}

fn default_working_directory() -> PathBuf {
    PathBuf::from(".")
}

impl TargetConfig {
    pub fn new(name: impl Into<String>, display_label: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            display_label: display_label.into(),
            launch_command: None,
            working_directory: default_working_directory(),
            port,
            env: BTreeMap::new(),
            cleanup_pattern: None,
        }
    }

    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.launch_command = Some(command.into_iter().map(Into::into).collect());
        self
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = dir.into();
        self
    }

    pub fn with_cleanup_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.cleanup_pattern = Some(pattern.into());
        self
    }
}

/// Built-in target set: the frameworks this harness was written to compare.
///
/// Every target reads its listen port from the `PORT` environment variable,
/// which the process manager sets from `port`.
pub fn default_targets() -> Vec<TargetConfig> {
    vec![
        TargetConfig::new("elysia", "Elysia (Bun)", 3001)
            .with_command(["bun", "run", "src/index.ts"])
            .in_dir("frameworks/elysia")
            .with_cleanup_pattern("frameworks/elysia"),
        TargetConfig::new("hono", "Hono (Bun)", 3002)
            .with_command(["bun", "run", "src/index.ts"])
            .in_dir("frameworks/hono")
            .with_cleanup_pattern("frameworks/hono"),
        TargetConfig::new("express", "Express (Node.js)", 3003)
            .with_command(["node", "src/index.js"])
            .in_dir("frameworks/express")
            .with_cleanup_pattern("frameworks/express"),
        TargetConfig::new("koa", "Koa (Node.js)", 3004)
            .with_command(["node", "src/index.js"])
            .in_dir("frameworks/koa")
            .with_cleanup_pattern("frameworks/koa"),
        TargetConfig::new("vafast", "vafast (Bun)", 3005)
            .with_command(["bun", "run", "src/index.ts"])
            .in_dir("frameworks/vafast")
            .with_cleanup_pattern("frameworks/vafast"),
        TargetConfig::new("gin", "Gin (Go)", 3000)
            .with_command(["go", "run", "main.go"])
            .in_dir("frameworks/gin"),
    ]
}

/// Request body accepted by `POST /techempower/batch-process`.
pub fn batch_process_fixture() -> serde_json::Value {
    json!({
        "items": [
            { "id": 1, "value": 12.5, "name": "alpha", "category": "a", "tags": ["x", "y"] },
            { "id": 2, "value": 7.25, "name": "beta", "category": "b", "tags": ["y"] },
            { "id": 3, "value": 30.0, "name": "gamma" },
            { "id": 4, "value": 1.75, "name": "delta", "tags": [] }
        ],
        "operation": "average"
    })
}

/// Request body accepted by `POST /schema/validate`.
pub fn schema_validate_fixture() -> serde_json::Value {
    json!({
        "user": {
            "name": "Benchmark User",
            "phone": "13800138000",
            "age": 30,
            "active": true,
            "tags": ["load", "test"],
            "preferences": { "theme": "dark", "language": "en" }
        },
        "metadata": { "source": "framework-bench", "version": "1" }
    })
}

/// Built-in endpoint mix, matching the routes every framework server exposes.
pub fn default_endpoints() -> Vec<TestEndpoint> {
    vec![
        TestEndpoint::get("/techempower/json", "JSON serialization"),
        TestEndpoint::get("/techempower/plaintext", "Plain text response"),
        TestEndpoint::get("/techempower/db?queries=10", "Simulated database queries"),
        TestEndpoint::get("/techempower/complex-json?depth=3", "Nested object serialization"),
        TestEndpoint::post(
            "/techempower/batch-process",
            batch_process_fixture(),
            "Batch aggregation over a JSON payload",
        ),
        TestEndpoint::post(
            "/schema/validate",
            schema_validate_fixture(),
            "Schema validation of a nested JSON body",
        ),
    ]
}

/// Parameters of one load-generation window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadSettings {
    pub duration: Duration,
    pub concurrency: usize,
    /// Requests each worker keeps in flight before awaiting them together.
    pub batch_size: usize,
    pub request_timeout: Duration,
}

impl Default for LoadSettings {
    fn default() -> Self {
        Self {
            duration: defaults::DURATION,
            concurrency: defaults::CONCURRENCY,
            batch_size: defaults::BATCH_SIZE,
            request_timeout: defaults::REQUEST_TIMEOUT,
        }
    }
}

impl LoadSettings {
    pub fn validate(&self) -> Result<()> {
        if self.duration.is_zero() {
            return Err(BenchError::config("test duration must be greater than zero"));
        }
        validate_concurrency(self.concurrency)?;
        if self.batch_size == 0 {
            return Err(BenchError::config("batch size must be at least 1"));
        }
        if self.request_timeout.is_zero() {
            return Err(BenchError::config("request timeout must be greater than zero"));
        }
        Ok(())
    }
}

/// Optional JSON config file contents.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub targets: Option<Vec<TargetConfig>>,
    #[serde(default)]
    pub endpoints: Option<Vec<TestEndpoint>>,
    #[serde(default)]
    pub health_path: Option<String>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let file: ConfigFile = serde_json::from_str(&raw)?;
        debug!("Loaded config file {}", path.display());
        Ok(file)
    }
}

/// Everything one orchestration run needs.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub targets: Vec<TargetConfig>,
    pub endpoints: Arc<[TestEndpoint]>,
    pub health_path: String,
    pub load: LoadSettings,
    pub gate: ValidityGate,
    pub retry: RetryPolicy,
    pub startup_timeout: Duration,
    pub health_poll_interval: Duration,
    pub health_probe_timeout: Duration,
    pub stop_grace: Duration,
    pub cooldown: Duration,
    pub manual_start: bool,
    pub host: String,
    /// Sequential fresh-connection samples per endpoint; zero disables the probe.
    pub probe_samples: usize,
}

impl HarnessConfig {
    /// Config with built-in defaults for everything except the targets.
    pub fn new(targets: Vec<TargetConfig>) -> Self {
        Self {
            targets,
            endpoints: default_endpoints().into(),
            health_path: defaults::HEALTH_PATH.to_string(),
            load: LoadSettings::default(),
            gate: ValidityGate::default(),
            retry: RetryPolicy::default(),
            startup_timeout: defaults::STARTUP_TIMEOUT,
            health_poll_interval: defaults::HEALTH_POLL_INTERVAL,
            health_probe_timeout: defaults::HEALTH_PROBE_TIMEOUT,
            stop_grace: defaults::STOP_GRACE,
            cooldown: defaults::COOLDOWN,
            manual_start: false,
            host: defaults::HOST.to_string(),
            probe_samples: 0,
        }
    }

    /// Build the configuration from parsed CLI arguments.
    ///
    /// The config file (if any) supplies targets and endpoints; the target
    /// filter is applied afterwards so `--targets` can select from either the
    /// file or the built-in set.
    pub fn from_args(args: &Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };

        let mut targets = file.targets.unwrap_or_else(default_targets);
        if !args.targets.is_empty() {
            let unknown: Vec<&String> = args
                .targets
                .iter()
                .filter(|name| !targets.iter().any(|t| &t.name == *name))
                .collect();
            if !unknown.is_empty() {
                return Err(BenchError::config(format!("unknown targets: {:?}", unknown)));
            }
            targets.retain(|t| args.targets.contains(&t.name));
        }

        let mut config = Self::new(targets);
        if let Some(endpoints) = file.endpoints {
            config.endpoints = endpoints.into();
        }
        if let Some(health_path) = file.health_path {
            config.health_path = health_path;
        }
        config.load = LoadSettings {
            duration: args.duration,
            concurrency: args.concurrency,
            batch_size: args.batch_size,
            request_timeout: args.request_timeout,
        };
        config.gate = ValidityGate {
            min_total_requests: args.min_requests,
            max_error_rate_percent: args.max_error_rate,
        };
        config.retry = RetryPolicy {
            max_attempts: args.max_attempts,
            base_delay: args.retry_delay,
        };
        config.startup_timeout = args.startup_timeout;
        config.cooldown = args.cooldown;
        config.manual_start = args.manual_start;
        config.host = args.host.clone();
        config.probe_samples = args.probe_samples;

        config.validate()?;
        Ok(config)
    }

    pub fn health_endpoint(&self) -> TestEndpoint {
        TestEndpoint::get(self.health_path.clone(), "Health check")
    }

    /// Check cross-field invariants: unique names and ports, well-formed
    /// endpoints, sane load settings.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut ports = HashSet::new();
        for target in &self.targets {
            if !names.insert(target.name.as_str()) {
                return Err(BenchError::config(format!(
                    "duplicate target name '{}'",
                    target.name
                )));
            }
            if !ports.insert(target.port) {
                return Err(BenchError::config(format!(
                    "port {} is used by more than one target",
                    target.port
                )));
            }
            validate_port(target.port)?;
            if let Some(command) = &target.launch_command {
                if command.is_empty() {
                    return Err(BenchError::config(format!(
                        "target '{}' has an empty launch command",
                        target.name
                    )));
                }
            }
        }

        if self.endpoints.is_empty() {
            return Err(BenchError::config("at least one test endpoint is required"));
        }
        for endpoint in self.endpoints.iter() {
            endpoint.validate()?;
        }
        if !self.health_path.starts_with('/') {
            return Err(BenchError::config(format!(
                "health path '{}' must start with '/'",
                self.health_path
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(BenchError::config("max attempts must be at least 1"));
        }
        if !(0.0..=100.0).contains(&self.gate.max_error_rate_percent) {
            return Err(BenchError::config(
                "max error rate must be between 0 and 100 percent",
            ));
        }
        self.load.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_targets_are_valid() {
        let config = HarnessConfig::new(default_targets());
        config.validate().unwrap();
        assert_eq!(config.targets.len(), 6);
    }

    #[test]
    fn test_duplicate_port_rejected() {
        let targets = vec![
            TargetConfig::new("a", "A", 4000),
            TargetConfig::new("b", "B", 4000),
        ];
        let err = HarnessConfig::new(targets).validate().unwrap_err();
        assert!(err.to_string().contains("4000"));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let targets = vec![
            TargetConfig::new("a", "A", 4000),
            TargetConfig::new("a", "A again", 4001),
        ];
        assert!(HarnessConfig::new(targets).validate().is_err());
    }

    #[test]
    fn test_post_without_body_rejected() {
        let endpoint = TestEndpoint {
            path: "/echo".into(),
            method: HttpMethod::Post,
            body: None,
            description: String::new(),
        };
        assert!(endpoint.validate().is_err());
        assert!(TestEndpoint::post("/echo", json!({"a": 1}), "").validate().is_ok());
    }

    #[test]
    fn test_privileged_port_rejected() {
        let config = HarnessConfig::new(vec![TargetConfig::new("low", "Low", 80)]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = HarnessConfig::new(vec![]);
        config.load.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_file_parsing() {
        let raw = r#"{
            "health_path": "/health",
            "targets": [
                {
                    "name": "gin",
                    "display_label": "Gin",
                    "launch_command": ["go", "run", "main.go"],
                    "working_directory": "frameworks/gin",
                    "port": 3000
                },
                { "name": "external", "display_label": "External", "port": 3100 }
            ],
            "endpoints": [
                { "path": "/json", "method": "GET" },
                { "path": "/echo", "method": "POST", "body": { "k": [1, 2] } }
            ]
        }"#;
        let file: ConfigFile = serde_json::from_str(raw).unwrap();
        let targets = file.targets.unwrap();
        assert_eq!(targets[0].launch_command.as_ref().unwrap()[0], "go");
        assert_eq!(targets[1].launch_command, None);
        assert_eq!(targets[1].working_directory, PathBuf::from("."));
        let endpoints = file.endpoints.unwrap();
        assert_eq!(endpoints[1].method, HttpMethod::Post);
        assert_eq!(endpoints[1].body, Some(json!({ "k": [1, 2] })));
        assert_eq!(file.health_path.as_deref(), Some("/health"));
    }

    #[test]
    fn test_unknown_config_keys_rejected() {
        let raw = r#"{ "targetz": [] }"#;
        assert!(serde_json::from_str::<ConfigFile>(raw).is_err());
    }

    #[test]
    fn test_encode_body_is_exact_json() {
        let endpoint = TestEndpoint::post("/schema/validate", schema_validate_fixture(), "");
        let bytes = endpoint.encode_body().unwrap().unwrap();
        let decoded: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, schema_validate_fixture());
    }

    #[test]
    fn test_from_args_filters_targets() {
        use clap::Parser;

        let args = Args::parse_from(["framework-bench", "-t", "gin", "koa", "-d", "3s"]);
        let config = HarnessConfig::from_args(&args).unwrap();
        let names: Vec<&str> = config.targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["koa", "gin"]);
        assert_eq!(config.load.duration, Duration::from_secs(3));

        let args = Args::parse_from(["framework-bench", "-t", "actix"]);
        let err = HarnessConfig::from_args(&args).unwrap_err();
        assert!(err.to_string().contains("actix"));
    }
}
