use crate::config::HarnessConfig;
use crate::metrics::{PerformanceMetrics, ValidityGate};
use crate::orchestrator::{RunReport, TargetFailure};
use crate::utils::{format_kb, format_latency_ms, format_request_rate, SystemInfo};
use anyhow::{Context, Result};
use colored::*;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

pub const JSON_REPORT_FILE: &str = "benchmark-results.json";
pub const MARKDOWN_REPORT_FILE: &str = "benchmark-report.md";

/// Run settings recorded in the report for reproducibility
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    pub test_duration_ms: u64,
    pub concurrency: usize,
    pub batch_size: usize,
    pub request_timeout_ms: u64,
    pub manual_start: bool,
    pub health_path: String,
    pub max_attempts: u32,
    pub validity_gate: ValidityGate,
    pub endpoints: Vec<String>,
}

impl RunSettings {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            test_duration_ms: config.load.duration.as_millis() as u64,
            concurrency: config.load.concurrency,
            batch_size: config.load.batch_size,
            request_timeout_ms: config.load.request_timeout.as_millis() as u64,
            manual_start: config.manual_start,
            health_path: config.health_path.clone(),
            max_attempts: config.retry.max_attempts,
            validity_gate: config.gate,
            endpoints: config
                .endpoints
                .iter()
                .map(|e| format!("{} {}", e.method, e.path))
                .collect(),
        }
    }
}

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub version: String,
    pub run_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub system_info: SystemInfo,
    pub settings: RunSettings,
}

/// Contents of `benchmark-results.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub metadata: ReportMetadata,
    /// Successful targets, fastest first.
    pub results: Vec<PerformanceMetrics>,
    pub failures: Vec<TargetFailure>,
    #[serde(default)]
    pub endpoint_latencies: Vec<(String, Vec<crate::driver::EndpointLatency>)>,
}

/// Successful results ordered by requests per second, highest first.
pub fn rank_by_throughput(metrics: &[PerformanceMetrics]) -> Vec<&PerformanceMetrics> {
    let mut ranked: Vec<&PerformanceMetrics> = metrics.iter().collect();
    ranked.sort_by(|a, b| b.requests_per_second.total_cmp(&a.requests_per_second));
    ranked
}

/// Writes the JSON and markdown reports for one run
pub struct ResultsManager {
    output_dir: PathBuf,
    run_id: String,
}

impl ResultsManager {
    /// Create a manager writing into `output_dir`, creating it if needed
    pub fn new(output_dir: &Path, run_id: impl Into<String>) -> Result<Self> {
        std::fs::create_dir_all(output_dir).with_context(|| {
            format!("Failed to create output directory {}", output_dir.display())
        })?;
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            run_id: run_id.into(),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn json_path(&self) -> PathBuf {
        self.output_dir.join(JSON_REPORT_FILE)
    }

    pub fn markdown_path(&self) -> PathBuf {
        self.output_dir.join(MARKDOWN_REPORT_FILE)
    }

    /// Assemble the structured report for `run`
    pub fn build_report(&self, run: &RunReport, config: &HarnessConfig) -> BenchmarkReport {
        BenchmarkReport {
            metadata: ReportMetadata {
                version: crate::VERSION.to_string(),
                run_id: self.run_id.clone(),
                timestamp: chrono::Utc::now(),
                system_info: SystemInfo::collect(),
                settings: RunSettings::from_config(config),
            },
            results: rank_by_throughput(&run.metrics).into_iter().cloned().collect(),
            failures: run.failures.clone(),
            endpoint_latencies: run.endpoint_latencies.clone(),
        }
    }

    /// Write both report files and return the report that was written
    pub fn finalize(&self, run: &RunReport, config: &HarnessConfig) -> Result<BenchmarkReport> {
        let report = self.build_report(run, config);

        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(self.json_path(), json)
            .with_context(|| format!("Failed to write {}", self.json_path().display()))?;

        std::fs::write(self.markdown_path(), render_markdown(&report))
            .with_context(|| format!("Failed to write {}", self.markdown_path().display()))?;

        info!(
            "Results written to {} and {}",
            self.json_path().display(),
            self.markdown_path().display()
        );
        Ok(report)
    }
}

fn memory_cell(m: &PerformanceMetrics) -> String {
    m.memory_snapshot
        .map(|s| format_kb(s.rss_kb))
        .unwrap_or_else(|| "-".to_string())
}

/// Markdown comparison table plus failure and probe sections
pub fn render_markdown(report: &BenchmarkReport) -> String {
    let meta = &report.metadata;
    let mut out = String::new();

    let _ = writeln!(out, "# Web Framework Benchmark Report\n");
    let _ = writeln!(out, "- Run: `{}`", meta.run_id);
    let _ = writeln!(out, "- Date: {}", meta.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(
        out,
        "- System: {} {} ({} cores)",
        meta.system_info.os, meta.system_info.architecture, meta.system_info.cpu_cores
    );
    let _ = writeln!(
        out,
        "- Load: {}s per target, {} workers x {} in flight{}\n",
        meta.settings.test_duration_ms as f64 / 1000.0,
        meta.settings.concurrency,
        meta.settings.batch_size,
        if meta.settings.manual_start { ", manual start" } else { "" }
    );

    let _ = writeln!(out, "## Results\n");
    if report.results.is_empty() {
        let _ = writeln!(out, "No target produced valid results.\n");
    } else {
        let _ = writeln!(
            out,
            "| Rank | Framework | Req/s | Avg (ms) | P50 (ms) | P95 (ms) | P99 (ms) | Errors (%) | Cold start (ms) | Memory |"
        );
        let _ = writeln!(
            out,
            "|-----:|-----------|------:|---------:|---------:|---------:|---------:|-----------:|----------------:|-------:|"
        );
        for (rank, m) in report.results.iter().enumerate() {
            let _ = writeln!(
                out,
                "| {} | {} | {:.0} | {:.2} | {:.2} | {:.2} | {:.2} | {:.2} | {:.0} | {} |",
                rank + 1,
                m.display_label,
                m.requests_per_second,
                m.average_latency_ms,
                m.p50_latency_ms,
                m.p95_latency_ms,
                m.p99_latency_ms,
                m.error_rate_percent,
                m.cold_start_time_ms,
                memory_cell(m)
            );
        }
        let _ = writeln!(out);
    }

    if !report.failures.is_empty() {
        let _ = writeln!(out, "## Failed targets\n");
        for f in &report.failures {
            let _ = writeln!(
                out,
                "- **{}**: {} (after {} attempt(s), while {})",
                f.target_name, f.reason, f.attempts, f.last_state
            );
        }
        let _ = writeln!(out);
    }

    if !report.endpoint_latencies.is_empty() {
        let _ = writeln!(out, "## Single-request latency\n");
        let _ = writeln!(out, "| Framework | Endpoint | Avg (ms) | Min (ms) | Max (ms) | OK |");
        let _ = writeln!(out, "|-----------|----------|---------:|---------:|---------:|---:|");
        for (target, probes) in &report.endpoint_latencies {
            for p in probes {
                let cell = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{:.2}", v));
                let _ = writeln!(
                    out,
                    "| {} | {} {} | {} | {} | {} | {}/{} |",
                    target,
                    p.method,
                    p.path,
                    cell(p.average_ms),
                    cell(p.min_ms),
                    cell(p.max_ms),
                    p.successes,
                    p.samples
                );
            }
        }
        let _ = writeln!(out);
    }

    out
}

/// Print the ranked summary to stdout
pub fn print_summary(report: &BenchmarkReport) {
    println!();
    println!("{}", "Benchmark Results".bold().underline());
    if report.results.is_empty() {
        println!("{}", "No target produced valid results".red());
    }
    for (rank, m) in report.results.iter().enumerate() {
        let label = if rank == 0 {
            m.display_label.green().bold()
        } else {
            m.display_label.normal()
        };
        println!(
            "{:>2}. {:<20} {:>16}  avg {:>10}  p95 {:>10}  p99 {:>10}  errors {:>6.2}%",
            rank + 1,
            label,
            format_request_rate(m.requests_per_second),
            format_latency_ms(m.average_latency_ms),
            format_latency_ms(m.p95_latency_ms),
            format_latency_ms(m.p99_latency_ms),
            m.error_rate_percent
        );
    }
    for f in &report.failures {
        println!(
            "    {:<20} {} {}",
            f.target_name.red(),
            "FAILED".red().bold(),
            f.reason
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetConfig;
    use crate::orchestrator::TargetState;
    use tempfile::TempDir;

    fn metrics(name: &str, rps: f64) -> PerformanceMetrics {
        PerformanceMetrics {
            target_name: name.to_string(),
            display_label: name.to_uppercase(),
            cold_start_time_ms: 120.0,
            total_requests: 1000,
            total_successful_requests: 990,
            error_requests: 10,
            requests_per_second: rps,
            average_latency_ms: 2.0,
            min_latency_ms: 0.5,
            max_latency_ms: 9.0,
            p50_latency_ms: 1.8,
            p95_latency_ms: 4.0,
            p99_latency_ms: 7.5,
            actual_test_duration_ms: 10_000.0,
            error_rate_percent: 1.0,
            memory_snapshot: None,
            timestamp: chrono::Utc::now(),
        }
    }

    fn sample_run() -> RunReport {
        RunReport {
            metrics: vec![metrics("koa", 9000.0), metrics("gin", 40000.0)],
            failures: vec![TargetFailure {
                target_name: "express".to_string(),
                attempts: 2,
                last_state: TargetState::Starting,
                reason: "readiness timeout".to_string(),
            }],
            endpoint_latencies: Vec::new(),
        }
    }

    #[test]
    fn test_rank_by_throughput() {
        let run = sample_run();
        let ranked = rank_by_throughput(&run.metrics);
        assert_eq!(ranked[0].target_name, "gin");
        assert_eq!(ranked[1].target_name, "koa");
    }

    #[test]
    fn test_finalize_writes_both_reports() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("nested");
        let manager = ResultsManager::new(&out, "run-1").unwrap();
        let config = HarnessConfig::new(vec![TargetConfig::new("gin", "Gin", 3000)]);

        let report = manager.finalize(&sample_run(), &config).unwrap();
        assert_eq!(report.metadata.run_id, "run-1");
        assert_eq!(report.results[0].target_name, "gin");

        let json = std::fs::read_to_string(manager.json_path()).unwrap();
        let parsed: BenchmarkReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.failures[0].target_name, "express");
        assert_eq!(parsed.metadata.settings.concurrency, config.load.concurrency);

        let md = std::fs::read_to_string(manager.markdown_path()).unwrap();
        let gin = md.find("| 1 | GIN |").unwrap();
        let koa = md.find("| 2 | KOA |").unwrap();
        assert!(gin < koa);
        assert!(md.contains("**express**"));
    }

    #[test]
    fn test_markdown_without_results() {
        let dir = TempDir::new().unwrap();
        let manager = ResultsManager::new(dir.path(), "empty").unwrap();
        let config = HarnessConfig::new(Vec::new());
        let report = manager.build_report(&RunReport::default(), &config);
        let md = render_markdown(&report);
        assert!(md.contains("No target produced valid results"));
        assert!(!md.contains("## Failed targets"));
    }
}
