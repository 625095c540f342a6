use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Framework Bench - comparative load testing of HTTP web frameworks
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// JSON file describing targets and endpoints (defaults to the built-in sets)
    #[clap(short = 'c', long, help_heading = "Core Options")]
    pub config: Option<PathBuf>,

    /// Only benchmark these targets (space-separated names)
    #[clap(short = 't', long, num_args = 1.., help_heading = "Core Options")]
    pub targets: Vec<String>,

    /// Load window per target (e.g. "10s", "500ms", "2m")
    #[clap(short = 'd', long, value_parser = parse_duration, default_value = "10s", help_heading = "Core Options")]
    pub duration: Duration,

    /// Targets are already running; skip process start/stop
    #[clap(long, default_value_t = false, help_heading = "Core Options")]
    pub manual_start: bool,

    /// Directory for the JSON and markdown reports
    #[clap(short = 'o', long, default_value = crate::defaults::OUTPUT_DIR, help_heading = "Core Options")]
    pub output_dir: PathBuf,

    /// Print the configured targets and exit
    #[clap(long, default_value_t = false)]
    pub list_targets: bool,

    /// Number of concurrent load workers
    #[clap(long, default_value_t = crate::defaults::CONCURRENCY, help_heading = "Load")]
    pub concurrency: usize,

    /// Requests each worker keeps in flight per batch
    #[clap(long, default_value_t = crate::defaults::BATCH_SIZE, help_heading = "Load")]
    pub batch_size: usize,

    /// Per-request timeout during load generation
    #[clap(long, value_parser = parse_duration, default_value = "5s", help_heading = "Load")]
    pub request_timeout: Duration,

    /// Sequential fresh-connection latency samples per endpoint (0 disables)
    #[clap(long, default_value_t = 0, help_heading = "Load")]
    pub probe_samples: usize,

    /// Host the targets listen on
    #[clap(long, default_value = crate::defaults::HOST, help_heading = "Load")]
    pub host: String,

    /// Attempts per target before it is dropped from the report
    #[clap(long, default_value_t = crate::defaults::MAX_ATTEMPTS, help_heading = "Lifecycle")]
    pub max_attempts: u32,

    /// Base backoff between attempts (multiplied by the attempt number)
    #[clap(long, value_parser = parse_duration, default_value = "2s", help_heading = "Lifecycle")]
    pub retry_delay: Duration,

    /// Pause between targets so ports and file descriptors settle
    #[clap(long, value_parser = parse_duration, default_value = "3s", help_heading = "Lifecycle")]
    pub cooldown: Duration,

    /// How long a target may take to answer its health check
    #[clap(long, value_parser = parse_duration, default_value = "20s", help_heading = "Lifecycle")]
    pub startup_timeout: Duration,

    /// Discard results with this many requests or fewer
    #[clap(long, default_value_t = crate::defaults::MIN_TOTAL_REQUESTS, help_heading = "Validity")]
    pub min_requests: u64,

    /// Discard results whose error rate reaches this percentage
    #[clap(long, default_value_t = crate::defaults::MAX_ERROR_RATE_PERCENT, help_heading = "Validity")]
    pub max_error_rate: f64,

    /// Increase log verbosity (-v debug, -vv trace)
    #[clap(short = 'v', long, action = clap::ArgAction::Count, help_heading = "Logging")]
    pub verbose: u8,

    /// Only log warnings and errors
    #[clap(short = 'q', long, default_value_t = false, help_heading = "Logging")]
    pub quiet: bool,

    /// Also write plain-text logs to this file
    #[clap(long, help_heading = "Logging")]
    pub log_file: Option<PathBuf>,

    /// Run the built-in reference target on this port instead of benchmarking
    #[clap(long, hide = true)]
    pub internal_reference_target: Option<u16>,
}

impl Args {
    /// Default log filter for the chosen verbosity.
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Parse duration from string (e.g., "10s", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if !num.is_finite() || num < 0.0 {
        return Err(format!("Duration must be a non-negative number: {}", s));
    }

    let secs = match unit {
        "ms" => num / 1000.0,
        "s" => num,
        "m" => num * 60.0,
        "h" => num * 3600.0,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };
    let duration = Duration::try_from_secs_f64(secs)
        .map_err(|e| format!("Duration out of range: {} ({})", s, e))?;

    Ok(duration)
}
