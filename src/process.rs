//! # Target Process Manager
//!
//! Owns the OS processes that stand in for benchmark targets: launches them,
//! decides when they are ready for traffic, and tears them down again.
//!
//! ## Readiness
//!
//! Readiness is decided purely over HTTP: the health endpoint is polled at a
//! fixed interval until any status in `200..=499` comes back. Log output of
//! the target is forwarded to `debug!` but never inspected.
//!
//! ## Teardown
//!
//! On unix every target runs in its own process group. [`ProcessManager::stop`]
//! signals the whole group with `SIGTERM`, waits for the grace period, and
//! escalates to `SIGKILL`. This also covers launchers such as `bun run` or
//! `go run` that fork the real server as a grandchild.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{HarnessConfig, TargetConfig, TestEndpoint};
use crate::driver::{ConnectionMode, HttpDriver};
use crate::error::{BenchError, Result};
use crate::metrics::MemorySnapshot;

/// A launched (or externally managed) target process.
///
/// Only the [`ProcessManager`] signals or inspects the child.
#[derive(Debug)]
pub struct ProcessHandle {
    target: String,
    child: Option<Child>,
    pid: Option<u32>,
    launched_at: Instant,
    cold_start: Option<Duration>,
    cleanup_pattern: Option<String>,
}

impl ProcessHandle {
    /// Handle for a target started outside the harness (manual start mode).
    pub fn external(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            child: None,
            pid: None,
            launched_at: Instant::now(),
            cold_start: None,
            cleanup_pattern: None,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Time from launch to the first successful health check, once known.
    pub fn cold_start(&self) -> Option<Duration> {
        self.cold_start
    }

    pub fn is_managed(&self) -> bool {
        self.pid.is_some()
    }

    /// Whether the managed child is still alive. External handles always
    /// report true.
    fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => self.pid.is_none(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessManager {
    host: String,
    poll_interval: Duration,
    probe_timeout: Duration,
    stop_grace: Duration,
}

impl ProcessManager {
    pub fn new(
        host: impl Into<String>,
        poll_interval: Duration,
        probe_timeout: Duration,
        stop_grace: Duration,
    ) -> Self {
        Self {
            host: host.into(),
            poll_interval,
            probe_timeout,
            stop_grace,
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(
            config.host.clone(),
            config.health_poll_interval,
            config.health_probe_timeout,
            config.stop_grace,
        )
    }

    /// Launch the target's command in its working directory.
    ///
    /// The child gets `PORT=<port>` plus the configured environment. Output is
    /// drained in background tasks so a chatty target never blocks on a full
    /// pipe.
    pub fn start(&self, config: &TargetConfig) -> Result<ProcessHandle> {
        let command = config
            .launch_command
            .as_ref()
            .ok_or_else(|| BenchError::MissingLaunchCommand(config.name.clone()))?;
        let (program, args) = command.split_first().ok_or_else(|| {
            BenchError::config(format!("target '{}' has an empty launch command", config.name))
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&config.working_directory)
            .env("PORT", config.port.to_string())
            .envs(&config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        debug!("Launching {}: {:?}", config.name, command);
        let mut child = cmd.spawn().map_err(|source| BenchError::Launch {
            target: config.name.clone(),
            source,
        })?;
        let launched_at = Instant::now();
        let pid = child.id();

        if let Some(stdout) = child.stdout.take() {
            forward_output(config.name.clone(), "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(config.name.clone(), "stderr", stderr);
        }

        info!("Started {} (pid {:?}) on port {}", config.name, pid, config.port);
        Ok(ProcessHandle {
            target: config.name.clone(),
            child: Some(child),
            pid,
            launched_at,
            cold_start: None,
            cleanup_pattern: config.cleanup_pattern.clone(),
        })
    }

    /// Poll the health endpoint until the target answers or `timeout` elapses.
    ///
    /// Returns `false` on timeout, or as soon as a managed child is seen to have
    /// exited. On success the cold-start time is recorded in the handle.
    pub async fn wait_until_ready(
        &self,
        handle: &mut ProcessHandle,
        port: u16,
        endpoint: &TestEndpoint,
        timeout: Duration,
    ) -> bool {
        let driver = match HttpDriver::new(&self.host, port, ConnectionMode::Fresh, self.probe_timeout)
        {
            Ok(driver) => driver,
            Err(e) => {
                warn!("Could not build health-check client for {}: {}", handle.target, e);
                return false;
            }
        };

        let deadline = Instant::now() + timeout;
        let mut attempts = 0u32;
        loop {
            if !handle.is_running() {
                warn!("{} exited before becoming ready", handle.target);
                return false;
            }

            attempts += 1;
            // A health check never outlives the readiness deadline.
            let remaining = deadline.saturating_duration_since(Instant::now());
            let status = tokio::time::timeout(remaining, driver.probe_status(&endpoint.path))
                .await
                .ok()
                .flatten();
            if let Some(status) = status {
                if (200..=499).contains(&status) {
                    let cold_start = handle.launched_at.elapsed();
                    handle.cold_start = Some(cold_start);
                    info!(
                        "{} ready after {:?} ({} health checks, status {})",
                        handle.target, cold_start, attempts, status
                    );
                    return true;
                }
                debug!("{} health check returned {}", handle.target, status);
            }

            if Instant::now() >= deadline {
                warn!(
                    "{} not ready on port {} after {:?} ({} health checks)",
                    handle.target, port, timeout, attempts
                );
                return false;
            }
            sleep(
                self.poll_interval
                    .min(deadline.saturating_duration_since(Instant::now())),
            )
            .await;
        }
    }

    /// Terminate the process: graceful signal, bounded wait, forced kill.
    ///
    /// Idempotent. External handles and already-stopped handles are left alone.
    pub async fn stop(&self, handle: &mut ProcessHandle) {
        let Some(mut child) = handle.child.take() else {
            return;
        };

        if let Ok(Some(status)) = child.try_wait() {
            debug!("{} had already exited with {}", handle.target, status);
        } else {
            signal_group(handle.pid, false);
            #[cfg(not(unix))]
            if let Err(e) = child.start_kill() {
                debug!("Kill of {} reported: {}", handle.target, e);
            }
            match tokio::time::timeout(self.stop_grace, child.wait()).await {
                Ok(Ok(status)) => debug!("{} exited with {}", handle.target, status),
                Ok(Err(e)) => warn!("Waiting for {} failed: {}", handle.target, e),
                Err(_) => {
                    warn!(
                        "{} did not exit within {:?}, killing",
                        handle.target, self.stop_grace
                    );
                    signal_group(handle.pid, true);
                    if let Err(e) = child.kill().await {
                        debug!("Kill of {} reported: {}", handle.target, e);
                    }
                }
            }
        }

        // The group may still hold grandchildren once the leader is gone.
        signal_group(handle.pid, true);
        if let Some(pattern) = handle.cleanup_pattern.take() {
            reap_stray_processes(&pattern).await;
        }
        info!("Stopped {}", handle.target);
    }

    /// Resident memory of the target, where the platform exposes it.
    pub fn memory_snapshot(&self, handle: &ProcessHandle) -> Option<MemorySnapshot> {
        read_memory_snapshot(handle.pid?)
    }
}

fn forward_output<R>(target: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!("[{} {}] {}", target, stream, line);
        }
    });
}

#[cfg(unix)]
fn signal_group(pid: Option<u32>, force: bool) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return;
    };
    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    // ESRCH just means the group is already gone.
    if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
        if e != nix::errno::Errno::ESRCH {
            debug!("killpg({}, {:?}) failed: {}", pid, signal, e);
        }
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: Option<u32>, _force: bool) {}

#[cfg(unix)]
async fn reap_stray_processes(pattern: &str) {
    match Command::new("pkill")
        .arg("-KILL")
        .arg("-f")
        .arg(pattern)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        // pkill exits 1 when nothing matched.
        Ok(status) if status.success() => info!("Reaped stray processes matching '{}'", pattern),
        Ok(_) => {}
        Err(e) => debug!("pkill unavailable: {}", e),
    }
}

#[cfg(not(unix))]
async fn reap_stray_processes(_pattern: &str) {}

#[cfg(target_os = "linux")]
fn read_memory_snapshot(pid: u32) -> Option<MemorySnapshot> {
    let status = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
    parse_proc_status(&status)
}

#[cfg(not(target_os = "linux"))]
fn read_memory_snapshot(_pid: u32) -> Option<MemorySnapshot> {
    None
}

/// Extract `VmRSS` / `VmHWM` (in kB) from `/proc/<pid>/status` contents.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_proc_status(status: &str) -> Option<MemorySnapshot> {
    fn field_kb(status: &str, key: &str) -> Option<u64> {
        status
            .lines()
            .find_map(|line| line.strip_prefix(key))
            .and_then(|rest| rest.trim().trim_end_matches("kB").trim().parse().ok())
    }

    Some(MemorySnapshot {
        rss_kb: field_kb(status, "VmRSS:")?,
        peak_rss_kb: field_kb(status, "VmHWM:"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ProcessManager {
        ProcessManager::new(
            "127.0.0.1",
            Duration::from_millis(50),
            Duration::from_millis(500),
            Duration::from_secs(2),
        )
    }

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_parse_proc_status() {
        let status = "Name:\tnode\nVmHWM:\t  90112 kB\nVmRSS:\t   81920 kB\nThreads:\t11\n";
        let snapshot = parse_proc_status(status).unwrap();
        assert_eq!(snapshot.rss_kb, 81920);
        assert_eq!(snapshot.peak_rss_kb, Some(90112));
        assert!(parse_proc_status("Name:\tkthreadd\n").is_none());
    }

    #[test]
    fn test_start_without_command_is_config_error() {
        let target = TargetConfig::new("external", "External", 4100);
        let err = manager().start(&target).unwrap_err();
        assert!(matches!(err, BenchError::MissingLaunchCommand(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_start_missing_binary_is_launch_error() {
        let target = TargetConfig::new("ghost", "Ghost", 4101)
            .with_command(["definitely-not-a-real-binary-7f3a"]);
        let err = manager().start(&target).unwrap_err();
        assert!(matches!(err, BenchError::Launch { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let pm = manager();
        let target = TargetConfig::new("sleeper", "Sleeper", 4102).with_command(["sleep", "30"]);
        let mut handle = pm.start(&target).unwrap();
        assert!(handle.is_managed());

        let started = Instant::now();
        pm.stop(&mut handle).await;
        pm.stop(&mut handle).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_escalates_when_sigterm_is_ignored() {
        let pm = ProcessManager::new(
            "127.0.0.1",
            Duration::from_millis(50),
            Duration::from_millis(500),
            Duration::from_millis(300),
        );
        let target = TargetConfig::new("stubborn", "Stubborn", 4103)
            .with_command(["sh", "-c", "trap '' TERM; sleep 30"]);
        let mut handle = pm.start(&target).unwrap();
        // Give the shell a moment to install the trap.
        sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        pm.stop(&mut handle).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wait_until_ready_times_out_for_silent_target() {
        let pm = manager();
        let port = free_port();
        let target = TargetConfig::new("silent", "Silent", port).with_command(["sleep", "30"]);
        let mut handle = pm.start(&target).unwrap();

        let started = Instant::now();
        let ready = pm
            .wait_until_ready(
                &mut handle,
                port,
                &TestEndpoint::get("/health", ""),
                Duration::from_millis(600),
            )
            .await;
        assert!(!ready);
        assert!(handle.cold_start().is_none());
        assert!(started.elapsed() >= Duration::from_millis(600));

        pm.stop(&mut handle).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wait_until_ready_detects_crashed_process() {
        let pm = manager();
        let port = free_port();
        let target = TargetConfig::new("crasher", "Crasher", port).with_command(["sh", "-c", "exit 3"]);
        let mut handle = pm.start(&target).unwrap();

        let started = Instant::now();
        let ready = pm
            .wait_until_ready(
                &mut handle,
                port,
                &TestEndpoint::get("/health", ""),
                Duration::from_secs(10),
            )
            .await;
        assert!(!ready);
        assert!(started.elapsed() < Duration::from_secs(5));
        pm.stop(&mut handle).await;
    }

    #[tokio::test]
    async fn test_wait_until_ready_honours_deadline_with_silent_listener() {
        // Accepted by the kernel backlog, never answered.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let pm = ProcessManager::new(
            "127.0.0.1",
            Duration::from_millis(50),
            Duration::from_secs(5),
            Duration::from_secs(2),
        );
        let mut handle = ProcessHandle::external("hanging");

        let started = Instant::now();
        let ready = pm
            .wait_until_ready(
                &mut handle,
                port,
                &TestEndpoint::get("/health", ""),
                Duration::from_millis(300),
            )
            .await;
        assert!(!ready);
        assert!(started.elapsed() < Duration::from_secs(2));
        drop(listener);
    }

    #[tokio::test]
    async fn test_external_handle_stop_is_noop() {
        let pm = manager();
        let mut handle = ProcessHandle::external("manual");
        assert!(!handle.is_managed());
        assert!(pm.memory_snapshot(&handle).is_none());
        pm.stop(&mut handle).await;
        pm.stop(&mut handle).await;
    }
}
