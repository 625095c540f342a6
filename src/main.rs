//! # Framework Bench - Main Entry Point
//!
//! 1. **Initialize logging**: colorized console output, optional log file
//! 2. **Parse arguments**: clap-derived CLI
//! 3. **Build the harness config**: built-in or file-supplied targets
//! 4. **Run the orchestrator**: every target in turn, failures isolated
//! 5. **Write results**: JSON report, markdown table, console summary
//!
//! The hidden `--internal-reference-target <port>` flag turns the binary into
//! the built-in reference server instead, so the harness can launch a real
//! target process without external toolchains.

use anyhow::{Context, Result};
use clap::Parser;
use framework_bench::{
    cli::Args,
    config::HarnessConfig,
    logging,
    orchestrator::Orchestrator,
    reference,
    results::{print_summary, ResultsManager},
    utils::generate_run_id,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = logging::init(args.log_level(), args.log_file.as_deref())?;

    if let Some(port) = args.internal_reference_target {
        return reference::serve(port).await;
    }

    let config = HarnessConfig::from_args(&args).context("Invalid configuration")?;

    if args.list_targets {
        list_targets(&config);
        return Ok(());
    }

    let run_id = generate_run_id();
    info!("Starting Framework Bench v{} (run {})", framework_bench::VERSION, run_id);
    info!(
        "{} targets, {} endpoints, {:?} per target, {} workers",
        config.targets.len(),
        config.endpoints.len(),
        config.load.duration,
        config.load.concurrency
    );
    if config.targets.is_empty() {
        warn!("No targets selected; nothing to do");
        return Ok(());
    }

    let results_manager = ResultsManager::new(&args.output_dir, run_id)?;
    let orchestrator = Orchestrator::new(config);
    let run = orchestrator.run().await;

    let report = results_manager.finalize(&run, orchestrator.config())?;
    print_summary(&report);

    if run.metrics.is_empty() {
        anyhow::bail!("No target produced valid results");
    }
    Ok(())
}

fn list_targets(config: &HarnessConfig) {
    for target in &config.targets {
        let command = target
            .launch_command
            .as_ref()
            .map(|c| c.join(" "))
            .unwrap_or_else(|| "(externally managed)".to_string());
        println!(
            "{:<12} {:<24} port {:<6} {} [{}]",
            target.name,
            target.display_label,
            target.port,
            command,
            target.working_directory.display()
        );
    }
}
