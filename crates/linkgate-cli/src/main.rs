//! linkgate - documentation link check job runner
//!
//! ## Commands
//!
//! - `check`: show whether an event would start the job
//! - `run`: run one job and exit with its outcome's exit code
//! - `dispatch`: feed a stream of events through the concurrency controller
//! - `install-verifier`: fetch the pinned link checker
//! - `config`: print the effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};

use linkgate_ci::{
    CancelSource, CancelToken, ConcurrencyController, DockerCli, JobPipeline, JobRecord, JobReport, JobRequest,
    Submission, VerifierInstaller,
};
use linkgate_core::{ConcurrencyKey, JobConfig, TriggerEvent, TriggerGate};

#[derive(Parser)]
#[command(name = "linkgate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Trigger-gated link check for a containerized documentation server", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Job configuration file (TOML)
    #[arg(short, long, global = true, env = "LINKGATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the trigger decision and concurrency key for an event
    Check {
        /// Event file (JSON)
        #[arg(short, long)]
        event: PathBuf,
    },

    /// Run the job for a single event
    Run {
        /// Event file (JSON)
        #[arg(short, long)]
        event: PathBuf,

        /// Write the job report as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Submit newline-delimited JSON events through the concurrency controller
    Dispatch {
        /// Events file, or `-` for stdin
        #[arg(short, long, default_value = "-")]
        events: String,

        /// Delay between submissions in milliseconds
        #[arg(long, default_value = "0")]
        interval_ms: u64,

        /// Write every job record as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Download and unpack the pinned link checker
    InstallVerifier,

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    linkgate_core::init_tracing(cli.json, level);

    let config = JobConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Check { event } => cmd_check(&config, &event),
        Commands::Run { event, report } => {
            let code = cmd_run(config, &event, report.as_deref()).await?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Commands::Dispatch {
            events,
            interval_ms,
            report,
        } => cmd_dispatch(config, &events, interval_ms, report.as_deref()).await,
        Commands::InstallVerifier => cmd_install_verifier(&config).await,
        Commands::Config => cmd_config(&config),
    }
}

fn production_pipeline(config: &JobConfig) -> JobPipeline {
    JobPipeline::new(
        Arc::new(DockerCli),
        Arc::new(VerifierInstaller::new(config.verifier.clone())),
    )
}

fn read_event(path: &Path) -> Result<TriggerEvent> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read event file {}", path.display()))?;
    let event = TriggerEvent::from_json(&raw)
        .with_context(|| format!("Invalid event in {}", path.display()))?;
    Ok(event)
}

/// Parse newline-delimited events, ignoring blank lines.
fn parse_event_lines(raw: &str) -> Result<Vec<TriggerEvent>> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            TriggerEvent::from_json(line).with_context(|| format!("Invalid event on line {}", idx + 1))
        })
        .collect()
}

fn read_event_stream(source: &str) -> Result<Vec<TriggerEvent>> {
    let raw = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read events from stdin")?;
        buf
    } else {
        std::fs::read_to_string(source)
            .with_context(|| format!("Failed to read events file {source}"))?
    };
    parse_event_lines(&raw)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "report written");
    Ok(())
}

fn cmd_check(config: &JobConfig, event_path: &Path) -> Result<()> {
    let event = read_event(event_path)?;
    let gate = TriggerGate::new(config.triggers.clone());
    let decision = gate.decide(&event);
    let key = ConcurrencyKey::for_event(&config.workflow, &event);

    println!("Event: {} ({})", event.kind(), event.git_ref());
    println!("Concurrency key: {key}");
    println!(
        "Decision: {} - {}",
        if decision.run { "✓ RUN" } else { "○ SKIP" },
        decision.reason
    );
    Ok(())
}

fn print_report(report: &JobReport) {
    println!("Job ID: {}", report.job_id);
    println!("Key: {}", report.key);
    println!(
        "Status: {}",
        if report.passed() {
            "✓ PASSED"
        } else {
            "✗ FAILED"
        }
    );
    println!("Outcome: {}", report.outcome);
    println!("Duration: {}ms", report.duration_ms);

    for step in &report.steps {
        let status = if step.ok { "✓" } else { "✗" };
        println!(
            "  {} {} ({}ms): {}",
            status, step.step, step.duration_ms, step.detail
        );
    }
}

/// Token cancelled on Ctrl-C. Abort the returned task once it is no longer needed.
fn interrupt_token() -> (CancelToken, tokio::task::JoinHandle<()>) {
    let source = CancelSource::new();
    let token = source.token();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            source.cancel();
        }
    });
    (token, watcher)
}

async fn cmd_run(config: JobConfig, event_path: &Path, report_path: Option<&Path>) -> Result<i32> {
    let event = read_event(event_path)?;
    let pipeline = production_pipeline(&config);
    let request = JobRequest::new(event, Arc::new(config));

    // A cancelled job still tears its container down.
    let (interrupted, watcher) = interrupt_token();
    let report = pipeline.run(&request, &interrupted).await;
    watcher.abort();

    println!();
    print_report(&report);
    if let Some(path) = report_path {
        write_json(path, &report)?;
    }

    let code = report.outcome.exit_code();
    if code == 0 {
        println!("\n✓ Link check passed");
    } else {
        println!("\n✗ Link check failed (exit code {code})");
    }
    Ok(code)
}

/// Authoritative records that did not pass.
fn failed_records(records: &[JobRecord]) -> Vec<&JobRecord> {
    records
        .iter()
        .filter(|r| !r.superseded && !r.report.passed())
        .collect()
}

async fn cmd_dispatch(
    config: JobConfig,
    source: &str,
    interval_ms: u64,
    report_path: Option<&Path>,
) -> Result<()> {
    let events = read_event_stream(source)?;
    info!(count = events.len(), "dispatching events");

    let controller = ConcurrencyController::new(production_pipeline(&config), config);
    let (interrupted, watcher) = interrupt_token();
    for (idx, event) in events.into_iter().enumerate() {
        if idx > 0 && interval_ms > 0 {
            tokio::select! {
                _ = interrupted.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
            }
        }
        if interrupted.is_cancelled() {
            println!("○ interrupted, remaining events not submitted");
            break;
        }
        match controller.submit(event).await {
            Submission::Skipped { reason } => println!("○ event {} skipped: {reason}", idx + 1),
            Submission::Started {
                job_id,
                key,
                superseded,
            } => {
                println!("▶ event {} started job {job_id} on {key}", idx + 1);
                if let Some(prior) = superseded {
                    println!("  superseded job {prior}");
                }
            }
        }
    }

    let records = collect_records(&controller, &interrupted).await;
    watcher.abort();
    for record in &records {
        println!();
        if record.superseded {
            println!("(superseded, not authoritative)");
        }
        print_report(&record.report);
    }
    if let Some(path) = report_path {
        let reports: Vec<&JobReport> = records.iter().map(|r| &r.report).collect();
        write_json(path, &reports)?;
    }

    let failed = failed_records(&records);
    println!();
    println!(
        "Summary: {} job(s), {} superseded, {} failed",
        records.len(),
        records.iter().filter(|r| r.superseded).count(),
        failed.len()
    );
    if failed.is_empty() {
        println!("\n✓ All authoritative jobs passed!");
        Ok(())
    } else {
        anyhow::bail!("{} link check job(s) failed", failed.len())
    }
}

/// Drain the controller, cancelling every live job once `interrupted` fires.
async fn collect_records(
    controller: &ConcurrencyController,
    interrupted: &CancelToken,
) -> Vec<JobRecord> {
    tokio::select! {
        records = controller.drain() => records,
        _ = interrupted.cancelled() => {
            controller.cancel_all().await;
            controller.drain().await
        }
    }
}

async fn cmd_install_verifier(config: &JobConfig) -> Result<()> {
    let installer = VerifierInstaller::new(config.verifier.clone());
    println!("Release: {}", installer.release_url());
    let binary = installer
        .install()
        .await
        .context("Failed to install verifier")?;
    println!("✓ Verifier installed at {}", binary.display());
    Ok(())
}

fn cmd_config(config: &JobConfig) -> Result<()> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}
