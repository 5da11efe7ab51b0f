//! Command line interface for multibuild.
//!
//! Parses the repository URL, sets up tracing and the Docker backend, runs
//! the matrix build and prints a per-target summary. The tracer is shut down
//! on every path once it exists.

mod args;
mod output;

pub use args::{Args, MISSING_REPO_MESSAGE, RuntimeConfig};
pub use output::{OutputManager, format_bytes};

use std::sync::Arc;

use clap::CommandFactory;

use crate::backend::Client;
use crate::backend::docker::DockerBackend;
use crate::build::{BuildReport, BuildRequest, build_repository};
use crate::error::Result;
use crate::telemetry::{TraceConfig, Tracer};

/// Main CLI entry point
pub async fn run() -> Result<i32> {
    let args = Args::parse_args();

    let config = match RuntimeConfig::try_from(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", MISSING_REPO_MESSAGE);
            eprintln!("{}", Args::command().render_usage());
            return Err(e);
        }
    };

    let tracer = init_tracer(config.trace());
    let result = execute(&config, &tracer).await;

    if let Err(e) = tracer.shutdown().await {
        log::warn!("Failed to export spans: {}", e);
    }

    if let Err(e) = &result {
        // Status line only; main prints the error itself
        let status = format!("Build of {} failed", config.repo_url());
        if let Err(write_err) = config.output().error(&status) {
            log::debug!("Failed to write status line: {}", write_err);
        }
        log::debug!("{:?}", e);
    }

    result
}

/// Tracing never fails a build: a bad exporter setup is logged and spans are
/// dropped.
fn init_tracer(config: &TraceConfig) -> Tracer {
    match Tracer::from_config(config) {
        Ok(tracer) => tracer,
        Err(e) => {
            log::warn!("Span export disabled: {}", e);
            Tracer::disabled()
        }
    }
}

async fn execute(config: &RuntimeConfig, tracer: &Tracer) -> Result<i32> {
    let output = config.output();
    let request = config.build_request();

    output.section(&format!("Building {} ({})", request.repo_url, request.branch))?;
    output.progress(&format!(
        "Matrix: {} version(s) x {} OS(es) x {} arch(es)",
        request.matrix.versions().len(),
        request.matrix.oses().len(),
        request.matrix.arches().len()
    ))?;

    output.progress("Connecting to docker")?;
    let client = Client::new(Arc::new(DockerBackend::connect().await?));

    let result = build_repository(&client, &request, tracer).await;

    if let Err(e) = client.close().await {
        log::warn!("Failed to close {} session: {}", client.backend().name(), e);
    }

    let report = result?;
    print_report(output, &request, &report)?;
    Ok(0)
}

fn print_report(
    output: &OutputManager,
    request: &BuildRequest,
    report: &BuildReport,
) -> Result<()> {
    if report.is_empty() {
        output.warn("Build matrix is empty, nothing was built")?;
        return Ok(());
    }

    output.section("Artifacts")?;
    for outcome in &report.outcomes {
        output.indent(&format!(
            "{:<24} {}",
            outcome.target.to_string(),
            outcome.artifact_dir.display()
        ))?;
        output.verbose(&format!(
            "    {} file(s), {}, sha256 {}",
            outcome.summary.files,
            format_bytes(outcome.summary.bytes),
            outcome.summary.short_checksum()
        ))?;
    }

    output.success(&format!(
        "Built {} target(s) of {} ({})",
        report.len(),
        request.repo_url,
        format_bytes(report.total_bytes())
    ))?;
    Ok(())
}
