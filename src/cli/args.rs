//! Command line argument parsing and validation.

use std::path::PathBuf;

use clap::Parser;

use crate::build::{BuildRequest, FailurePolicy};
use crate::error::{CliError, MultibuildError};
use crate::matrix::BuildMatrix;
use crate::telemetry::TraceConfig;

/// Message printed when no repository is given
pub const MISSING_REPO_MESSAGE: &str = "must pass in a git repo to build";

/// Cross-compile a Go repository for every toolchain, OS and architecture
#[derive(Parser, Debug)]
#[command(
    name = "multibuild",
    version,
    about = "Cross-compile a Go repository for a matrix of toolchains and platforms",
    long_about = "Fetches the main branch of a git repository once and compiles it in a \
container for every toolchain version, operating system and architecture of a fixed matrix.

Artifacts are written to build/<version>/<os>/<arch>/ under the current directory.

Spans are exported over OTLP/HTTP when OTEL_EXPORTER_OTLP_ENDPOINT or
OTEL_EXPORTER_OTLP_TRACES_ENDPOINT is set."
)]
pub struct Args {
    /// Git repository to build
    #[arg(value_name = "REPO_URL")]
    pub repo_url: Option<String>,

    /// Print per-artifact details
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only print errors
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The repository URL, or a usage error if it is missing or blank.
    pub fn validate(&self) -> Result<&str, CliError> {
        match self.repo_url.as_deref().map(str::trim) {
            None => Err(CliError::MissingArgument {
                argument: "REPO_URL".to_string(),
            }),
            Some("") => Err(CliError::InvalidArguments {
                reason: "REPO_URL cannot be empty".to_string(),
            }),
            Some(url) => Ok(url),
        }
    }
}

/// Configuration derived from command line arguments and the environment
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    output: super::OutputManager,
    repo_url: String,
    trace: TraceConfig,
    output_root: PathBuf,
}

impl TryFrom<&Args> for RuntimeConfig {
    type Error = MultibuildError;

    fn try_from(args: &Args) -> Result<Self, Self::Error> {
        let repo_url = args.validate()?.to_string();

        Ok(Self {
            output: super::OutputManager::new(args.verbose, args.quiet),
            repo_url,
            trace: TraceConfig::from_env(),
            output_root: PathBuf::from("."),
        })
    }
}

impl RuntimeConfig {
    /// Get a reference to the output manager
    pub fn output(&self) -> &super::OutputManager {
        &self.output
    }

    pub fn repo_url(&self) -> &str {
        &self.repo_url
    }

    pub fn trace(&self) -> &TraceConfig {
        &self.trace
    }

    /// The build this configuration asks for: the fixed matrix on the
    /// default branch, cancelling siblings on the first failure.
    pub fn build_request(&self) -> BuildRequest {
        BuildRequest::new(self.repo_url.clone())
            .with_matrix(BuildMatrix::default())
            .with_output_root(self.output_root.clone())
            .with_failure_policy(FailurePolicy::CancelSiblings)
    }
}
