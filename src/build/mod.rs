//! Matrix build orchestration.
//!
//! [`build_repository`] is the whole pipeline: fetch the branch once, expand
//! the matrix, and hand every target to the [`TaskCoordinator`].
//!
//! # Module Structure
//!
//! - `artifact` - Post-export artifact summaries
//! - `coordinator` - Concurrent fan-out and first-error reporting
//! - `task` - One target's container, export and span

mod artifact;
mod coordinator;
mod task;

pub use artifact::{ArtifactSummary, summarize};
pub use coordinator::{BuildReport, FailurePolicy, TaskCoordinator};
pub use task::{BuildOutcome, BuildTask, SOURCE_MOUNT_PATH};

use std::path::PathBuf;

use crate::backend::Client;
use crate::error::Result;
use crate::matrix::BuildMatrix;
use crate::telemetry::{Span, Tracer};

/// Branch built when none is given
pub const DEFAULT_BRANCH: &str = "main";

/// What to build and where to put it.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub repo_url: String,
    pub branch: String,
    pub matrix: BuildMatrix,
    /// Directory that receives `build/<version>/<os>/<arch>/`
    pub output_root: PathBuf,
    pub policy: FailurePolicy,
}

impl BuildRequest {
    /// The default matrix on [`DEFAULT_BRANCH`], written under the current
    /// directory.
    pub fn new(repo_url: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            branch: DEFAULT_BRANCH.to_string(),
            matrix: BuildMatrix::default(),
            output_root: PathBuf::from("."),
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn with_matrix(mut self, matrix: BuildMatrix) -> Self {
        self.matrix = matrix;
        self
    }

    pub fn with_output_root(mut self, output_root: impl Into<PathBuf>) -> Self {
        self.output_root = output_root.into();
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Fetches `request.repo_url` once and builds every target of the matrix.
///
/// Everything happens under one root span named `Run`; the fetch gets its
/// own child span. Returns the first build failure, if any.
pub async fn build_repository(
    client: &Client,
    request: &BuildRequest,
    tracer: &Tracer,
) -> Result<BuildReport> {
    let mut root = tracer.span("Run");
    root.set_attribute("repo.url", request.repo_url.clone());
    root.set_attribute("repo.branch", request.branch.clone());

    let result = run(client, request, tracer, &root).await;
    match &result {
        Ok(_) => root.set_ok(),
        Err(e) => root.record_error(e),
    }
    result
}

async fn run(
    client: &Client,
    request: &BuildRequest,
    tracer: &Tracer,
    root: &Span,
) -> Result<BuildReport> {
    let source = {
        let mut span = root.child("fetch");
        span.set_attribute("repo.url", request.repo_url.clone());

        log::info!("Fetching {} ({})", request.repo_url, request.branch);
        let fetched = client
            .git(request.repo_url.as_str())
            .branch(request.branch.as_str())
            .tree()
            .await;

        match &fetched {
            Ok(_) => span.set_ok(),
            Err(e) => span.record_error(e),
        }
        fetched?
    };

    let targets = request.matrix.targets();
    if targets.is_empty() {
        log::warn!("Build matrix is empty, nothing to build");
        return Ok(BuildReport::default());
    }

    log::info!(
        "Building {} target(s) with the {} backend",
        targets.len(),
        client.backend().name()
    );

    TaskCoordinator::new(client.clone(), tracer)
        .with_output_root(request.output_root.clone())
        .with_failure_policy(request.policy)
        .run_in(&root.context(), &source, targets)
        .await
}
