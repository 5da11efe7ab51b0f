//! A single matrix build.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use super::artifact::{self, ArtifactSummary};
use crate::backend::{Client, Container, SourceTree};
use crate::error::{MultibuildError, Result};
use crate::matrix::BuildTarget;
use crate::telemetry::SpanContext;

/// Path the source tree is mounted at inside every build container
pub const SOURCE_MOUNT_PATH: &str = "/src";

/// A successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub target: BuildTarget,
    /// Local directory the artifact was exported to
    pub artifact_dir: PathBuf,
    pub summary: ArtifactSummary,
}

/// Builds one target from a shared source tree.
#[derive(Debug, Clone)]
pub struct BuildTask {
    target: BuildTarget,
    source: SourceTree,
    output_root: PathBuf,
}

impl BuildTask {
    pub fn new(target: BuildTarget, source: SourceTree, output_root: impl Into<PathBuf>) -> Self {
        Self {
            target,
            source,
            output_root: output_root.into(),
        }
    }

    pub fn target(&self) -> &BuildTarget {
        &self.target
    }

    /// `<output_root>/build/<version>/<os>/<arch>`
    pub fn local_artifact_dir(&self) -> PathBuf {
        self.output_root.join(self.target.artifact_path())
    }

    /// The container that compiles this target: toolchain image, source
    /// mounted at [`SOURCE_MOUNT_PATH`], target selected through the
    /// environment.
    pub fn environment(&self, client: &Client) -> Container {
        let mut container = client
            .container()
            .from(self.target.image_tag())
            .with_mounted_directory(SOURCE_MOUNT_PATH, &self.source)
            .with_workdir(SOURCE_MOUNT_PATH);

        for (key, value) in self.target.env_bindings() {
            container = container.with_env_variable(key, value);
        }

        container.with_exec(self.target.build_command())
    }

    /// Runs the build and exports its artifact.
    ///
    /// The task's span is opened before any backend call and ends when this
    /// returns, on success and failure alike.
    pub async fn execute(
        self,
        client: &Client,
        parent: &SpanContext,
        cancel: &CancellationToken,
    ) -> Result<BuildOutcome> {
        let mut span = parent.child(format!("build {}", self.target));
        span.set_attribute("build.toolchain_version", self.target.toolchain_version.clone());
        span.set_attribute("build.os", self.target.os.clone());
        span.set_attribute("build.arch", self.target.arch.clone());

        let result = self.run(client, cancel).await;

        match &result {
            Ok(outcome) => {
                span.set_attribute("artifact.files", outcome.summary.files.to_string());
                span.set_attribute("artifact.sha256", outcome.summary.sha256.clone());
                span.set_ok();
            }
            Err(e) => span.record_error(e),
        }

        result
    }

    async fn run(self, client: &Client, cancel: &CancellationToken) -> Result<BuildOutcome> {
        let artifact_dir = self.local_artifact_dir();
        log::info!("Building {} into {}", self.target, artifact_dir.display());

        create_output_dir(&artifact_dir).await?;

        self.environment(client)
            .directory(self.target.artifact_dir_arg())
            .export(&artifact_dir, cancel)
            .await?;

        let summary = artifact::summarize(&artifact_dir).await?;
        if summary.is_empty() {
            return Err(MultibuildError::Export {
                from: format!("{}/{}", SOURCE_MOUNT_PATH, self.target.artifact_dir_arg()),
                to: artifact_dir,
                reason: "build produced no artifacts".to_string(),
            });
        }

        log::info!(
            "Built {}: {} file(s), {} bytes, sha256 {}",
            self.target,
            summary.files,
            summary.bytes,
            summary.short_checksum()
        );

        Ok(BuildOutcome {
            target: self.target,
            artifact_dir,
            summary,
        })
    }
}

async fn create_output_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| MultibuildError::Filesystem {
            path: path.to_path_buf(),
            source,
        })
}
