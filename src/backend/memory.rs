//! In-process execution backend for tests.
//!
//! Fetches succeed instantly, exports write a small fake binary into the
//! destination, and failures can be injected per environment variable. Every
//! call is recorded so tests can assert on what the orchestration asked for.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{ContainerSpec, Directory, ExecutionBackend, GitRef, SourceTree};
use crate::error::{MultibuildError, Result};

/// One recorded export.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportRecord {
    pub container: ContainerSpec,
    pub path: String,
    pub destination: PathBuf,
}

#[derive(Debug)]
struct EnvFailure {
    key: String,
    value: String,
}

/// Stub backend. See the module docs.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    fetch_failure: Option<String>,
    export_failures: Vec<EnvFailure>,
    latency: Option<Duration>,
    honor_cancellation: bool,
    fetches: Mutex<Vec<(String, String)>>,
    exports: Mutex<Vec<ExportRecord>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    cancelled: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every fetch fail with `reason`.
    pub fn fail_fetch(mut self, reason: impl Into<String>) -> Self {
        self.fetch_failure = Some(reason.into());
        self
    }

    /// Make the compile step fail for containers where `key == value`.
    pub fn fail_when_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.export_failures.push(EnvFailure {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Delay every successful export, so concurrent tasks overlap. Injected
    /// failures happen before the delay.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Check the cancellation token before and after the simulated build.
    pub fn honor_cancellation(mut self, honor: bool) -> Self {
        self.honor_cancellation = honor;
        self
    }

    /// Recorded `(url, branch)` fetches.
    pub fn fetches(&self) -> Vec<(String, String)> {
        self.fetches.lock().map(|f| f.clone()).unwrap_or_default()
    }

    /// Recorded exports that reached the simulated build.
    pub fn exports(&self) -> Vec<ExportRecord> {
        self.exports.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Highest number of exports that were running at the same time.
    pub fn max_concurrent_exports(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Exports that stopped because the token was cancelled.
    pub fn cancelled_exports(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn failure_for(&self, spec: &ContainerSpec) -> Option<&EnvFailure> {
        self.export_failures
            .iter()
            .find(|rule| spec.env_var(&rule.key) == Some(rule.value.as_str()))
    }

    fn check_cancelled(&self, directory: &Directory, cancel: &CancellationToken) -> Result<()> {
        if self.honor_cancellation && cancel.is_cancelled() {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
            return Err(MultibuildError::Cancelled {
                target: directory.target_label().to_string(),
            });
        }
        Ok(())
    }

    async fn simulate_build(
        &self,
        directory: &Directory,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.check_cancelled(directory, cancel)?;

        let spec = directory.container();
        if let Ok(mut exports) = self.exports.lock() {
            exports.push(ExportRecord {
                container: spec.clone(),
                path: directory.path().to_string(),
                destination: destination.to_path_buf(),
            });
        }

        if let Some(rule) = self.failure_for(spec) {
            return Err(MultibuildError::BackendExecution {
                target: directory.target_label().to_string(),
                command: spec.command_line(),
                exit_code: Some(1),
                reason: format!("simulated failure for {}={}", rule.key, rule.value),
            });
        }

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        self.check_cancelled(directory, cancel)?;

        let binary = spec
            .mounts
            .first()
            .map(|mount| mount.source.repo_name().to_string())
            .unwrap_or_else(|| "a.out".to_string());
        let contents = format!(
            "{} {}/{}\n",
            spec.image.as_deref().unwrap_or("scratch"),
            spec.env_var("GOOS").unwrap_or("unknown"),
            spec.env_var("GOARCH").unwrap_or("unknown"),
        );

        tokio::fs::write(destination.join(binary), contents)
            .await
            .map_err(|e| MultibuildError::Export {
                from: directory.container_path(),
                to: destination.to_path_buf(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl ExecutionBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch_tree(&self, git_ref: &GitRef) -> Result<SourceTree> {
        if let Ok(mut fetches) = self.fetches.lock() {
            fetches.push((git_ref.url().to_string(), git_ref.branch().to_string()));
        }

        if let Some(reason) = &self.fetch_failure {
            return Err(MultibuildError::Fetch {
                url: git_ref.url().to_string(),
                branch: git_ref.branch().to_string(),
                reason: reason.clone(),
            });
        }

        Ok(SourceTree::new(
            git_ref.url(),
            git_ref.branch(),
            PathBuf::from("/memory").join(git_ref.branch()),
        ))
    }

    async fn export(
        &self,
        directory: &Directory,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let result = self.simulate_build(directory, destination, cancel).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
