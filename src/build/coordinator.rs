//! Concurrent fan-out of build tasks.
//!
//! Every target gets its own tokio task. All tasks share one source tree and
//! one [`CancellationToken`]; the coordinator waits for every task, keeps
//! the first failure it observes and returns it.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::task::{BuildOutcome, BuildTask};
use crate::backend::{Client, SourceTree};
use crate::error::{MultibuildError, Result};
use crate::matrix::BuildTarget;
use crate::telemetry::{Span, SpanContext, Tracer};

/// What happens to sibling tasks after the first failure.
///
/// Either way only the first failure is reported and the coordinator waits
/// for every task before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Report the first failure and cancel siblings best-effort: the shared
    /// token is cancelled and backends stop at their next call.
    #[default]
    CancelSiblings,
    /// Report the first failure and let siblings run to completion.
    LetSiblingsFinish,
}

/// Successful builds, in matrix order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub outcomes: Vec<BuildOutcome>,
}

impl BuildReport {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.outcomes.iter().map(|o| o.summary.bytes).sum()
    }
}

/// Runs a set of build tasks concurrently.
#[derive(Debug, Clone)]
pub struct TaskCoordinator {
    client: Client,
    tracer: Tracer,
    output_root: PathBuf,
    policy: FailurePolicy,
}

impl TaskCoordinator {
    /// Artifacts go under the current directory unless
    /// [`with_output_root`](Self::with_output_root) says otherwise.
    pub fn new(client: Client, tracer: &Tracer) -> Self {
        Self {
            client,
            tracer: tracer.clone(),
            output_root: PathBuf::from("."),
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_output_root(mut self, output_root: impl Into<PathBuf>) -> Self {
        self.output_root = output_root.into();
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Builds every target under a new root span.
    pub async fn run(&self, source: &SourceTree, targets: Vec<BuildTarget>) -> Result<BuildReport> {
        self.run_in(&self.tracer.context(), source, targets).await
    }

    /// Builds every target under `parent`.
    ///
    /// Blocks until every task has finished. Returns the first error observed
    /// or, if all tasks succeeded, their outcomes in the order of `targets`.
    pub async fn run_in(
        &self,
        parent: &SpanContext,
        source: &SourceTree,
        targets: Vec<BuildTarget>,
    ) -> Result<BuildReport> {
        let mut span = parent.child("coordinate builds");
        span.set_attribute("build.targets", targets.len().to_string());
        span.set_attribute("build.failure_policy", format!("{:?}", self.policy));

        let cancel = CancellationToken::new();
        let mut join_set = JoinSet::new();
        let mut spawned: HashMap<tokio::task::Id, (usize, BuildTarget)> = HashMap::new();

        for (index, target) in targets.into_iter().enumerate() {
            let task = BuildTask::new(target.clone(), source.clone(), self.output_root.clone());
            let client = self.client.clone();
            let parent = span.context();
            let cancel = cancel.clone();

            let handle =
                join_set.spawn(async move { task.execute(&client, &parent, &cancel).await });
            spawned.insert(handle.id(), (index, target));
        }

        let mut outcomes: Vec<(usize, BuildOutcome)> = Vec::with_capacity(spawned.len());
        let mut first_error: Option<MultibuildError> = None;

        while let Some(joined) = join_set.join_next_with_id().await {
            match joined {
                Ok((id, Ok(outcome))) => {
                    let index = spawned.get(&id).map(|(index, _)| *index).unwrap_or(usize::MAX);
                    outcomes.push((index, outcome));
                }
                Ok((_, Err(error))) => {
                    self.record_failure(&mut first_error, error, &cancel, &mut span);
                }
                Err(join_error) => {
                    let target = spawned
                        .get(&join_error.id())
                        .map(|(_, target)| target.to_string())
                        .unwrap_or_else(|| "unknown target".to_string());
                    let error = MultibuildError::Internal(anyhow::anyhow!(
                        "build task for {} panicked: {}",
                        target,
                        join_error
                    ));
                    self.record_failure(&mut first_error, error, &cancel, &mut span);
                }
            }
        }

        if let Some(error) = first_error {
            return Err(error);
        }

        outcomes.sort_by_key(|(index, _)| *index);
        span.set_ok();

        Ok(BuildReport {
            outcomes: outcomes.into_iter().map(|(_, outcome)| outcome).collect(),
        })
    }

    /// Keeps the first failure; later ones are logged and dropped.
    fn record_failure(
        &self,
        first_error: &mut Option<MultibuildError>,
        error: MultibuildError,
        cancel: &CancellationToken,
        span: &mut Span,
    ) {
        if first_error.is_some() {
            if error.is_cancellation() {
                log::debug!("{}", error);
            } else {
                log::warn!("Discarding additional build failure: {}", error);
            }
            return;
        }

        log::error!("{}", error);
        span.record_error(&error);

        if self.policy == FailurePolicy::CancelSiblings {
            log::info!("Cancelling remaining builds");
            cancel.cancel();
        }

        *first_error = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::matrix::BuildMatrix;
    use opentelemetry::trace::Status;
    use std::sync::Arc;
    use std::time::Duration;

    fn source() -> SourceTree {
        SourceTree::new("https://example.com/repo.git", "main", "/memory/main")
    }

    fn two_by_two(version: &str) -> Vec<BuildTarget> {
        BuildMatrix::new([version], ["linux", "darwin"], ["amd64", "arm64"]).targets()
    }

    #[tokio::test]
    async fn all_targets_run_concurrently() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryBackend::new().with_latency(Duration::from_millis(50)));
        let coordinator = TaskCoordinator::new(Client::new(backend.clone()), &Tracer::disabled())
            .with_output_root(tmp.path());

        let targets = BuildMatrix::default().targets();
        let report = coordinator.run(&source(), targets.clone()).await.unwrap();

        assert_eq!(report.len(), 8);
        assert!(backend.max_concurrent_exports() > 1);

        let reported: Vec<_> = report.outcomes.iter().map(|o| o.target.clone()).collect();
        assert_eq!(reported, targets);
    }

    #[tokio::test]
    async fn first_failure_cancels_slow_siblings() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(
            MemoryBackend::new()
                .fail_when_env("GOARCH", "arm64")
                .with_latency(Duration::from_millis(300))
                .honor_cancellation(true),
        );
        let (tracer, exporter) = Tracer::in_memory();
        let coordinator = TaskCoordinator::new(Client::new(backend.clone()), &tracer)
            .with_output_root(tmp.path());
        assert_eq!(coordinator.failure_policy(), FailurePolicy::CancelSiblings);

        let err = coordinator.run(&source(), two_by_two("1.21")).await.unwrap_err();

        // the arm64 compile error is reported, not a sibling's cancellation
        assert!(matches!(err, MultibuildError::BackendExecution { .. }));
        assert_eq!(backend.cancelled_exports(), 2);
        assert!(!tmp.path().join("build/1.21/linux/amd64/repo").exists());
        assert!(!tmp.path().join("build/1.21/darwin/amd64/repo").exists());

        let spans = exporter.get_finished_spans().unwrap();
        let coordinate = spans.iter().find(|s| s.name == "coordinate builds").unwrap();
        assert!(matches!(coordinate.status, Status::Error { .. }));
        assert_eq!(spans.iter().filter(|s| s.name.starts_with("build ")).count(), 4);
    }

    #[tokio::test]
    async fn let_siblings_finish_policy_never_cancels() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(
            MemoryBackend::new()
                .fail_when_env("GOARCH", "arm64")
                .with_latency(Duration::from_millis(20))
                .honor_cancellation(true),
        );
        let coordinator = TaskCoordinator::new(Client::new(backend.clone()), &Tracer::disabled())
            .with_output_root(tmp.path())
            .with_failure_policy(FailurePolicy::LetSiblingsFinish);

        let err = coordinator.run(&source(), two_by_two("1.21")).await.unwrap_err();

        assert!(matches!(err, MultibuildError::BackendExecution { .. }));
        assert_eq!(backend.cancelled_exports(), 0);
        assert!(tmp.path().join("build/1.21/linux/amd64/repo").is_file());
        assert!(tmp.path().join("build/1.21/darwin/amd64/repo").is_file());
    }

    #[tokio::test]
    async fn no_targets_is_an_empty_success() {
        let client = Client::new(Arc::new(MemoryBackend::new()));
        let coordinator = TaskCoordinator::new(client, &Tracer::disabled());
        let report = coordinator.run(&source(), Vec::new()).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(report.total_bytes(), 0);
    }
}
