//! Docker execution backend.
//!
//! Runs each build in a local Docker container and fetches sources with
//! `git`. A session owns a scratch directory under the system temp dir that
//! holds every cloned tree; closing the session (or dropping it) removes it.
//!
//! # Module Structure
//!
//! - `availability` - Docker daemon and tool discovery
//! - `failure` - Non-zero exit diagnosis (OOM detection)
//! - `git` - Shallow branch clones
//! - `guard` - Cleanup for containers and the session directory
//! - `runner` - docker create / cp / start invocations

mod availability;
#[cfg(all(test, unix))]
mod fake_cli;
mod failure;
mod git;
mod guard;
mod runner;

pub use availability::{DOCKER_INFO_TIMEOUT, check_docker_available};
pub use runner::{CONTAINER_NAME_PREFIX, ContainerRunner};

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{Directory, ExecutionBackend, GitRef, SourceTree};
use crate::error::{MultibuildError, Result};
use guard::{ContainerGuard, SessionGuard};

/// Execution backend backed by the local Docker daemon.
#[derive(Debug)]
pub struct DockerBackend {
    git: PathBuf,
    runner: ContainerRunner,
    session: SessionGuard,
}

impl DockerBackend {
    /// Opens a session: locates `docker` and `git`, checks the daemon, and
    /// creates the session scratch directory.
    pub async fn connect() -> Result<Self> {
        let docker = availability::locate_tool("docker")?;
        let git = availability::locate_tool("git")?;

        check_docker_available(&docker).await?;

        let scratch_dir = std::env::temp_dir().join(format!("multibuild-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&scratch_dir)
            .await
            .map_err(|e| MultibuildError::Connection {
                reason: format!(
                    "Failed to create session directory {}: {}",
                    scratch_dir.display(),
                    e
                ),
            })?;

        log::info!(
            "Connected to docker ({}), session directory {}",
            docker.display(),
            scratch_dir.display()
        );

        Ok(Self::from_parts(docker, git, scratch_dir))
    }

    /// A session using the given tools and an existing scratch directory.
    fn from_parts(docker: PathBuf, git: PathBuf, scratch_dir: PathBuf) -> Self {
        Self {
            git,
            runner: ContainerRunner::new(docker),
            session: SessionGuard::new(scratch_dir),
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        self.session.scratch_dir()
    }

    /// Creates, fills, starts and empties the container `name`. Removal is
    /// left to the caller.
    async fn run_container(
        &self,
        name: &str,
        directory: &Directory,
        destination: &Path,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let spec = directory.container();

        self.runner.create(name, spec, target).await?;
        for mount in &spec.mounts {
            self.runner.copy_in(name, mount, target).await?;
        }

        // Last point where a sibling failure can stop this build; a started
        // container runs to completion.
        ensure_active(cancel, target)?;

        let result = self.runner.start_attached(name).await.map_err(|e| {
            MultibuildError::BackendExecution {
                target: target.to_string(),
                command: spec.command_line(),
                exit_code: None,
                reason: format!("failed to start container {}: {}", name, e),
            }
        })?;

        if !result.status.success() {
            return Err(failure::diagnose_failure(
                self.runner.docker(),
                name,
                target,
                spec.command_line(),
                result.status.code(),
                &result.stderr_lines,
            )
            .await);
        }

        self.runner
            .copy_out(name, &directory.container_path(), destination)
            .await
    }
}

fn ensure_active(cancel: &CancellationToken, target: &str) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(MultibuildError::Cancelled {
            target: target.to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl ExecutionBackend for DockerBackend {
    fn name(&self) -> &str {
        "docker"
    }

    async fn fetch_tree(&self, git_ref: &GitRef) -> Result<SourceTree> {
        let destination = self
            .session
            .scratch_dir()
            .join(format!("src-{}", Uuid::new_v4()));

        git::clone_branch(&self.git, git_ref.url(), git_ref.branch(), &destination).await?;

        Ok(SourceTree::new(git_ref.url(), git_ref.branch(), destination))
    }

    async fn export(
        &self,
        directory: &Directory,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let target = directory.target_label().to_string();
        ensure_active(cancel, &target)?;

        let guard = ContainerGuard::new(
            self.runner.docker().to_path_buf(),
            ContainerRunner::container_name(),
        );
        let result = self
            .run_container(guard.name(), directory, destination, &target, cancel)
            .await;
        guard.remove().await;
        result
    }

    async fn close(&self) -> Result<()> {
        self.session.release().await.map_err(MultibuildError::from)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::fake_cli::{self, COMPILE_ERROR, FakeDocker, Installed};
    use super::*;
    use crate::backend::Client;

    const OUTPUT_DIR: &str = "build/1.21/linux/arm64/";

    struct Fixture {
        _tmp: tempfile::TempDir,
        client: Client,
        docker: Installed,
        scratch_dir: PathBuf,
        destination: PathBuf,
    }

    fn fixture(docker: FakeDocker) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let docker = docker.install(tmp.path());
        let git = fake_cli::fake_git(tmp.path());
        let scratch_dir = tmp.path().join("session");
        std::fs::create_dir_all(&scratch_dir).unwrap();
        let destination = tmp.path().join("out");
        std::fs::create_dir_all(&destination).unwrap();

        let backend = DockerBackend::from_parts(docker.path.clone(), git.path, scratch_dir.clone());
        Fixture {
            _tmp: tmp,
            client: Client::new(Arc::new(backend)),
            docker,
            scratch_dir,
            destination,
        }
    }

    fn directory(client: &Client) -> Directory {
        let tree = SourceTree::new("https://example.com/repo.git", "main", "/tmp/src-1");
        client
            .container()
            .from("golang:1.21")
            .with_mounted_directory("/src", &tree)
            .with_workdir("/src")
            .with_env_variable("GOOS", "linux")
            .with_env_variable("GOARCH", "arm64")
            .with_exec(["go", "build", "-o", OUTPUT_DIR])
            .directory(OUTPUT_DIR)
    }

    fn last_call(docker: &Installed) -> String {
        docker.calls().last().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn export_copies_artifact_and_removes_container() {
        let f = fixture(FakeDocker::default());
        let cancel = CancellationToken::new();

        directory(&f.client).export(&f.destination, &cancel).await.unwrap();

        assert!(f.destination.join("app").is_file());
        assert_eq!(f.docker.subcommands(), vec!["create", "cp", "start", "cp", "rm"]);
        assert!(last_call(&f.docker).starts_with("rm --force --volumes multibuild-"));
    }

    #[tokio::test]
    async fn non_zero_exit_is_backend_execution_error() {
        let f = fixture(FakeDocker {
            start_exit: 2,
            ..FakeDocker::default()
        });
        let cancel = CancellationToken::new();

        let err = directory(&f.client)
            .export(&f.destination, &cancel)
            .await
            .unwrap_err();

        match err {
            MultibuildError::BackendExecution {
                target,
                command,
                exit_code,
                reason,
            } => {
                assert_eq!(target, "1.21/linux/arm64");
                assert_eq!(command, "go build -o build/1.21/linux/arm64/");
                assert_eq!(exit_code, Some(2));
                assert!(reason.contains(COMPILE_ERROR));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(f.docker.subcommands().contains(&"inspect".to_string()));
        assert!(last_call(&f.docker).starts_with("rm "));
    }

    #[tokio::test]
    async fn failed_copy_out_is_export_error() {
        let f = fixture(FakeDocker {
            copy_out_fails: true,
            ..FakeDocker::default()
        });
        let cancel = CancellationToken::new();

        let err = directory(&f.client)
            .export(&f.destination, &cancel)
            .await
            .unwrap_err();

        match err {
            MultibuildError::Export { from, to, .. } => {
                assert_eq!(from, "/src/build/1.21/linux/arm64/");
                assert_eq!(to, f.destination);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(last_call(&f.docker).starts_with("rm "));
    }

    #[tokio::test]
    async fn cancelled_export_never_creates_a_container() {
        let f = fixture(FakeDocker::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = directory(&f.client)
            .export(&f.destination, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            MultibuildError::Cancelled { ref target } if target == "1.21/linux/arm64"
        ));
        assert!(f.docker.calls().is_empty());
    }

    #[tokio::test]
    async fn cancellation_during_create_skips_start() {
        let f = fixture(FakeDocker {
            create_delay: Some("0.3"),
            ..FakeDocker::default()
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = directory(&f.client)
            .export(&f.destination, &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancellation());
        assert_eq!(f.docker.subcommands(), vec!["create", "cp", "rm"]);
    }

    #[tokio::test]
    async fn fetch_tree_clones_into_session_directory() {
        let f = fixture(FakeDocker::default());

        let tree = f
            .client
            .git("https://example.com/repo.git")
            .branch("main")
            .tree()
            .await
            .unwrap();

        assert_eq!(tree.url(), "https://example.com/repo.git");
        assert_eq!(tree.branch(), "main");
        assert!(tree.location().starts_with(&f.scratch_dir));
        assert!(tree.location().is_dir());

        f.client.close().await.unwrap();
        assert!(!f.scratch_dir.exists());
    }

    #[tokio::test]
    async fn failed_clone_is_fetch_error() {
        let tmp = tempfile::tempdir().unwrap();
        let docker = FakeDocker::default().install(tmp.path());
        let git = fake_cli::failing_git(tmp.path());
        let backend = DockerBackend::from_parts(docker.path, git.path, tmp.path().join("session"));
        let client = Client::new(Arc::new(backend));

        let err = client
            .git("https://example.com/missing.git")
            .branch("main")
            .tree()
            .await
            .unwrap_err();

        match err {
            MultibuildError::Fetch { url, reason, .. } => {
                assert_eq!(url, "https://example.com/missing.git");
                assert!(reason.contains("repository not found"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
