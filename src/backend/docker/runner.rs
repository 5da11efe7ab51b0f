//! Docker container execution and process management.
//!
//! A build runs as four docker invocations against one named container:
//!
//! 1. `docker create` with image, workdir, environment and command
//! 2. `docker cp <tree>/. <name>:<mount>` for every mounted source tree
//! 3. `docker start --attach <name>`, streaming output
//! 4. `docker cp <name>:<dir>/. <destination>` to export the artifact
//!
//! Copying the tree in (rather than bind-mounting it) gives every container
//! a private, writable copy of the shared source tree.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use uuid::Uuid;

use crate::backend::{ContainerSpec, Mount};
use crate::error::{MultibuildError, Result};

/// Prefix of every container name created by this crate
pub const CONTAINER_NAME_PREFIX: &str = "multibuild";

/// Number of trailing stderr lines kept for error reports
pub const STDERR_TAIL_LINES: usize = 40;

/// Result of container execution
#[derive(Debug)]
pub struct ContainerRunResult {
    /// Exit status of the container
    pub status: std::process::ExitStatus,
    /// Last captured stderr lines
    pub stderr_lines: Vec<String>,
}

/// Runs docker commands for one build.
#[derive(Debug, Clone)]
pub struct ContainerRunner {
    docker: PathBuf,
}

impl ContainerRunner {
    pub fn new(docker: PathBuf) -> Self {
        Self { docker }
    }

    pub fn docker(&self) -> &Path {
        &self.docker
    }

    /// Unique container name.
    pub fn container_name() -> String {
        format!("{}-{}", CONTAINER_NAME_PREFIX, Uuid::new_v4())
    }

    /// Builds `docker create` arguments for `spec`.
    ///
    /// Mounts are not part of the create call; they are copied in afterwards.
    pub fn build_create_args(name: &str, spec: &ContainerSpec) -> Option<Vec<String>> {
        let image = spec.image.as_ref()?;

        let mut args = vec![
            "create".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--label".to_string(),
            format!("{}=1", CONTAINER_NAME_PREFIX),
        ];

        if let Some(workdir) = &spec.workdir {
            args.push("--workdir".to_string());
            args.push(workdir.clone());
        }

        for (key, value) in &spec.env {
            args.push("--env".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.push(image.clone());

        if let Some(argv) = &spec.exec {
            args.extend(argv.iter().cloned());
        }

        Some(args)
    }

    /// Builds `docker cp` arguments copying a mounted tree into the container.
    pub fn build_copy_in_args(name: &str, mount: &Mount) -> Vec<String> {
        vec![
            "cp".to_string(),
            format!("{}/.", mount.source.location().display()),
            format!("{}:{}", name, mount.path),
        ]
    }

    /// Builds `docker cp` arguments copying a container directory out.
    pub fn build_copy_out_args(
        name: &str,
        container_path: &str,
        destination: &Path,
    ) -> Vec<String> {
        vec![
            "cp".to_string(),
            format!("{}:{}/.", name, container_path.trim_end_matches('/')),
            destination.display().to_string(),
        ]
    }

    /// Creates the container. Pulls the image if needed.
    pub async fn create(&self, name: &str, spec: &ContainerSpec, target: &str) -> Result<()> {
        let args = Self::build_create_args(name, spec).ok_or_else(|| {
            MultibuildError::BackendExecution {
                target: target.to_string(),
                command: "docker create".to_string(),
                exit_code: None,
                reason: "container has no base image".to_string(),
            }
        })?;

        self.run_quiet(&args).await.map_err(|reason| MultibuildError::BackendExecution {
            target: target.to_string(),
            command: "docker create".to_string(),
            exit_code: None,
            reason,
        })
    }

    /// Copies a mounted source tree into the container.
    pub async fn copy_in(&self, name: &str, mount: &Mount, target: &str) -> Result<()> {
        let args = Self::build_copy_in_args(name, mount);
        self.run_quiet(&args).await.map_err(|reason| MultibuildError::BackendExecution {
            target: target.to_string(),
            command: format!("mount {} at {}", mount.source.url(), mount.path),
            exit_code: None,
            reason,
        })
    }

    /// Copies `container_path` out of the container into `destination`.
    pub async fn copy_out(
        &self,
        name: &str,
        container_path: &str,
        destination: &Path,
    ) -> Result<()> {
        let args = Self::build_copy_out_args(name, container_path, destination);
        self.run_quiet(&args).await.map_err(|reason| MultibuildError::Export {
            from: container_path.to_string(),
            to: destination.to_path_buf(),
            reason,
        })
    }

    /// Starts the container attached and streams its output.
    ///
    /// Stdout goes to the debug log; stderr is logged and its tail is kept
    /// for error reporting.
    pub async fn start_attached(&self, name: &str) -> std::io::Result<ContainerRunResult> {
        log::debug!("{} start --attach {}", self.docker.display(), name);

        let mut child = Command::new(&self.docker)
            .args(["start", "--attach", name])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Both streams must be drained before waiting on the child
        let (_, stderr_lines) = tokio::join!(
            async {
                if let Some(stdout) = stdout {
                    let mut lines = BufReader::new(stdout).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        log::debug!("[{}] {}", name, line);
                    }
                }
            },
            async {
                let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                if let Some(stderr) = stderr {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        log::debug!("[{}] {}", name, line);
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                }
                tail
            }
        );

        let status = child.wait().await?;

        Ok(ContainerRunResult {
            status,
            stderr_lines: stderr_lines.into(),
        })
    }

    /// Runs a short docker command, returning its stderr on failure.
    async fn run_quiet(&self, args: &[String]) -> std::result::Result<(), String> {
        log::debug!("{} {}", self.docker.display(), args.join(" "));

        let output = Command::new(&self.docker)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| format!("failed to run {}: {}", self.docker.display(), e))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(if stderr.is_empty() {
                format!("exit code {}", output.status.code().unwrap_or(-1))
            } else {
                stderr
            })
        }
    }
}
