//! RAII guards for docker resources.
//!
//! Containers are removed with an async `docker rm` once an export has its
//! result. If an export is dropped before that, the guard falls back to a
//! detached thread so the blocking CLI call never runs on an async worker.
//! The session scratch directory is released the same way.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};

/// Removes a named container, at the latest when dropped.
#[derive(Debug)]
pub struct ContainerGuard {
    docker: PathBuf,
    name: String,
    armed: bool,
}

impl ContainerGuard {
    pub fn new(docker: PathBuf, name: impl Into<String>) -> Self {
        Self {
            docker,
            name: name.into(),
            armed: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the container now.
    pub async fn remove(mut self) {
        self.armed = false;

        let status = tokio::process::Command::new(&self.docker)
            .args(rm_args(&self.name))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        log_removal(&self.name, status);
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let docker = std::mem::take(&mut self.docker);
        let name = std::mem::take(&mut self.name);
        let spawned = std::thread::Builder::new()
            .name("multibuild-container-rm".to_string())
            .spawn(move || {
                let status = std::process::Command::new(&docker)
                    .args(rm_args(&name))
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status();
                log_removal(&name, status);
            });

        if let Err(e) = spawned {
            log::warn!("Failed to schedule container removal: {}", e);
        }
    }
}

fn rm_args(name: &str) -> [&str; 4] {
    ["rm", "--force", "--volumes", name]
}

fn log_removal(name: &str, status: std::io::Result<ExitStatus>) {
    match status {
        Ok(status) if status.success() => {
            log::debug!("Removed container {}", name);
        }
        // Container was never created
        Ok(_) => {}
        Err(e) => {
            log::warn!("Failed to remove container {}: {}", name, e);
        }
    }
}

/// Owns the session scratch directory.
///
/// [`release`](SessionGuard::release) removes it asynchronously; if the
/// session is dropped without being released the directory is removed in
/// `Drop`.
#[derive(Debug)]
pub struct SessionGuard {
    scratch_dir: PathBuf,
    released: AtomicBool,
}

impl SessionGuard {
    pub fn new(scratch_dir: PathBuf) -> Self {
        Self {
            scratch_dir,
            released: AtomicBool::new(false),
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Remove the scratch directory. Idempotent.
    pub async fn release(&self) -> std::io::Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        log::debug!("Removing session directory {}", self.scratch_dir.display());

        match tokio::fs::remove_dir_all(&self.scratch_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.released.load(Ordering::SeqCst) {
            return;
        }

        match std::fs::remove_dir_all(&self.scratch_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "Failed to cleanup session directory {}: {}",
                self.scratch_dir.display(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(unix)]
    use crate::backend::docker::fake_cli::FakeDocker;
    #[cfg(unix)]
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn release_removes_directory_once() {
        let tmp = tempfile::tempdir().unwrap();
        let scratch = tmp.path().join("session");
        std::fs::create_dir_all(scratch.join("src")).unwrap();

        let guard = SessionGuard::new(scratch.clone());
        guard.release().await.unwrap();
        assert!(!scratch.exists());

        // Second release and drop are no-ops
        guard.release().await.unwrap();
        drop(guard);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn remove_runs_docker_rm() {
        let tmp = tempfile::tempdir().unwrap();
        let docker = FakeDocker::default().install(tmp.path());

        let guard = ContainerGuard::new(docker.path.clone(), "multibuild-a");
        assert_eq!(guard.name(), "multibuild-a");
        guard.remove().await;

        assert_eq!(docker.calls(), vec!["rm --force --volumes multibuild-a"]);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "current_thread")]
    async fn dropped_guard_does_not_block_the_runtime() {
        let tmp = tempfile::tempdir().unwrap();
        let docker = FakeDocker {
            rm_delay: Some("1"),
            ..FakeDocker::default()
        }
        .install(tmp.path());

        let started = Instant::now();
        drop(ContainerGuard::new(docker.path.clone(), "multibuild-b"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(started.elapsed() < Duration::from_millis(500));

        // Removal still happens in the background
        let deadline = Instant::now() + Duration::from_secs(5);
        while docker.calls().is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(docker.calls(), vec!["rm --force --volumes multibuild-b"]);
    }

    #[test]
    fn drop_removes_unreleased_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let scratch = tmp.path().join("session");
        std::fs::create_dir_all(&scratch).unwrap();

        drop(SessionGuard::new(scratch.clone()));
        assert!(!scratch.exists());
    }
}
