//! Docker daemon availability checking.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use crate::error::{MultibuildError, Result};

/// Timeout for Docker info check (5 seconds)
/// Quick daemon availability check shouldn't take long
pub const DOCKER_INFO_TIMEOUT: Duration = Duration::from_secs(5);

/// Platform-specific Docker startup instructions
#[cfg(target_os = "macos")]
pub const DOCKER_START_HELP: &str = "Start Docker Desktop from Applications or Spotlight";

#[cfg(not(target_os = "macos"))]
pub const DOCKER_START_HELP: &str = "Start Docker daemon: sudo systemctl start docker";

/// Checks that the Docker daemon behind `docker` is responding.
pub async fn check_docker_available(docker: &Path) -> Result<()> {
    let status_result = timeout(
        DOCKER_INFO_TIMEOUT,
        Command::new(docker)
            .arg("info")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status(),
    )
    .await;

    match status_result {
        Err(_) => Err(MultibuildError::Connection {
            reason: format!(
                "Docker daemon check timed out after {} seconds.\n\
                 {}",
                DOCKER_INFO_TIMEOUT.as_secs(),
                DOCKER_START_HELP
            ),
        }),

        Ok(Ok(status)) if status.success() => Ok(()),

        // Docker command exists but daemon isn't responding
        Ok(Ok(status)) => Err(MultibuildError::Connection {
            reason: format!(
                "Docker daemon is not responding (exit code: {}).\n\
                 {}",
                status.code().unwrap_or(-1),
                DOCKER_START_HELP
            ),
        }),

        Ok(Err(e)) => Err(MultibuildError::Connection {
            reason: format!("Failed to run {}: {}", docker.display(), e),
        }),
    }
}

/// Locates a required command-line tool on `PATH`.
pub fn locate_tool(name: &str) -> Result<std::path::PathBuf> {
    which::which(name).map_err(|e| MultibuildError::Connection {
        reason: format!("`{}` not found on PATH: {}", name, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tool_is_connection_error() {
        let err = locate_tool("multibuild-definitely-not-a-real-tool").unwrap_err();
        assert!(matches!(err, MultibuildError::Connection { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_docker_binary_is_connection_error() {
        let err = check_docker_available(Path::new("/bin/false")).await.unwrap_err();
        assert!(err.to_string().contains("not responding"));
    }
}
