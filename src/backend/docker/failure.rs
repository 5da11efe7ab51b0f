//! Container failure diagnosis.
//!
//! Turns a non-zero container exit into a `BackendExecution` error, flagging
//! out-of-memory kills so they are not mistaken for compile errors.

use std::path::Path;

use tokio::process::Command;

use crate::error::MultibuildError;

/// Exit code of a process killed with SIGKILL
const SIGKILL_EXIT_CODE: i32 = 137;

/// Check if container was killed by OOM via Docker inspect API.
pub async fn check_container_oom_status(docker: &Path, container_name: &str) -> bool {
    let output = Command::new(docker)
        .args(["inspect", container_name, "--format", "{{.State.OOMKilled}}"])
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).trim().eq_ignore_ascii_case("true")
        }
        _ => false,
    }
}

/// Whether captured stderr mentions memory exhaustion.
pub fn stderr_indicates_oom(stderr_lines: &[String]) -> bool {
    stderr_lines.iter().any(|line| {
        let line = line.to_lowercase();
        line.contains("out of memory")
            || line.contains("oomkilled")
            || line.contains("cannot allocate memory")
    })
}

/// Builds the error for a container that exited with `exit_code`.
pub async fn diagnose_failure(
    docker: &Path,
    container_name: &str,
    target: &str,
    command: String,
    exit_code: Option<i32>,
    stderr_lines: &[String],
) -> MultibuildError {
    let oom = check_container_oom_status(docker, container_name).await
        || stderr_indicates_oom(stderr_lines);

    let mut reason = match exit_code {
        _ if oom => "container ran out of memory".to_string(),
        Some(SIGKILL_EXIT_CODE) => "container was killed (SIGKILL)".to_string(),
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    };

    if stderr_lines.is_empty() {
        reason.push_str(" (no error output captured)");
    } else {
        reason.push_str("\n\nstderr:\n");
        reason.push_str(&stderr_lines.join("\n"));
    }

    MultibuildError::BackendExecution {
        target: target.to_string(),
        command,
        exit_code,
        reason,
    }
}
