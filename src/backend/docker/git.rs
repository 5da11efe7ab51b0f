//! Shallow git clones of a single branch.

use std::path::Path;

use tokio::process::Command;

use crate::error::{MultibuildError, Result};

/// Clones `branch` of `url` into `destination` with `git clone --depth=1`.
pub async fn clone_branch(git: &Path, url: &str, branch: &str, destination: &Path) -> Result<()> {
    let fetch_error = |reason: String| MultibuildError::Fetch {
        url: url.to_string(),
        branch: branch.to_string(),
        reason,
    };

    log::debug!("Cloning {} ({}) into {}", url, branch, destination.display());

    let output = Command::new(git)
        .args(["clone", "--depth=1", "--single-branch", "--branch", branch, "--"])
        .arg(url)
        .arg(destination)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .await
        .map_err(|e| fetch_error(format!("failed to run git: {}", e)))?;

    if !output.status.success() {
        return Err(fetch_error(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    Ok(())
}
