//! Artifact summaries.
//!
//! After export, each artifact directory is walked once to count its files
//! and compute a SHA-256 over the tree, so reruns can be compared.

use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{MultibuildError, Result};

/// What an export left on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSummary {
    /// Regular files under the artifact directory
    pub files: usize,
    /// Total size of those files
    pub bytes: u64,
    /// Hex SHA-256 over relative paths and contents, in path order
    pub sha256: String,
}

impl ArtifactSummary {
    pub fn is_empty(&self) -> bool {
        self.files == 0
    }

    /// First 12 hex digits of the checksum.
    pub fn short_checksum(&self) -> &str {
        &self.sha256[..self.sha256.len().min(12)]
    }
}

/// Summarizes the directory tree at `dir`.
///
/// Hashing happens on the blocking pool.
pub async fn summarize(dir: &Path) -> Result<ArtifactSummary> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || summarize_blocking(&dir))
        .await
        .map_err(|e| anyhow::anyhow!("artifact summary task panicked: {}", e))?
}

fn summarize_blocking(dir: &Path) -> Result<ArtifactSummary> {
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in walkdir::WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| summary_error(dir, e.to_string()))?;
        if entry.file_type().is_file() {
            paths.push(entry.into_path());
        }
    }
    paths.sort();

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];
    let mut bytes = 0u64;

    // Every path and body is length-prefixed so entry boundaries are part
    // of the digest
    for path in &paths {
        let rel_path = path.strip_prefix(dir).unwrap_or(path).to_string_lossy();
        hasher.update((rel_path.len() as u64).to_le_bytes());
        hasher.update(rel_path.as_bytes());

        let mut file =
            std::fs::File::open(path).map_err(|e| summary_error(path, e.to_string()))?;
        let len = file
            .metadata()
            .map_err(|e| summary_error(path, e.to_string()))?
            .len();
        hasher.update(len.to_le_bytes());

        loop {
            let n = file
                .read(&mut buffer)
                .map_err(|e| summary_error(path, e.to_string()))?;
            if n == 0 {
                break;
            }
            bytes += n as u64;
            hasher.update(&buffer[..n]);
        }
    }

    Ok(ArtifactSummary {
        files: paths.len(),
        bytes,
        sha256: format!("{:x}", hasher.finalize()),
    })
}

fn summary_error(path: &Path, reason: String) -> MultibuildError {
    MultibuildError::Export {
        from: path.display().to_string(),
        to: path.to_path_buf(),
        reason: format!("cannot read exported artifact: {}", reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let summary = summarize(tmp.path()).await.unwrap();
        assert!(summary.is_empty());
        assert_eq!(summary.bytes, 0);
    }

    #[tokio::test]
    async fn checksum_depends_on_names_and_contents() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        std::fs::write(a.path().join("app"), b"binary").unwrap();
        std::fs::write(b.path().join("app"), b"binary").unwrap();

        let first = summarize(a.path()).await.unwrap();
        assert_eq!(first, summarize(b.path()).await.unwrap());
        assert_eq!(first.files, 1);
        assert_eq!(first.bytes, 6);
        assert_eq!(first.short_checksum().len(), 12);

        std::fs::rename(b.path().join("app"), b.path().join("other")).unwrap();
        assert_ne!(first.sha256, summarize(b.path()).await.unwrap().sha256);
    }

    #[tokio::test]
    async fn moving_bytes_between_name_and_body_changes_checksum() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        std::fs::write(a.path().join("a"), b"bc").unwrap();
        std::fs::write(b.path().join("ab"), b"c").unwrap();

        let first = summarize(a.path()).await.unwrap();
        let second = summarize(b.path()).await.unwrap();
        assert_ne!(first.sha256, second.sha256);
    }

    #[tokio::test]
    async fn moving_bytes_between_files_changes_checksum() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        std::fs::write(a.path().join("x"), b"12").unwrap();
        std::fs::write(a.path().join("y"), b"3").unwrap();
        std::fs::write(b.path().join("x"), b"1").unwrap();
        std::fs::write(b.path().join("y"), b"23").unwrap();

        let first = summarize(a.path()).await.unwrap();
        let second = summarize(b.path()).await.unwrap();
        assert_eq!(first.bytes, second.bytes);
        assert_ne!(first.sha256, second.sha256);
    }

    #[tokio::test]
    async fn nested_files_are_counted() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("nested")).unwrap();
        std::fs::write(tmp.path().join("nested/lib.a"), b"abc").unwrap();
        std::fs::write(tmp.path().join("app"), b"de").unwrap();

        let summary = summarize(tmp.path()).await.unwrap();
        assert_eq!(summary.files, 2);
        assert_eq!(summary.bytes, 5);
    }
}
