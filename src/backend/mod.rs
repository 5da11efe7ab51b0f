//! Execution backend port and fluent client.
//!
//! The [`ExecutionBackend`] trait is the narrow seam between the build
//! orchestration and whatever actually runs containers. Everything above it
//! works with the value types in this module:
//!
//! ```text
//! client.git(url).branch("main").tree()         -> SourceTree
//! client.container().from("golang:1.21")
//!     .with_mounted_directory("/src", &tree)
//!     .with_workdir("/src")
//!     .with_env_variable("GOOS", "linux")
//!     .with_exec(["go", "build", "-o", "build/"])
//!     .directory("build/")
//!     .export(local_dir, &cancel)                -> artifact on disk
//! ```
//!
//! Container values are immutable descriptions. Nothing runs until a
//! [`Directory`] is exported, so each build task owns its own environment and
//! never observes another task's changes.
//!
//! # Adapters
//!
//! - [`docker::DockerBackend`] drives the local `docker` and `git` CLIs
//! - [`memory::MemoryBackend`] is an in-process stub for tests

pub mod docker;
pub mod memory;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::matrix::ARTIFACT_ROOT;

/// Operations a build-execution service must provide.
///
/// Connecting is adapter specific (see [`docker::DockerBackend::connect`]);
/// [`close`](ExecutionBackend::close) releases whatever the session holds.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Short adapter name for logs.
    fn name(&self) -> &str;

    /// Fetch the tree of a git branch.
    async fn fetch_tree(&self, git_ref: &GitRef) -> Result<SourceTree>;

    /// Run the container that produces `directory` and copy the directory's
    /// contents into `destination`, which already exists.
    ///
    /// Implementations should check `cancel` before starting remote work.
    async fn export(
        &self,
        directory: &Directory,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Release the session.
    async fn close(&self) -> Result<()>;
}

/// Handle to a connected execution backend.
#[derive(Clone)]
pub struct Client {
    backend: Arc<dyn ExecutionBackend>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Client {
    pub fn new(backend: Arc<dyn ExecutionBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &dyn ExecutionBackend {
        self.backend.as_ref()
    }

    /// Reference a remote git repository.
    pub fn git(&self, url: impl Into<String>) -> GitRepository {
        GitRepository {
            client: self.clone(),
            url: url.into(),
        }
    }

    /// Start an empty container description.
    pub fn container(&self) -> Container {
        Container {
            client: self.clone(),
            spec: ContainerSpec::default(),
        }
    }

    /// Release the backend session.
    pub async fn close(&self) -> Result<()> {
        self.backend.close().await
    }
}

/// A remote git repository.
#[derive(Clone, Debug)]
pub struct GitRepository {
    client: Client,
    url: String,
}

impl GitRepository {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Select a branch.
    pub fn branch(&self, name: impl Into<String>) -> GitRef {
        GitRef {
            client: self.client.clone(),
            url: self.url.clone(),
            branch: name.into(),
        }
    }
}

/// A branch of a remote git repository.
#[derive(Clone, Debug)]
pub struct GitRef {
    client: Client,
    url: String,
    branch: String,
}

impl GitRef {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Fetch the branch's tree through the backend.
    pub async fn tree(&self) -> Result<SourceTree> {
        self.client.backend.fetch_tree(self).await
    }
}

/// Read-only handle to a fetched source tree.
///
/// Cheap to clone; every build task of a run shares the same tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceTree {
    inner: Arc<SourceTreeInner>,
}

#[derive(Debug, PartialEq, Eq)]
struct SourceTreeInner {
    url: String,
    branch: String,
    location: PathBuf,
}

impl SourceTree {
    /// Created by backends once a tree has been materialized at `location`.
    pub fn new(
        url: impl Into<String>,
        branch: impl Into<String>,
        location: impl Into<PathBuf>,
    ) -> Self {
        Self {
            inner: Arc::new(SourceTreeInner {
                url: url.into(),
                branch: branch.into(),
                location: location.into(),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn branch(&self) -> &str {
        &self.inner.branch
    }

    /// Where the backend keeps the tree.
    pub fn location(&self) -> &Path {
        &self.inner.location
    }

    /// Repository name derived from the URL, e.g. `repo` for
    /// `https://example.com/repo.git`.
    pub fn repo_name(&self) -> &str {
        let trimmed = self.inner.url.trim_end_matches('/');
        let last = trimmed.rsplit(['/', ':']).next().unwrap_or(trimmed);
        let name = last.strip_suffix(".git").unwrap_or(last);
        if name.is_empty() { "source" } else { name }
    }
}

/// A source tree mounted into a container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mount {
    pub path: String,
    pub source: SourceTree,
}

/// Everything needed to create a container.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: Option<String>,
    pub mounts: Vec<Mount>,
    pub workdir: Option<String>,
    pub env: Vec<(String, String)>,
    pub exec: Option<Vec<String>>,
}

impl ContainerSpec {
    /// Value of an environment variable, if set.
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The exec command as a single display string.
    pub fn command_line(&self) -> String {
        self.exec
            .as_ref()
            .map(|argv| argv.join(" "))
            .unwrap_or_default()
    }
}

/// Immutable container description. Every `with_*` call returns a new value.
#[derive(Clone, Debug)]
pub struct Container {
    client: Client,
    spec: ContainerSpec,
}

impl Container {
    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    /// Base the container on an image.
    pub fn from(mut self, image: impl Into<String>) -> Self {
        self.spec.image = Some(image.into());
        self
    }

    pub fn with_mounted_directory(mut self, path: impl Into<String>, source: &SourceTree) -> Self {
        let path = path.into();
        self.spec.mounts.retain(|mount| mount.path != path);
        self.spec.mounts.push(Mount {
            path,
            source: source.clone(),
        });
        self
    }

    pub fn with_workdir(mut self, path: impl Into<String>) -> Self {
        self.spec.workdir = Some(path.into());
        self
    }

    /// Set an environment variable, replacing an earlier value for `key`.
    pub fn with_env_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.spec.env.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.spec.env.push((key, value)),
        }
        self
    }

    pub fn with_exec<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.exec = Some(argv.into_iter().map(Into::into).collect());
        self
    }

    /// A directory of this container, relative to the workdir unless absolute.
    pub fn directory(&self, path: impl Into<String>) -> Directory {
        Directory {
            client: self.client.clone(),
            container: self.spec.clone(),
            path: path.into(),
        }
    }
}

/// A directory inside a container, ready to be exported.
#[derive(Clone, Debug)]
pub struct Directory {
    client: Client,
    container: ContainerSpec,
    path: String,
}

impl Directory {
    pub fn container(&self) -> &ContainerSpec {
        &self.container
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Absolute path of the directory inside the container.
    pub fn container_path(&self) -> String {
        if self.path.starts_with('/') {
            return self.path.clone();
        }
        let workdir = self.container.workdir.as_deref().unwrap_or("/");
        format!(
            "{}/{}",
            workdir.trim_end_matches('/'),
            self.path.trim_start_matches("./")
        )
    }

    /// Short name for errors and logs: the path without the artifact root
    /// and trailing slash, e.g. `1.21/linux/amd64` for
    /// `build/1.21/linux/amd64/`.
    pub fn target_label(&self) -> &str {
        let path = self.path.trim_end_matches('/');
        path.strip_prefix(ARTIFACT_ROOT)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|rest| !rest.is_empty())
            .unwrap_or(path)
    }

    /// Run the container and copy this directory into `destination`.
    pub async fn export(&self, destination: &Path, cancel: &CancellationToken) -> Result<()> {
        self.client
            .backend
            .export(self, destination, cancel)
            .await
    }
}
