//! Build matrix generation.
//!
//! A [`BuildMatrix`] is the Cartesian product of toolchain versions,
//! operating systems and CPU architectures. Each element is a
//! [`BuildTarget`], which also owns the naming conventions derived from it:
//! the container image tag and the artifact path.

use std::fmt;
use std::path::PathBuf;

/// Toolchain versions built by default
pub const TOOLCHAIN_VERSIONS: &[&str] = &["1.18", "1.19"];

/// Target operating systems built by default
pub const TARGET_OSES: &[&str] = &["linux", "darwin"];

/// Target architectures built by default
pub const TARGET_ARCHES: &[&str] = &["amd64", "arm64"];

/// Root directory of all artifact paths
pub const ARTIFACT_ROOT: &str = "build";

/// One (toolchain version, OS, architecture) combination.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BuildTarget {
    pub toolchain_version: String,
    pub os: String,
    pub arch: String,
}

impl BuildTarget {
    pub fn new(
        toolchain_version: impl Into<String>,
        os: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        Self {
            toolchain_version: toolchain_version.into(),
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// Base image for this target's toolchain, e.g. `golang:1.19`.
    pub fn image_tag(&self) -> String {
        format!("golang:{}", self.toolchain_version)
    }

    /// Relative artifact directory: `build/<version>/<os>/<arch>/`.
    ///
    /// Used unchanged inside the container (relative to the workdir) and on
    /// the local side (relative to the output root). Distinct targets never
    /// share a path.
    pub fn artifact_path(&self) -> PathBuf {
        PathBuf::from(ARTIFACT_ROOT)
            .join(&self.toolchain_version)
            .join(&self.os)
            .join(&self.arch)
    }

    /// The artifact path in the slash-terminated form the compiler expects
    /// for `-o` to be treated as a directory.
    pub fn artifact_dir_arg(&self) -> String {
        format!(
            "{}/{}/{}/{}/",
            ARTIFACT_ROOT, self.toolchain_version, self.os, self.arch
        )
    }

    /// Environment bindings that select the compilation target.
    pub fn env_bindings(&self) -> [(&'static str, &str); 2] {
        [("GOOS", self.os.as_str()), ("GOARCH", self.arch.as_str())]
    }

    /// Compilation command run inside the container.
    pub fn build_command(&self) -> Vec<String> {
        vec![
            "go".to_string(),
            "build".to_string(),
            "-o".to_string(),
            self.artifact_dir_arg(),
        ]
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.toolchain_version, self.os, self.arch)
    }
}

/// Three ordered dimensions whose product is the set of build targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildMatrix {
    versions: Vec<String>,
    oses: Vec<String>,
    arches: Vec<String>,
}

impl BuildMatrix {
    pub fn new<V, O, A>(versions: V, oses: O, arches: A) -> Self
    where
        V: IntoIterator,
        V::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
        A: IntoIterator,
        A::Item: Into<String>,
    {
        Self {
            versions: versions.into_iter().map(Into::into).collect(),
            oses: oses.into_iter().map(Into::into).collect(),
            arches: arches.into_iter().map(Into::into).collect(),
        }
    }

    pub fn versions(&self) -> &[String] {
        &self.versions
    }

    pub fn oses(&self) -> &[String] {
        &self.oses
    }

    pub fn arches(&self) -> &[String] {
        &self.arches
    }

    /// Number of targets the matrix expands to.
    pub fn len(&self) -> usize {
        self.versions.len() * self.oses.len() * self.arches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every target exactly once: version outermost, then OS, then
    /// architecture. An empty dimension yields no targets.
    pub fn targets(&self) -> Vec<BuildTarget> {
        let mut targets = Vec::with_capacity(self.len());
        for version in &self.versions {
            for os in &self.oses {
                for arch in &self.arches {
                    targets.push(BuildTarget::new(version, os, arch));
                }
            }
        }
        targets
    }
}

impl Default for BuildMatrix {
    fn default() -> Self {
        Self::new(
            TOOLCHAIN_VERSIONS.iter().copied(),
            TARGET_OSES.iter().copied(),
            TARGET_ARCHES.iter().copied(),
        )
    }
}
