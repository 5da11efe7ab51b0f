//! Error types for matrix builds.
//!
//! Each variant corresponds to one stage of a build: argument parsing,
//! backend connection, source fetch, local filesystem, remote execution and
//! artifact export.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for multibuild operations
pub type Result<T> = std::result::Result<T, MultibuildError>;

/// Main error type for all multibuild operations
#[derive(Error, Debug)]
pub enum MultibuildError {
    /// CLI argument errors
    #[error("CLI error: {0}")]
    Cli(#[from] CliError),

    /// The execution backend could not be reached
    #[error("Cannot connect to execution backend: {reason}")]
    Connection {
        /// Reason for the error
        reason: String,
    },

    /// Git branch or tree resolution failed
    #[error("Failed to fetch branch '{branch}' of {url}: {reason}")]
    Fetch {
        /// Repository URL
        url: String,
        /// Branch name
        branch: String,
        /// Reason for the error
        reason: String,
    },

    /// A local output directory could not be created
    #[error("Failed to create output directory {}: {source}", path.display())]
    Filesystem {
        /// Directory that could not be created
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// The compilation command failed inside its container
    #[error("Build for {target} failed: {command} - {reason}")]
    BackendExecution {
        /// Build target (`<version>/<os>/<arch>`)
        target: String,
        /// Command that failed
        command: String,
        /// Exit code, if the command ran at all
        exit_code: Option<i32>,
        /// Reason for the error
        reason: String,
    },

    /// The artifact could not be materialized locally
    #[error("Failed to export {from} to {}: {reason}", to.display())]
    Export {
        /// Path inside the build environment
        from: String,
        /// Local destination
        to: PathBuf,
        /// Reason for the error
        reason: String,
    },

    /// Work was skipped because a sibling task already failed
    #[error("Build for {target} cancelled after a sibling task failed")]
    Cancelled {
        /// Build target (`<version>/<os>/<arch>`)
        target: String,
    },

    /// Span export errors
    #[error("Trace export error: {0}")]
    Trace(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failures that are not tied to a build stage (task panics)
    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Invalid command line arguments
    #[error("Invalid arguments: {reason}")]
    InvalidArguments {
        /// Reason for the error
        reason: String,
    },

    /// Missing required argument
    #[error("Missing required argument: {argument}")]
    MissingArgument {
        /// Argument name
        argument: String,
    },
}

impl MultibuildError {
    /// Process exit code for this error.
    ///
    /// Usage errors exit with 2 (the clap convention), everything else with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            MultibuildError::Cli(_) => 2,
            _ => 1,
        }
    }

    /// Whether this error is only a consequence of another task failing.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, MultibuildError::Cancelled { .. })
    }
}
