//! Cross-compile a git repository for a matrix of toolchains and platforms.
//!
//! The source is fetched once and every (toolchain version, OS, architecture)
//! combination is compiled concurrently in its own container. Artifacts land
//! under `build/<version>/<os>/<arch>/`. The first failing build fails the
//! whole run.
//!
//! It can be used both as a CLI tool and as a library dependency: see
//! [`build::build_repository`] with a [`backend::Client`].

pub mod backend;
pub mod build;
pub mod cli;
pub mod error;
pub mod matrix;
pub mod telemetry;

// Re-export commonly used types
pub use error::{CliError, MultibuildError, Result};
