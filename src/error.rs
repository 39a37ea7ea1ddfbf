// src/error.rs

//! Crate-wide error type
//!
//! One sum type covers every failure class the orchestrator can hit.
//! Network failures (`DownloadError`) are the only recoverable kind: the
//! freshness check consumes them and treats the package as "not available
//! remotely". Everything else propagates to the top level and aborts the
//! run, leaving partial state on disk for the next invocation to pick up.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Unknown architecture, unreadable config file, missing required keys
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Recipe parsing failed, or a path filter matched nothing
    #[error("Discovery error: {0}")]
    DiscoveryError(String),

    /// Dependency cycle or runaway level depth
    #[error("Dependency solver error: {0}")]
    SolverError(String),

    /// Transient network failure; callers treat this as "not available"
    #[error("Download error: {0}")]
    DownloadError(String),

    /// Non-zero exit from source prep or compilation
    #[error("Build failed: {0}")]
    BuildError(String),

    /// repo-add failure or missing expected artifact
    #[error("Publish error: {0}")]
    PublishError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e.to_string())
    }
}
