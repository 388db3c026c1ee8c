//! Error types for chart resolution

use argotmpl_core::CoreError;
use thiserror::Error;

/// Chart resolution errors
#[derive(Debug, Error)]
pub enum RepoError {
    // ============ Fetch Errors ============
    #[error("Failed to fetch {target}: {stderr}")]
    FetchFailed { target: String, stderr: String },

    #[error("Revision '{revision}' not found in {repo_url}, even after fetching")]
    RevisionNotFound { repo_url: String, revision: String },

    #[error("Chart path '{path}' does not exist in {repo_url} at revision '{revision}'")]
    ChartPathMissing {
        repo_url: String,
        path: String,
        revision: String,
    },

    // ============ Tool Errors ============
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command `{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    // ============ Cache Errors ============
    #[error("Timed out after {seconds}s waiting for cache lock {path}")]
    LockTimeout { path: String, seconds: u64 },

    #[error("Cache error: {message}")]
    CacheError { message: String },

    // ============ Wrapped ============
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RepoError {
    pub(crate) fn fetch_failed(target: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::FetchFailed {
            target: target.into(),
            stderr: stderr.into(),
        }
    }
}

/// Result type for chart resolution
pub type Result<T> = std::result::Result<T, RepoError>;
