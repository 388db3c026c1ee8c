//! CLI error types with exit code handling
//!
//! Every library error is folded into a [`CliError`] at the binary boundary,
//! which decides the process exit code.

use argotmpl_core::CoreError;
use argotmpl_engine::EngineError;
use argotmpl_repo::RepoError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// Application descriptor or chart source is malformed
    #[error("{message}")]
    #[diagnostic(code(argotmpl::cli::malformed_source))]
    MalformedSource {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("{message}")]
    #[diagnostic(code(argotmpl::cli::fetch_failed))]
    FetchFailed {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("{message}")]
    #[diagnostic(code(argotmpl::cli::revision_not_found))]
    RevisionNotFound { message: String },

    #[error("{message}")]
    #[diagnostic(code(argotmpl::cli::render_failed))]
    RenderFailed {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("{message}")]
    #[diagnostic(code(argotmpl::cli::not_a_git_repo))]
    NotAGitRepo {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("{message}")]
    #[diagnostic(code(argotmpl::cli::diff_staging))]
    DiffStagingFailed { message: String },

    /// IO error (file not found, permissions, lock timeout)
    #[error("{message}")]
    #[diagnostic(code(argotmpl::cli::io))]
    Io {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Invalid arguments
    #[error("{message}")]
    #[diagnostic(code(argotmpl::cli::usage))]
    Usage {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Wrapped error for passthrough (stores the formatted message)
    #[error("{message}")]
    #[diagnostic(code(argotmpl::cli::error))]
    Other {
        message: String,
        #[help]
        help: Option<String>,
    },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::MalformedSource { .. } => exit_codes::MALFORMED_SOURCE,
            CliError::FetchFailed { .. } => exit_codes::FETCH_FAILED,
            CliError::RevisionNotFound { .. } => exit_codes::REVISION_NOT_FOUND,
            CliError::RenderFailed { .. } => exit_codes::RENDER_FAILED,
            CliError::NotAGitRepo { .. } => exit_codes::NOT_A_GIT_REPO,
            CliError::DiffStagingFailed { .. } => exit_codes::DIFF_STAGING_FAILED,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Usage { .. } => exit_codes::USAGE_ERROR,
            CliError::Other { .. } => exit_codes::ERROR,
        }
    }

    /// Create a usage error with help text
    pub fn usage(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create an IO error without help
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
            help: None,
        }
    }

    fn other(message: impl Into<String>, help: Option<&str>) -> Self {
        Self::Other {
            message: message.into(),
            help: help.map(str::to_string),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::io(err.to_string())
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        match err {
            CoreError::MalformedSource { .. }
            | CoreError::InvalidApplication { .. }
            | CoreError::DescriptorParse { .. } => CliError::MalformedSource {
                message,
                help: None,
            },
            CoreError::RefMapping { .. } => CliError::MalformedSource {
                message,
                help: Some("map each ref source with --ref-map NAME=PATH".to_string()),
            },
            CoreError::DescriptorNotFound { .. } => CliError::Io {
                message,
                help: Some(
                    "run from the application's directory or pass --application".to_string(),
                ),
            },
            CoreError::NotInGitRepo { .. } => CliError::NotAGitRepo {
                message,
                help: Some("map the ref source explicitly with --ref-map NAME=PATH".to_string()),
            },
            CoreError::Io(_) => CliError::io(message),
        }
    }
}

impl From<RepoError> for CliError {
    fn from(err: RepoError) -> Self {
        let message = err.to_string();
        match err {
            RepoError::FetchFailed { .. } => CliError::FetchFailed {
                message,
                help: Some("check the repoURL, chart name and targetRevision".to_string()),
            },
            RepoError::ChartPathMissing { .. } => CliError::FetchFailed {
                message,
                help: Some("check the source path at that revision".to_string()),
            },
            RepoError::RevisionNotFound { .. } => CliError::RevisionNotFound { message },
            RepoError::LockTimeout { .. } => CliError::Io {
                message,
                help: Some(
                    "another argotmpl may still be fetching; remove the lock file if it is not"
                        .to_string(),
                ),
            },
            RepoError::Io(_) => CliError::io(message),
            RepoError::Spawn { .. } => CliError::other(
                message,
                Some("is the binary installed? see --helm-binary and --git-binary"),
            ),
            RepoError::CommandFailed { .. } | RepoError::CacheError { .. } => {
                CliError::other(message, None)
            }
            RepoError::Core(core) => core.into(),
        }
    }
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        match err {
            EngineError::RenderFailed { .. } => CliError::RenderFailed {
                message,
                help: Some("pass extra helm flags after `--`, e.g. `-- --debug`".to_string()),
            },
            EngineError::NotAGitRepo { .. } => CliError::NotAGitRepo {
                message,
                help: Some("diff compares against a git ref; run it inside a work tree".to_string()),
            },
            EngineError::DiffStagingFailed { .. } => CliError::DiffStagingFailed { message },
            EngineError::Yaml(_) => CliError::other(message, None),
            EngineError::Io(_) => CliError::io(message),
            EngineError::Core(core) => core.into(),
            EngineError::Repo(repo) => repo.into(),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_errors_map_to_exit_codes() {
        let cases = [
            (
                CoreError::MalformedSource {
                    index: 0,
                    message: "both chart and path".to_string(),
                },
                exit_codes::MALFORMED_SOURCE,
            ),
            (
                CoreError::RefMapping {
                    message: "no mapping".to_string(),
                },
                exit_codes::MALFORMED_SOURCE,
            ),
            (
                CoreError::DescriptorNotFound {
                    path: "application.yaml".to_string(),
                },
                exit_codes::IO_ERROR,
            ),
            (
                CoreError::NotInGitRepo {
                    path: "/tmp".to_string(),
                },
                exit_codes::NOT_A_GIT_REPO,
            ),
        ];

        for (err, code) in cases {
            assert_eq!(CliError::from(err).exit_code(), code);
        }
    }

    #[test]
    fn test_nested_errors_keep_their_kind() {
        let err = EngineError::Repo(RepoError::RevisionNotFound {
            repo_url: "https://git.example.test/charts.git".to_string(),
            revision: "v9".to_string(),
        });
        let cli = CliError::from(err);

        assert_eq!(cli.exit_code(), exit_codes::REVISION_NOT_FOUND);
        assert!(cli.to_string().contains("v9"));

        let err = EngineError::Repo(RepoError::Core(CoreError::InvalidApplication {
            message: "bad kind".to_string(),
        }));
        assert_eq!(CliError::from(err).exit_code(), exit_codes::MALFORMED_SOURCE);
    }

    #[test]
    fn test_engine_errors_map_to_exit_codes() {
        let render = EngineError::RenderFailed {
            status: "exit code 1".to_string(),
            stderr: "boom".to_string(),
        };
        assert_eq!(CliError::from(render).exit_code(), exit_codes::RENDER_FAILED);

        let staging = EngineError::DiffStagingFailed {
            file: "values.yaml".to_string(),
            git_ref: "HEAD".to_string(),
            reason: "missing".to_string(),
        };
        assert_eq!(CliError::from(staging).exit_code(), exit_codes::DIFF_STAGING_FAILED);

        let fetch = EngineError::Repo(RepoError::ChartPathMissing {
            repo_url: "u".to_string(),
            path: "p".to_string(),
            revision: "r".to_string(),
        });
        assert_eq!(CliError::from(fetch).exit_code(), exit_codes::FETCH_FAILED);
    }
}
