//! Engine error types

use argotmpl_core::CoreError;
use argotmpl_repo::RepoError;
use miette::Diagnostic;
use thiserror::Error;

/// Rendering and diff errors
#[derive(Error, Debug, Diagnostic)]
pub enum EngineError {
    #[error("helm template failed ({status}): {stderr}")]
    #[diagnostic(code(argotmpl::render::failed))]
    RenderFailed { status: String, stderr: String },

    #[error("Working directory {path} is not part of a git repository")]
    #[diagnostic(
        code(argotmpl::diff::not_a_git_repo),
        help("diff compares against a git ref; run it from inside a work tree")
    )]
    NotAGitRepo { path: String },

    #[error("Could not stage {file} as of '{git_ref}': {reason}")]
    #[diagnostic(code(argotmpl::diff::staging))]
    DiffStagingFailed {
        file: String,
        git_ref: String,
        reason: String,
    },

    #[error("Failed to parse rendered manifest: {0}")]
    #[diagnostic(code(argotmpl::manifest::yaml))]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    #[diagnostic(code(argotmpl::core))]
    Core(#[from] CoreError),

    #[error(transparent)]
    #[diagnostic(code(argotmpl::repo))]
    Repo(#[from] RepoError),

    #[error("IO error: {0}")]
    #[diagnostic(code(argotmpl::io))]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub(crate) fn staging(
        file: impl Into<String>,
        git_ref: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::DiffStagingFailed {
            file: file.into(),
            git_ref: git_ref.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
