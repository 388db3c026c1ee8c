//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Application descriptor not found: {path}")]
    DescriptorNotFound { path: String },

    #[error("Failed to parse application descriptor {path}: {message}")]
    DescriptorParse { path: String, message: String },

    #[error("Invalid application: {message}")]
    InvalidApplication { message: String },

    #[error("Malformed chart source #{index}: {message}")]
    MalformedSource { index: usize, message: String },

    #[error("{message}")]
    RefMapping { message: String },

    #[error(
        "Working directory {path} is not in a git repository. Cannot determine git root for ref sources."
    )]
    NotInGitRepo { path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub(crate) fn malformed(index: usize, message: impl Into<String>) -> Self {
        Self::MalformedSource {
            index,
            message: message.into(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidApplication {
            message: message.into(),
        }
    }

    pub(crate) fn ref_mapping(message: impl Into<String>) -> Self {
        Self::RefMapping {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
