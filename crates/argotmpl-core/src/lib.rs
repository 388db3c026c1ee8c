//! argotmpl Core - Application descriptors and chart sources
//!
//! This crate provides the types the rest of argotmpl works from:
//! - `Application`: The Argo CD Application descriptor
//! - `SourceDescriptor`: The normalized chart source (Helm repo, OCI, git)
//! - `RefMapping` / `ValuesPlan`: Values files resolved to local paths

pub mod application;
pub mod error;
pub mod source;
pub mod values;

pub use application::{APPLICATION_KIND, Application, HelmSource, Metadata, Source};
pub use error::{CoreError, Result};
pub use source::{SourceDescriptor, SourceKind, classify, repo_alias};
pub use values::{DEFAULT_VALUES_FILE, RefMapping, ValuesPlan};
