//! argotmpl Chart Resolution
//!
//! This crate materializes the chart an Application points at:
//!
//! - **Helm repositories**: `helm repo add` + `helm pull`, cached per version
//! - **OCI registries**: `helm pull oci://...`, cached per version
//! - **Git repositories**: one full clone per repository, checked out per revision
//!
//! ## Key Features
//!
//! - **Capability traits**: `helm` and `git` sit behind [`PackageRepoClient`],
//!   [`VcsClient`] and [`ChartRenderer`], with in-memory mocks for tests
//! - **Atomic cache fills**: pulls land in a staging directory and are renamed into place
//! - **Per-entry locks**: concurrent runs sharing a chart directory wait on each other
//! - **Lazy fetch**: a git revision missing from the clone triggers exactly one fetch
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use argotmpl_core::{Application, SourceDescriptor};
//! use argotmpl_repo::{ChartCache, ChartResolver, GitCli, HelmCli};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let app = Application::load("application.yaml".as_ref())?;
//! let source = SourceDescriptor::for_chart(&app)?;
//!
//! let cache = ChartCache::new(".chart", ".chart_repo");
//! let resolver = ChartResolver::new(cache, Arc::new(HelmCli::default()), Arc::new(GitCli::default()));
//!
//! let chart = resolver.resolve(&source).await?;
//! println!("chart at {}", chart.path.display());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod cache;
pub mod capability;
pub mod error;
pub mod lock;
pub mod resolver;

// Re-exports for convenience
pub use backend::{GitCli, HelmCli};
pub use cache::{CacheEntry, CacheKey, CacheKind, CacheState, ChartCache, DEFAULT_LOCK_TIMEOUT};
pub use capability::{ChartRenderer, OciReference, PackageRepoClient, TemplateOutput, VcsClient};
pub use error::{RepoError, Result};
pub use lock::CacheLock;
pub use resolver::{ChartResolver, CheckoutState, ResolvedChart};
