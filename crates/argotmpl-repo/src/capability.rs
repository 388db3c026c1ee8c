//! Capability traits for the external tools
//!
//! Everything argotmpl asks of `helm` and `git` goes through these traits.
//! The subprocess backends live in [`crate::backend`]; the mocks in
//! [`crate::backend::mock`] record calls for tests.

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// A chart in an OCI registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OciReference {
    /// Registry host and repository path, without scheme
    pub registry_path: String,
    pub chart: String,
    pub tag: String,
}

impl OciReference {
    pub fn new(
        registry_path: impl Into<String>,
        chart: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            registry_path: registry_path.into(),
            chart: chart.into(),
            tag: tag.into(),
        }
    }

    /// `oci://<registry_path>/<chart>`, as `helm pull` expects it
    pub fn chart_ref(&self) -> String {
        format!(
            "oci://{}/{}",
            self.registry_path.trim_end_matches('/'),
            self.chart
        )
    }
}

impl fmt::Display for OciReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chart_ref(), self.tag)
    }
}

/// Helm repositories and OCI registries
#[async_trait]
pub trait PackageRepoClient: Send + Sync {
    /// Register the repository under `alias`, refreshing its index
    async fn add_or_update_repo(&self, alias: &str, url: &str) -> Result<()>;

    /// Pull `alias/chart` at `revision`, unpacked as `dest/<chart>`
    async fn pull(&self, alias: &str, chart: &str, revision: &str, dest: &Path) -> Result<()>;

    /// Pull an OCI chart, unpacked as `dest/<chart>`
    async fn pull_oci(&self, reference: &OciReference, dest: &Path) -> Result<()>;
}

/// Version control operations
#[async_trait]
pub trait VcsClient: Send + Sync {
    /// Whether `path` is inside a work tree. Never fails.
    async fn is_repo(&self, path: &Path) -> bool;

    /// Top-level directory of the work tree containing `path`
    async fn toplevel(&self, path: &Path) -> Result<PathBuf>;

    /// Full clone of `url` into `dest`
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()>;

    /// Check out `revision`; `false` when the revision is unknown locally
    async fn checkout(&self, dir: &Path, revision: &str) -> Result<bool>;

    /// Fetch all refs from the remote
    async fn fetch(&self, dir: &Path) -> Result<()>;

    /// Files among `paths` that differ from `base_ref`, relative to `dir`
    async fn changed_files(&self, dir: &Path, base_ref: &str, paths: &[PathBuf])
    -> Result<Vec<PathBuf>>;

    /// Content of `path` (relative to `dir`) as of `git_ref`
    async fn show_file_at(&self, dir: &Path, git_ref: &str, path: &Path) -> Result<Vec<u8>>;

    /// Show the differences between two files to the user
    async fn diff_view(&self, base: &Path, working: &Path) -> Result<()>;
}

/// Output of one `helm template` run
#[derive(Debug, Clone, Default)]
pub struct TemplateOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `None` when killed by a signal
    pub status: Option<i32>,
}

impl TemplateOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Chart rendering
#[async_trait]
pub trait ChartRenderer: Send + Sync {
    /// Render `chart` with `args`. A nonzero exit is reported in the output, not as an error.
    async fn template(&self, chart: &Path, args: &[String]) -> Result<TemplateOutput>;
}
