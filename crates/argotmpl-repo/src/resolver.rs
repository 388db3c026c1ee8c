//! Chart resolution
//!
//! Turns a [`SourceDescriptor`] into a chart directory on disk, going through
//! the [`ChartCache`] so that a chart is only fetched when the cache cannot
//! answer.

use argotmpl_core::{SourceDescriptor, SourceKind, repo_alias};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::{CacheKey, ChartCache};
use crate::capability::{OciReference, PackageRepoClient, VcsClient};
use crate::error::{RepoError, Result};
use crate::lock::CacheLock;

/// Steps of a git checkout with one lazy fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutState {
    /// First checkout, against what the clone already has
    Attempted,
    /// Revision unknown locally; fetching from the remote
    FetchTriggered,
    /// Second and last checkout
    Retried,
    Success,
    RevisionNotFound,
}

impl CheckoutState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CheckoutState::Success | CheckoutState::RevisionNotFound)
    }
}

/// A chart ready to render
///
/// The entry lock stays held until this value is dropped, so neither a
/// checkout nor a different chart version can replace the files under a
/// running render.
#[derive(Debug)]
pub struct ResolvedChart {
    pub path: PathBuf,
    pub key: CacheKey,
    lock: Option<CacheLock>,
}

impl ResolvedChart {
    pub fn holds_lock(&self) -> bool {
        self.lock.is_some()
    }
}

/// Resolves chart sources through the cache
#[derive(Clone)]
pub struct ChartResolver {
    cache: ChartCache,
    packages: Arc<dyn PackageRepoClient>,
    vcs: Arc<dyn VcsClient>,
}

impl ChartResolver {
    pub fn new(
        cache: ChartCache,
        packages: Arc<dyn PackageRepoClient>,
        vcs: Arc<dyn VcsClient>,
    ) -> Self {
        Self {
            cache,
            packages,
            vcs,
        }
    }

    pub fn cache(&self) -> &ChartCache {
        &self.cache
    }

    /// Materialize the chart described by `source`
    pub async fn resolve(&self, source: &SourceDescriptor) -> Result<ResolvedChart> {
        tracing::debug!("Resolving {}", source);
        match &source.kind {
            SourceKind::HttpsRepo { chart } => self.resolve_package(source, chart, false).await,
            SourceKind::OciRegistry { chart } => self.resolve_package(source, chart, true).await,
            SourceKind::GitPath { path } => self.resolve_git(source, path).await,
        }
    }

    async fn resolve_package(
        &self,
        source: &SourceDescriptor,
        chart: &str,
        oci: bool,
    ) -> Result<ResolvedChart> {
        let key = self.cache.key_for(source);
        let lock = self.cache.lock(&key).await?;

        if self.cache.has(&key) {
            tracing::info!("Chart {}:{} already in cache", chart, source.revision);
            return Ok(ResolvedChart {
                path: self.cache.slot_path(&key),
                key,
                lock: Some(lock),
            });
        }

        let staging = self.cache.staging_dir(&key)?;
        if oci {
            let reference = OciReference::new(&source.repo_url, chart, &source.revision);
            self.packages.pull_oci(&reference, staging.path()).await?;
        } else {
            let alias = repo_alias(&source.repo_url);
            self.packages
                .add_or_update_repo(&alias, &source.repo_url)
                .await?;
            self.packages
                .pull(&alias, chart, &source.revision, staging.path())
                .await?;
        }

        let pulled = staging.path().join(chart);
        if !pulled.join("Chart.yaml").is_file() {
            return Err(RepoError::fetch_failed(
                format!("chart {}@{} from {}", chart, source.revision, source.repo_url),
                format!("pull produced no {}/Chart.yaml", chart),
            ));
        }

        let path = self.cache.commit(&pulled, &key)?;
        self.cache.mark_ready(&key, &path)?;

        Ok(ResolvedChart {
            path,
            key,
            lock: Some(lock),
        })
    }

    async fn resolve_git(&self, source: &SourceDescriptor, chart_path: &str) -> Result<ResolvedChart> {
        let key = self.cache.key_for(source);
        let lock = self.cache.lock(&key).await?;
        let clone_dir = self.cache.slot_path(&key);

        if self.cache.has(&key) {
            tracing::info!("Reusing clone of {} at {}", source.repo_url, clone_dir.display());
        } else {
            let staging = self.cache.staging_dir(&key)?;
            let target = staging.path().join(&key.name);
            self.vcs.clone_repo(&source.repo_url, &target).await?;
            let committed = self.cache.commit(&target, &key)?;
            self.cache.mark_ready(&key, &committed)?;
        }

        match self.checkout(&clone_dir, &source.revision).await? {
            CheckoutState::Success => {}
            _ => {
                return Err(RepoError::RevisionNotFound {
                    repo_url: source.repo_url.clone(),
                    revision: source.revision.clone(),
                });
            }
        }

        let path = clone_dir.join(chart_path.trim_end_matches('/'));
        if !path.is_dir() {
            return Err(RepoError::ChartPathMissing {
                repo_url: source.repo_url.clone(),
                path: chart_path.to_string(),
                revision: source.revision.clone(),
            });
        }

        self.link_chart(&path, source.chart_dir_name());

        Ok(ResolvedChart {
            path,
            key,
            lock: Some(lock),
        })
    }

    /// Check out `revision`, fetching once if the clone does not know it
    ///
    /// Returns the terminal state, `Success` or `RevisionNotFound`.
    pub async fn checkout(&self, clone_dir: &Path, revision: &str) -> Result<CheckoutState> {
        let mut state = CheckoutState::Attempted;

        while !state.is_terminal() {
            state = match state {
                CheckoutState::Attempted => {
                    if self.vcs.checkout(clone_dir, revision).await? {
                        CheckoutState::Success
                    } else {
                        tracing::info!("Revision {} not found locally, fetching", revision);
                        CheckoutState::FetchTriggered
                    }
                }
                CheckoutState::FetchTriggered => {
                    self.vcs.fetch(clone_dir).await?;
                    CheckoutState::Retried
                }
                CheckoutState::Retried => {
                    if self.vcs.checkout(clone_dir, revision).await? {
                        CheckoutState::Success
                    } else {
                        CheckoutState::RevisionNotFound
                    }
                }
                terminal => terminal,
            };
            tracing::debug!("Checkout of {}: {:?}", revision, state);
        }

        Ok(state)
    }

    /// Point `<chart_dir>/<name>` at the chart inside the clone
    fn link_chart(&self, target: &Path, name: &str) {
        let link = self.cache.chart_dir().join(name);

        if let Ok(meta) = std::fs::symlink_metadata(&link) {
            if !meta.file_type().is_symlink() {
                tracing::warn!(
                    "{} exists and is not a symlink, leaving it alone",
                    link.display()
                );
                return;
            }
            if let Err(e) = std::fs::remove_file(&link) {
                tracing::warn!("Failed to replace {}: {}", link.display(), e);
                return;
            }
        }

        if let Err(e) = std::fs::create_dir_all(self.cache.chart_dir()).and_then(|_| symlink_dir(target, &link)) {
            tracing::warn!("Failed to link {} to {}: {}", link.display(), target.display(), e);
        }
    }
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink_dir(_target: &Path, _link: &Path) -> std::io::Result<()> {
    Ok(())
}
