//! Local chart cache
//!
//! Two kinds of entries share one model:
//! - **Package** charts (Helm repo / OCI) are cached per revision in
//!   `<chart_dir>/<chart>`. The slot is a hit when its `Chart.yaml` carries
//!   the requested version.
//! - **Git** repositories are cached once per repo in
//!   `<repo_cache_dir>/<alias>`; every revision is checked out in the same clone.
//!
//! Entries are never invalidated. A chart version republished upstream with
//! different content keeps being served from the cache.

use argotmpl_core::{SourceDescriptor, SourceKind, repo_alias};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

use crate::error::{RepoError, Result};
use crate::lock::CacheLock;

/// Default time to wait for another process holding an entry
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(300);

const LOCKS_DIR: &str = ".locks";
const STAGING_PREFIX: &str = ".fetch-";
const DISPLACED_PREFIX: &str = ".old-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    /// Chart pulled from a Helm repository or OCI registry
    Package,
    /// Full git clone
    Git,
}

/// Identity of a cache entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: CacheKind,
    /// Repository URL
    pub origin: String,
    /// Chart name for packages, repository alias for git
    pub name: String,
    /// Set for packages only; git entries span all revisions
    pub revision: Option<String>,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.revision {
            Some(rev) => write!(f, "{}@{}", self.name, rev),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Absent,
    /// Another process holds the entry lock
    Fetching,
    Ready,
    /// Slot exists but holds another version, or a broken clone
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub local_path: PathBuf,
    pub state: CacheState,
}

/// Only the field the cache looks at
#[derive(Debug, Deserialize)]
struct ChartVersion {
    #[serde(default)]
    version: String,
}

/// Chart and clone cache rooted at two directories
#[derive(Debug, Clone)]
pub struct ChartCache {
    chart_dir: PathBuf,
    repo_cache_dir: PathBuf,
    lock_timeout: Duration,
}

impl ChartCache {
    pub fn new(chart_dir: impl Into<PathBuf>, repo_cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            chart_dir: chart_dir.into(),
            repo_cache_dir: repo_cache_dir.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn chart_dir(&self) -> &Path {
        &self.chart_dir
    }

    pub fn repo_cache_dir(&self) -> &Path {
        &self.repo_cache_dir
    }

    pub fn key_for(&self, source: &SourceDescriptor) -> CacheKey {
        match &source.kind {
            SourceKind::HttpsRepo { chart } | SourceKind::OciRegistry { chart } => CacheKey {
                kind: CacheKind::Package,
                origin: source.repo_url.clone(),
                name: chart.clone(),
                revision: Some(source.revision.clone()),
            },
            SourceKind::GitPath { .. } => CacheKey {
                kind: CacheKind::Git,
                origin: source.repo_url.clone(),
                name: repo_alias(&source.repo_url),
                revision: None,
            },
        }
    }

    fn root_for(&self, kind: CacheKind) -> &Path {
        match kind {
            CacheKind::Package => &self.chart_dir,
            CacheKind::Git => &self.repo_cache_dir,
        }
    }

    /// Final location of the entry
    pub fn slot_path(&self, key: &CacheKey) -> PathBuf {
        self.root_for(key.kind).join(&key.name)
    }

    fn lock_path(&self, key: &CacheKey) -> PathBuf {
        let slot = self.slot_path(key);
        let digest = hex::encode(Sha256::digest(slot.to_string_lossy().as_bytes()));
        self.root_for(key.kind)
            .join(LOCKS_DIR)
            .join(format!("{}.lock", digest))
    }

    /// Whether the slot already satisfies the key
    pub fn has(&self, key: &CacheKey) -> bool {
        let slot = self.slot_path(key);
        match key.kind {
            CacheKind::Package => match (&key.revision, read_chart_version(&slot)) {
                (Some(wanted), Some(found)) => same_version(wanted, &found),
                _ => false,
            },
            CacheKind::Git => slot.join(".git").exists(),
        }
    }

    pub fn entry(&self, key: &CacheKey) -> CacheEntry {
        let local_path = self.slot_path(key);
        let state = if self.has(key) {
            CacheState::Ready
        } else if self.lock_path(key).exists() {
            CacheState::Fetching
        } else if local_path.exists() {
            CacheState::Stale
        } else {
            CacheState::Absent
        };

        CacheEntry {
            key: key.clone(),
            local_path,
            state,
        }
    }

    /// Take the entry lock, waiting up to the configured timeout
    pub async fn lock(&self, key: &CacheKey) -> Result<CacheLock> {
        CacheLock::acquire(self.lock_path(key), self.lock_timeout).await
    }

    /// Fresh staging directory beside the entry's slot, removed on drop
    pub fn staging_dir(&self, key: &CacheKey) -> Result<TempDir> {
        let root = self.root_for(key.kind);
        std::fs::create_dir_all(root)?;
        Ok(tempfile::Builder::new().prefix(STAGING_PREFIX).tempdir_in(root)?)
    }

    /// Move a fully written `staged` directory into the entry's slot
    ///
    /// Whatever occupied the slot is renamed aside first and removed
    /// afterwards, so the slot never shows a partial entry.
    pub fn commit(&self, staged: &Path, key: &CacheKey) -> Result<PathBuf> {
        let slot = self.slot_path(key);
        let root = self.root_for(key.kind);

        let displaced = if std::fs::symlink_metadata(&slot).is_ok() {
            let aside = tempfile::Builder::new().prefix(DISPLACED_PREFIX).tempdir_in(root)?;
            std::fs::rename(&slot, aside.path().join(&key.name))?;
            tracing::debug!("Moved previous {} aside", slot.display());
            Some(aside)
        } else {
            None
        };

        if let Err(e) = std::fs::rename(staged, &slot) {
            if let Some(aside) = displaced {
                let previous = aside.path().join(&key.name);
                if let Err(restore) = std::fs::rename(&previous, &slot) {
                    // Leave the previous version on disk
                    let kept = aside.keep();
                    tracing::warn!(
                        "Failed to restore {} into {}: {}; it remains at {}",
                        previous.display(),
                        slot.display(),
                        restore,
                        kept.join(&key.name).display()
                    );
                }
            }
            return Err(RepoError::CacheError {
                message: format!("failed to move {} into {}: {}", staged.display(), slot.display(), e),
            });
        }

        // Dropping the TempDir removes the old version
        drop(displaced);
        Ok(slot)
    }

    /// Confirm a freshly committed entry satisfies its key
    pub fn mark_ready(&self, key: &CacheKey, path: &Path) -> Result<CacheEntry> {
        if path != self.slot_path(key) {
            return Err(RepoError::CacheError {
                message: format!("{} is not the cache slot for {}", path.display(), key),
            });
        }

        if !self.has(key) {
            let found = match key.kind {
                CacheKind::Package => read_chart_version(path)
                    .map(|v| format!("Chart.yaml reports version '{}'", v))
                    .unwrap_or_else(|| "no readable Chart.yaml".to_string()),
                CacheKind::Git => "no .git directory".to_string(),
            };
            return Err(RepoError::CacheError {
                message: format!("fetched {} but {}", key, found),
            });
        }

        tracing::info!("Cached {} at {}", key, path.display());
        Ok(CacheEntry {
            key: key.clone(),
            local_path: path.to_path_buf(),
            state: CacheState::Ready,
        })
    }
}

fn read_chart_version(chart_dir: &Path) -> Option<String> {
    let content = std::fs::read_to_string(chart_dir.join("Chart.yaml")).ok()?;
    let chart: ChartVersion = serde_yaml::from_str(&content).ok()?;
    Some(chart.version)
}

fn same_version(a: &str, b: &str) -> bool {
    a.trim_start_matches('v') == b.trim_start_matches('v')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn package(chart: &str, revision: &str) -> SourceDescriptor {
        SourceDescriptor {
            kind: SourceKind::HttpsRepo {
                chart: chart.to_string(),
            },
            repo_url: "https://example.test/charts".to_string(),
            revision: revision.to_string(),
        }
    }

    fn git(path: &str, revision: &str) -> SourceDescriptor {
        SourceDescriptor {
            kind: SourceKind::GitPath {
                path: path.to_string(),
            },
            repo_url: "https://git.example.test/org/charts".to_string(),
            revision: revision.to_string(),
        }
    }

    fn write_chart(dir: &Path, version: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(
            dir.join("Chart.yaml"),
            format!("apiVersion: v2\nname: demo\nversion: {}\n", version),
        )
        .unwrap();
    }

    fn cache(tmp: &TempDir) -> ChartCache {
        ChartCache::new(tmp.path().join(".chart"), tmp.path().join(".chart_repo"))
    }

    #[test]
    fn test_keys() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp);

        let key = cache.key_for(&package("demo", "1.0.0"));
        assert_eq!(key.kind, CacheKind::Package);
        assert_eq!(key.revision.as_deref(), Some("1.0.0"));
        assert_eq!(cache.slot_path(&key), tmp.path().join(".chart/demo"));

        let a = cache.key_for(&git("charts/a", "main"));
        let b = cache.key_for(&git("charts/b", "v2"));
        assert_eq!(a, b);
        assert_eq!(a.name, "git.example.test-org-charts");
        assert_eq!(
            cache.slot_path(&a),
            tmp.path().join(".chart_repo/git.example.test-org-charts")
        );
    }

    #[test]
    fn test_package_states() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp);
        let key = cache.key_for(&package("demo", "1.0.0"));

        assert_eq!(cache.entry(&key).state, CacheState::Absent);

        write_chart(&cache.slot_path(&key), "0.9.0");
        assert_eq!(cache.entry(&key).state, CacheState::Stale);

        write_chart(&cache.slot_path(&key), "v1.0.0");
        assert!(cache.has(&key));
        assert_eq!(cache.entry(&key).state, CacheState::Ready);
    }

    #[tokio::test]
    async fn test_fetching_state_while_locked() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp);
        let key = cache.key_for(&package("demo", "1.0.0"));

        let lock = cache.lock(&key).await.unwrap();
        assert_eq!(cache.entry(&key).state, CacheState::Fetching);
        drop(lock);
        assert_eq!(cache.entry(&key).state, CacheState::Absent);
    }

    #[test]
    fn test_git_state() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp);
        let key = cache.key_for(&git("charts/a", "main"));

        assert!(!cache.has(&key));
        std::fs::create_dir_all(cache.slot_path(&key).join(".git")).unwrap();
        assert!(cache.has(&key));
    }

    #[test]
    fn test_commit_replaces_old_version() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp);
        let key = cache.key_for(&package("demo", "2.0.0"));
        write_chart(&cache.slot_path(&key), "1.0.0");

        let staging = cache.staging_dir(&key).unwrap();
        assert_eq!(staging.path().parent(), Some(cache.chart_dir()));
        let staged = staging.path().join("demo");
        write_chart(&staged, "2.0.0");

        let slot = cache.commit(&staged, &key).unwrap();
        let entry = cache.mark_ready(&key, &slot).unwrap();
        assert_eq!(entry.state, CacheState::Ready);

        // Only the slot and the staging dir remain; the old version is gone
        let leftovers: Vec<_> = std::fs::read_dir(cache.chart_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with(DISPLACED_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_failed_commit_restores_previous_version() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp);
        let key = cache.key_for(&package("demo", "2.0.0"));
        write_chart(&cache.slot_path(&key), "1.0.0");

        let staging = cache.staging_dir(&key).unwrap();
        let err = cache.commit(&staging.path().join("missing"), &key).unwrap_err();

        assert!(matches!(err, RepoError::CacheError { .. }));
        assert_eq!(read_chart_version(&cache.slot_path(&key)).as_deref(), Some("1.0.0"));
    }

    #[test]
    fn test_mark_ready_rejects_wrong_version() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp);
        let key = cache.key_for(&package("demo", "2.0.0"));
        write_chart(&cache.slot_path(&key), "1.0.0");

        let err = cache.mark_ready(&key, &cache.slot_path(&key)).unwrap_err();
        assert!(err.to_string().contains("'1.0.0'"));
    }

    #[test]
    fn test_same_version() {
        assert!(same_version("v1.2.3", "1.2.3"));
        assert!(same_version("1.2.3", "v1.2.3"));
        assert!(!same_version("1.2.3", "1.2.4"));
    }
}
