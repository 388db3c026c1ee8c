//! User settings
//!
//! Read from `~/.config/argotmpl/config.yaml` when it exists. Command line
//! flags and `ARGOTMPL_*` environment variables take precedence.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CliError, Result};

/// Default chart download directory, under the workdir
pub const DEFAULT_CHART_DIR: &str = ".chart";

/// Default git clone cache, under the workdir
pub const DEFAULT_REPO_CACHE_DIR: &str = ".chart_repo";

pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub helm_binary: PathBuf,
    pub git_binary: PathBuf,
    /// Relative paths are taken from the workdir
    pub chart_dir: Option<PathBuf>,
    pub repo_cache_dir: Option<PathBuf>,
    pub lock_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            helm_binary: PathBuf::from("helm"),
            git_binary: PathBuf::from("git"),
            chart_dir: None,
            repo_cache_dir: None,
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
        }
    }
}

/// Values given on the command line, overriding the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub helm_binary: Option<PathBuf>,
    pub git_binary: Option<PathBuf>,
    pub chart_dir: Option<PathBuf>,
    pub repo_cache_dir: Option<PathBuf>,
    pub lock_timeout_secs: Option<u64>,
}

impl Settings {
    /// Load from `explicit`, or from the default location when present
    ///
    /// An explicit file must exist; the default one is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load_from(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::load_from(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::debug!("Loading settings from {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::io(format!("Failed to read settings {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content).map_err(|e| CliError::Usage {
            message: format!("Invalid settings file {}: {}", path.display(), e),
            help: Some(
                "known keys: helmBinary, gitBinary, chartDir, repoCacheDir, lockTimeoutSecs"
                    .to_string(),
            ),
        })
    }

    pub fn from_yaml(yaml: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
    }

    /// `<config dir>/argotmpl/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("argotmpl").join("config.yaml"))
    }

    pub fn with_overrides(mut self, overrides: &Overrides) -> Self {
        if let Some(helm) = &overrides.helm_binary {
            self.helm_binary = helm.clone();
        }
        if let Some(git) = &overrides.git_binary {
            self.git_binary = git.clone();
        }
        if let Some(dir) = &overrides.chart_dir {
            self.chart_dir = Some(dir.clone());
        }
        if let Some(dir) = &overrides.repo_cache_dir {
            self.repo_cache_dir = Some(dir.clone());
        }
        if let Some(secs) = overrides.lock_timeout_secs {
            self.lock_timeout_secs = secs;
        }
        self
    }

    pub fn chart_dir_in(&self, workdir: &Path) -> PathBuf {
        resolve_dir(self.chart_dir.as_deref(), workdir, DEFAULT_CHART_DIR)
    }

    pub fn repo_cache_dir_in(&self, workdir: &Path) -> PathBuf {
        resolve_dir(self.repo_cache_dir.as_deref(), workdir, DEFAULT_REPO_CACHE_DIR)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

fn resolve_dir(configured: Option<&Path>, workdir: &Path, default: &str) -> PathBuf {
    match configured {
        Some(dir) if dir.is_absolute() => dir.to_path_buf(),
        Some(dir) => workdir.join(dir),
        None => workdir.join(default),
    }
}
