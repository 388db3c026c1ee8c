//! CLI commands

pub mod diff;
pub mod render;

use argotmpl_engine::{RenderJob, RenderPipeline};
use argotmpl_repo::{ChartCache, ChartResolver, GitCli, HelmCli, VcsClient};
use clap::Args;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{CliError, Result};
use crate::settings::{Overrides, Settings};

/// Flags shared by `render` and `diff`
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Directory holding the application file (default: current directory)
    #[arg(long, env = "ARGOTMPL_WORKDIR")]
    pub workdir: Option<PathBuf>,

    /// Application file name, relative to the workdir
    #[arg(long, default_value = "application.yaml")]
    pub application: PathBuf,

    /// Directory charts are downloaded to (default: <workdir>/.chart)
    #[arg(long, env = "ARGOTMPL_CHART_DIR")]
    pub chart_dir: Option<PathBuf>,

    /// Directory git chart repositories are cloned into (default: <workdir>/.chart_repo)
    #[arg(long, env = "ARGOTMPL_REPO_CACHE_DIR")]
    pub repo_cache_dir: Option<PathBuf>,

    /// Decode Secret data into .manifest.secrets.yaml
    #[arg(long)]
    pub secrets: bool,

    /// Map a ref source to a local directory (NAME=PATH, repeatable)
    #[arg(long = "ref-map", value_name = "NAME=PATH")]
    pub ref_map: Vec<String>,

    /// Extra arguments for `helm template`
    #[arg(last = true, value_name = "HELM_ARGS")]
    pub helm_args: Vec<String>,
}

/// Global flags that feed the settings
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Settings file (default: <config dir>/argotmpl/config.yaml)
    #[arg(long, global = true, env = "ARGOTMPL_CONFIG")]
    pub config: Option<PathBuf>,

    /// helm executable
    #[arg(long, global = true, env = "ARGOTMPL_HELM_BINARY")]
    pub helm_binary: Option<PathBuf>,

    /// git executable
    #[arg(long, global = true, env = "ARGOTMPL_GIT_BINARY")]
    pub git_binary: Option<PathBuf>,

    /// Seconds to wait for a cache lock held by another run
    #[arg(long, global = true, env = "ARGOTMPL_LOCK_TIMEOUT", value_name = "SECONDS")]
    pub lock_timeout: Option<u64>,
}

/// Everything a command needs, built from flags and settings
pub struct Workspace {
    pub workdir: PathBuf,
    pub pipeline: RenderPipeline,
    pub job: RenderJob,
}

impl Workspace {
    pub fn prepare(global: &GlobalArgs, common: &CommonArgs) -> Result<Self> {
        let settings = Settings::load(global.config.as_deref())?.with_overrides(&Overrides {
            helm_binary: global.helm_binary.clone(),
            git_binary: global.git_binary.clone(),
            chart_dir: common.chart_dir.clone(),
            repo_cache_dir: common.repo_cache_dir.clone(),
            lock_timeout_secs: global.lock_timeout,
        });

        let workdir = resolve_workdir(common.workdir.as_deref())?;
        tracing::debug!("Working directory: {}", workdir.display());

        let cache = ChartCache::new(
            settings.chart_dir_in(&workdir),
            settings.repo_cache_dir_in(&workdir),
        )
        .with_lock_timeout(settings.lock_timeout());

        let helm = Arc::new(HelmCli::new(&settings.helm_binary));
        let vcs: Arc<dyn VcsClient> = Arc::new(GitCli::new(&settings.git_binary));
        let resolver = ChartResolver::new(cache, helm.clone(), vcs.clone());

        let job = RenderJob {
            descriptor: workdir.join(&common.application),
            workdir: workdir.clone(),
            output_dir: workdir.clone(),
            ref_overrides: parse_ref_maps(&common.ref_map)?,
            git_root: None,
            extra_args: common.helm_args.clone(),
            decode_secrets: common.secrets,
        };

        Ok(Self {
            workdir,
            pipeline: RenderPipeline::new(resolver, helm, vcs),
            job,
        })
    }
}

fn resolve_workdir(workdir: Option<&Path>) -> Result<PathBuf> {
    let dir = match workdir {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir()?,
    };
    std::fs::canonicalize(&dir).map_err(|e| CliError::Io {
        message: format!("Working directory {} is not accessible: {}", dir.display(), e),
        help: None,
    })
}

/// Parse repeated `--ref-map NAME=PATH` flags
pub fn parse_ref_maps(entries: &[String]) -> Result<IndexMap<String, PathBuf>> {
    let mut mapping = IndexMap::new();
    for entry in entries {
        let parsed = entry
            .split_once('=')
            .map(|(name, path)| (name.trim(), path.trim()))
            .filter(|(name, path)| !name.is_empty() && !path.is_empty());

        let Some((name, path)) = parsed else {
            return Err(CliError::usage(
                format!("Invalid --ref-map '{}'", entry),
                "expected NAME=PATH, e.g. --ref-map values=../config",
            ));
        };
        mapping.insert(name.to_string(), PathBuf::from(path));
    }
    Ok(mapping)
}
