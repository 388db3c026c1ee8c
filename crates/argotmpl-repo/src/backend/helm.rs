//! `helm` subprocess backend

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{command_line, run_tool, stderr_of};
use crate::capability::{ChartRenderer, OciReference, PackageRepoClient, TemplateOutput};
use crate::error::{RepoError, Result};

/// Drives the `helm` binary
#[derive(Debug, Clone)]
pub struct HelmCli {
    binary: PathBuf,
}

impl HelmCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    async fn pull_ref(&self, chart_ref: &str, version: &str, dest: &Path) -> Result<()> {
        let dest_arg = dest.display().to_string();
        let args = [
            "pull",
            chart_ref,
            "--version",
            version,
            "--untar",
            "--destination",
            dest_arg.as_str(),
        ];

        let output = run_tool(&self.binary, args, None).await?;
        if !output.status.success() {
            return Err(RepoError::fetch_failed(
                format!("chart {}@{}", chart_ref, version),
                stderr_of(&output),
            ));
        }
        Ok(())
    }
}

impl Default for HelmCli {
    fn default() -> Self {
        Self::new("helm")
    }
}

#[async_trait]
impl PackageRepoClient for HelmCli {
    async fn add_or_update_repo(&self, alias: &str, url: &str) -> Result<()> {
        tracing::info!("Adding Helm repository {} ({})", alias, url);
        let output = run_tool(&self.binary, ["repo", "add", "--force-update", alias, url], None).await?;
        if !output.status.success() {
            return Err(RepoError::fetch_failed(
                format!("repository {}", url),
                stderr_of(&output),
            ));
        }

        let output = run_tool(&self.binary, ["repo", "update", alias], None).await?;
        if !output.status.success() {
            return Err(RepoError::fetch_failed(
                format!("index of repository {}", url),
                stderr_of(&output),
            ));
        }
        Ok(())
    }

    async fn pull(&self, alias: &str, chart: &str, revision: &str, dest: &Path) -> Result<()> {
        tracing::info!("Downloading chart {}:{}", chart, revision);
        self.pull_ref(&format!("{}/{}", alias, chart), revision, dest).await
    }

    async fn pull_oci(&self, reference: &OciReference, dest: &Path) -> Result<()> {
        tracing::info!("Downloading chart {}", reference);
        self.pull_ref(&reference.chart_ref(), &reference.tag, dest).await
    }
}

#[async_trait]
impl ChartRenderer for HelmCli {
    async fn template(&self, chart: &Path, args: &[String]) -> Result<TemplateOutput> {
        let mut full: Vec<String> = Vec::with_capacity(args.len() + 2);
        full.push("template".to_string());
        full.extend(args.iter().cloned());
        full.push(chart.display().to_string());

        let output = run_tool(&self.binary, &full, None).await?;
        let result = TemplateOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code(),
        };

        if !result.success() {
            tracing::debug!(
                "`{}` exited with {:?}",
                command_line(&self.binary, &full),
                result.status
            );
        }
        Ok(result)
    }
}
