//! `git` subprocess backend

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{command_line, run_tool, stderr_of};
use crate::capability::VcsClient;
use crate::error::{RepoError, Result};

/// Pseudo-ref naming the index instead of a commit
pub const INDEX_REF: &str = "--cached";

/// Drives the `git` binary
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: PathBuf,
}

impl GitCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Run `git -C dir args...`, failing on a nonzero exit
    async fn git_in(&self, dir: &Path, args: &[&str]) -> Result<Vec<u8>> {
        let mut full = vec!["-C".to_string(), dir.display().to_string()];
        full.extend(args.iter().map(|a| a.to_string()));

        let output = run_tool(&self.binary, &full, None).await?;
        if !output.status.success() {
            return Err(RepoError::CommandFailed {
                command: command_line(&self.binary, &full),
                stderr: stderr_of(&output),
            });
        }
        Ok(output.stdout)
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

/// `<ref>:<path>` object name for `git show`
fn object_name(git_ref: &str, path: &Path) -> String {
    let path = path.to_string_lossy().replace('\\', "/");
    if git_ref == INDEX_REF {
        format!(":{}", path)
    } else {
        format!("{}:{}", git_ref, path)
    }
}

/// `git diff --name-only` arguments comparing the work tree with `base_ref`
///
/// For the index, a plain `git diff` already compares the work tree with it;
/// `--cached` would compare the index with `HEAD` instead.
fn changed_files_args(base_ref: &str, paths: &[PathBuf]) -> Vec<String> {
    let mut args = vec!["diff".to_string(), "--name-only".to_string()];
    if base_ref != INDEX_REF {
        args.push(base_ref.to_string());
    }
    args.push("--".to_string());
    args.extend(paths.iter().map(|p| p.display().to_string()));
    args
}

#[async_trait]
impl VcsClient for GitCli {
    async fn is_repo(&self, path: &Path) -> bool {
        match self.git_in(path, &["rev-parse", "--is-inside-work-tree"]).await {
            Ok(stdout) => String::from_utf8_lossy(&stdout).trim() == "true",
            Err(e) => {
                tracing::debug!("{} is not a git work tree: {}", path.display(), e);
                false
            }
        }
    }

    async fn toplevel(&self, path: &Path) -> Result<PathBuf> {
        let stdout = self.git_in(path, &["rev-parse", "--show-toplevel"]).await?;
        Ok(PathBuf::from(String::from_utf8_lossy(&stdout).trim()))
    }

    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        tracing::info!("Cloning {}", url);
        let dest_arg = dest.display().to_string();
        let output = run_tool(&self.binary, ["clone", "--quiet", url, dest_arg.as_str()], None).await?;
        if !output.status.success() {
            return Err(RepoError::fetch_failed(
                format!("git repository {}", url),
                stderr_of(&output),
            ));
        }
        Ok(())
    }

    async fn checkout(&self, dir: &Path, revision: &str) -> Result<bool> {
        match self.git_in(dir, &["checkout", "--quiet", revision]).await {
            Ok(_) => Ok(true),
            Err(RepoError::CommandFailed { stderr, .. }) => {
                tracing::debug!("Checkout of {} failed: {}", revision, stderr);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch(&self, dir: &Path) -> Result<()> {
        tracing::info!("Fetching updates in {}", dir.display());
        self.git_in(dir, &["fetch", "--quiet", "--all", "--tags"])
            .await
            .map(|_| ())
            .map_err(|e| match e {
                RepoError::CommandFailed { stderr, .. } => {
                    RepoError::fetch_failed(format!("updates for {}", dir.display()), stderr)
                }
                other => other,
            })
    }

    async fn changed_files(
        &self,
        dir: &Path,
        base_ref: &str,
        paths: &[PathBuf],
    ) -> Result<Vec<PathBuf>> {
        let args = changed_files_args(base_ref, paths);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        let stdout = self.git_in(dir, &args).await?;
        Ok(String::from_utf8_lossy(&stdout)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(PathBuf::from)
            .collect())
    }

    async fn show_file_at(&self, dir: &Path, git_ref: &str, path: &Path) -> Result<Vec<u8>> {
        let object = object_name(git_ref, path);
        self.git_in(dir, &["show", object.as_str()]).await
    }

    async fn diff_view(&self, base: &Path, working: &Path) -> Result<()> {
        let args = [
            "diff".to_string(),
            "--no-index".to_string(),
            base.display().to_string(),
            working.display().to_string(),
        ];
        tracing::debug!("Running: {}", command_line(&self.binary, &args));

        // Output goes straight to the terminal so the pager and colors work
        let status = tokio::process::Command::new(&self.binary)
            .args(&args)
            .status()
            .await
            .map_err(|source| RepoError::Spawn {
                program: self.binary.display().to_string(),
                source,
            })?;

        // 1 means "files differ"
        match status.code() {
            Some(0) | Some(1) => Ok(()),
            _ => Err(RepoError::CommandFailed {
                command: command_line(&self.binary, &args),
                stderr: format!("exited with {}", status),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_name() {
        assert_eq!(object_name("HEAD", Path::new("apps/demo/values.yaml")), "HEAD:apps/demo/values.yaml");
        assert_eq!(object_name("origin/main", Path::new("application.yaml")), "origin/main:application.yaml");
        assert_eq!(object_name(INDEX_REF, Path::new("application.yaml")), ":application.yaml");
    }

    #[test]
    fn test_changed_files_args() {
        let paths = vec![PathBuf::from("application.yaml"), PathBuf::from("values.yaml")];
        assert_eq!(
            changed_files_args("origin/main", &paths),
            ["diff", "--name-only", "origin/main", "--", "application.yaml", "values.yaml"]
        );
        assert_eq!(
            changed_files_args(INDEX_REF, &paths),
            ["diff", "--name-only", "--", "application.yaml", "values.yaml"]
        );
    }

    /// Runs `git` in `dir`; `None` when no git binary is installed
    fn git(dir: &Path, args: &[&str]) -> Option<()> {
        let status = std::process::Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(["-c", "user.name=argotmpl", "-c", "user.email=argotmpl@example.test"])
            .args(args)
            .status()
            .ok()?;
        assert!(status.success(), "git {:?} failed", args);
        Some(())
    }

    #[tokio::test]
    async fn test_unstaged_edit_shows_up_against_index() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        if git(root, &["init", "--quiet"]).is_none() {
            return;
        }
        std::fs::write(root.join("values.yaml"), "a: 1\n").unwrap();
        git(root, &["add", "values.yaml"]);
        git(root, &["commit", "--quiet", "-m", "values"]);
        std::fs::write(root.join("values.yaml"), "a: 2\n").unwrap();

        let cli = GitCli::default();
        let paths = [PathBuf::from("values.yaml")];

        let against_index = cli.changed_files(root, INDEX_REF, &paths).await.unwrap();
        assert_eq!(against_index, vec![PathBuf::from("values.yaml")]);

        let index = cli.show_file_at(root, INDEX_REF, Path::new("values.yaml")).await.unwrap();
        assert_eq!(index, b"a: 1\n");

        git(root, &["add", "values.yaml"]);
        assert!(cli.changed_files(root, INDEX_REF, &paths).await.unwrap().is_empty());
        assert_eq!(
            cli.changed_files(root, "HEAD", &paths).await.unwrap(),
            vec![PathBuf::from("values.yaml")]
        );
    }

    #[tokio::test]
    async fn test_is_repo_false_when_git_missing() {
        let git = GitCli::new("/nonexistent/git");
        assert!(!git.is_repo(Path::new("/")).await);
    }

    #[tokio::test]
    async fn test_toplevel_reports_spawn_error() {
        let git = GitCli::new("/nonexistent/git");
        let err = git.toplevel(Path::new("/")).await.unwrap_err();
        assert!(matches!(err, RepoError::Spawn { .. }));
    }
}
