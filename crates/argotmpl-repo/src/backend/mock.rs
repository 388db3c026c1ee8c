//! Mock backends for testing
//!
//! These keep their state in memory and only touch the filesystem where the
//! caller expects files to appear (pulled charts, cloned work trees).

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use crate::capability::{ChartRenderer, OciReference, PackageRepoClient, TemplateOutput, VcsClient};
use crate::error::{RepoError, Result};

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub repo_adds: usize,
    pub pulls: usize,
    pub oci_pulls: usize,
    pub clones: usize,
    pub checkouts: usize,
    pub fetches: usize,
    pub change_checks: usize,
    pub file_reads: usize,
    pub diff_views: usize,
    pub renders: usize,
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn write_files(root: &Path, files: &BTreeMap<String, String>) -> Result<()> {
    for (rel, content) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
    }
    Ok(())
}

// ============ Package repositories ============

/// Recorded call on a [`MockPackageRepo`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageCall {
    AddRepo {
        alias: String,
        url: String,
    },
    Pull {
        alias: String,
        chart: String,
        revision: String,
        dest: PathBuf,
    },
    PullOci {
        reference: OciReference,
        dest: PathBuf,
    },
}

/// In-memory Helm repository; every pull produces a minimal chart at the requested version
#[derive(Clone, Default)]
pub struct MockPackageRepo {
    calls: Arc<RwLock<Vec<PackageCall>>>,
    operations: Arc<RwLock<OperationCounts>>,
    failure: Arc<RwLock<Option<String>>>,
}

impl MockPackageRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every pull fail with `stderr`
    pub fn failing(stderr: impl Into<String>) -> Self {
        let repo = Self::new();
        *write(&repo.failure) = Some(stderr.into());
        repo
    }

    pub fn calls(&self) -> Vec<PackageCall> {
        read(&self.calls).clone()
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        read(&self.operations).clone()
    }

    fn unpack(&self, chart: &str, revision: &str, dest: &Path) -> Result<()> {
        if let Some(stderr) = read(&self.failure).clone() {
            return Err(RepoError::fetch_failed(format!("chart {}@{}", chart, revision), stderr));
        }

        let mut files = BTreeMap::new();
        files.insert(
            "Chart.yaml".to_string(),
            format!("apiVersion: v2\nname: {}\nversion: {}\n", chart, revision),
        );
        files.insert(
            "templates/configmap.yaml".to_string(),
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {{ .Release.Name }}\n".to_string(),
        );
        write_files(&dest.join(chart), &files)
    }
}

#[async_trait]
impl PackageRepoClient for MockPackageRepo {
    async fn add_or_update_repo(&self, alias: &str, url: &str) -> Result<()> {
        write(&self.operations).repo_adds += 1;
        write(&self.calls).push(PackageCall::AddRepo {
            alias: alias.to_string(),
            url: url.to_string(),
        });
        Ok(())
    }

    async fn pull(&self, alias: &str, chart: &str, revision: &str, dest: &Path) -> Result<()> {
        write(&self.operations).pulls += 1;
        write(&self.calls).push(PackageCall::Pull {
            alias: alias.to_string(),
            chart: chart.to_string(),
            revision: revision.to_string(),
            dest: dest.to_path_buf(),
        });
        self.unpack(chart, revision, dest)
    }

    async fn pull_oci(&self, reference: &OciReference, dest: &Path) -> Result<()> {
        write(&self.operations).oci_pulls += 1;
        write(&self.calls).push(PackageCall::PullOci {
            reference: reference.clone(),
            dest: dest.to_path_buf(),
        });
        self.unpack(&reference.chart, &reference.tag, dest)
    }
}

// ============ Version control ============

/// A remote repository known to [`MockVcs`]
#[derive(Debug, Clone, Default)]
pub struct MockRemote {
    /// revision -> (files, only visible after a fetch)
    revisions: BTreeMap<String, (BTreeMap<String, String>, bool)>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Revision present right after cloning
    pub fn revision(mut self, name: &str, files: &[(&str, &str)]) -> Self {
        self.revisions.insert(name.to_string(), (to_files(files), false));
        self
    }

    /// Revision that only shows up after a fetch
    pub fn revision_after_fetch(mut self, name: &str, files: &[(&str, &str)]) -> Self {
        self.revisions.insert(name.to_string(), (to_files(files), true));
        self
    }
}

fn to_files(files: &[(&str, &str)]) -> BTreeMap<String, String> {
    files
        .iter()
        .map(|(path, content)| (path.to_string(), content.to_string()))
        .collect()
}

#[derive(Debug, Default)]
struct VcsState {
    remotes: HashMap<String, MockRemote>,
    /// clone dir -> (origin url, fetched)
    clones: HashMap<PathBuf, (String, bool)>,
    /// Work trees answering is_repo / toplevel / show_file_at
    worktrees: Vec<PathBuf>,
    /// (ref, path relative to the work tree) -> content
    history: HashMap<(String, PathBuf), Vec<u8>>,
    changed: Vec<PathBuf>,
    changes_fail: bool,
    diff_views: Vec<(PathBuf, PathBuf)>,
}

/// In-memory version control
#[derive(Clone, Default)]
pub struct MockVcs {
    state: Arc<RwLock<VcsState>>,
    operations: Arc<RwLock<OperationCounts>>,
}

impl MockVcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_remote(self, url: &str, remote: MockRemote) -> Self {
        write(&self.state).remotes.insert(url.to_string(), remote);
        self
    }

    /// Treat `root` as the top of a work tree
    pub fn with_worktree(self, root: impl Into<PathBuf>) -> Self {
        write(&self.state).worktrees.push(root.into());
        self
    }

    /// Content of `path` as of `git_ref`
    pub fn with_file_at(self, git_ref: &str, path: impl Into<PathBuf>, content: &str) -> Self {
        write(&self.state)
            .history
            .insert((git_ref.to_string(), path.into()), content.as_bytes().to_vec());
        self
    }

    pub fn with_changed_files(self, files: &[&str]) -> Self {
        write(&self.state).changed = files.iter().map(PathBuf::from).collect();
        self
    }

    /// Make the change check fail
    pub fn failing_changes(self) -> Self {
        write(&self.state).changes_fail = true;
        self
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        read(&self.operations).clone()
    }

    /// Pairs passed to `diff_view`
    pub fn diff_views(&self) -> Vec<(PathBuf, PathBuf)> {
        read(&self.state).diff_views.clone()
    }

    fn worktree_of(&self, path: &Path) -> Option<PathBuf> {
        read(&self.state)
            .worktrees
            .iter()
            .find(|root| path.starts_with(root))
            .cloned()
    }
}

#[async_trait]
impl VcsClient for MockVcs {
    async fn is_repo(&self, path: &Path) -> bool {
        self.worktree_of(path).is_some()
    }

    async fn toplevel(&self, path: &Path) -> Result<PathBuf> {
        self.worktree_of(path).ok_or_else(|| RepoError::CommandFailed {
            command: format!("git -C {} rev-parse --show-toplevel", path.display()),
            stderr: "fatal: not a git repository".to_string(),
        })
    }

    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        write(&self.operations).clones += 1;

        let mut state = write(&self.state);
        if !state.remotes.contains_key(url) {
            return Err(RepoError::fetch_failed(
                format!("git repository {}", url),
                format!("fatal: repository '{}' not found", url),
            ));
        }
        std::fs::create_dir_all(dest.join(".git"))?;
        state.clones.insert(dest.to_path_buf(), (url.to_string(), false));
        Ok(())
    }

    async fn checkout(&self, dir: &Path, revision: &str) -> Result<bool> {
        write(&self.operations).checkouts += 1;

        let mut state = write(&self.state);
        // Clones may have been moved since; match on the directory name
        let clone = state
            .clones
            .iter()
            .find(|(path, _)| path.file_name() == dir.file_name())
            .map(|(path, info)| (path.clone(), info.clone()));
        let Some((recorded, (url, fetched))) = clone else {
            return Err(RepoError::CommandFailed {
                command: format!("git -C {} checkout {}", dir.display(), revision),
                stderr: "fatal: not a git repository".to_string(),
            });
        };
        if recorded != dir {
            state.clones.remove(&recorded);
            state.clones.insert(dir.to_path_buf(), (url.clone(), fetched));
        }

        let files = match state.remotes.get(&url).and_then(|r| r.revisions.get(revision)) {
            Some((files, needs_fetch)) if !needs_fetch || fetched => files.clone(),
            _ => return Ok(false),
        };
        drop(state);

        write_files(dir, &files)?;
        Ok(true)
    }

    async fn fetch(&self, dir: &Path) -> Result<()> {
        write(&self.operations).fetches += 1;

        let mut state = write(&self.state);
        if let Some((_, fetched)) = state
            .clones
            .iter_mut()
            .find(|(path, _)| path.file_name() == dir.file_name())
            .map(|(_, info)| info)
        {
            *fetched = true;
        }
        Ok(())
    }

    async fn changed_files(
        &self,
        _dir: &Path,
        base_ref: &str,
        paths: &[PathBuf],
    ) -> Result<Vec<PathBuf>> {
        write(&self.operations).change_checks += 1;

        let state = read(&self.state);
        if state.changes_fail {
            return Err(RepoError::CommandFailed {
                command: format!("git diff --name-only {}", base_ref),
                stderr: format!("fatal: bad revision '{}'", base_ref),
            });
        }
        Ok(state
            .changed
            .iter()
            .filter(|changed| paths.iter().any(|p| p == *changed))
            .cloned()
            .collect())
    }

    async fn show_file_at(&self, _dir: &Path, git_ref: &str, path: &Path) -> Result<Vec<u8>> {
        write(&self.operations).file_reads += 1;

        read(&self.state)
            .history
            .get(&(git_ref.to_string(), path.to_path_buf()))
            .cloned()
            .ok_or_else(|| RepoError::CommandFailed {
                command: format!("git show {}:{}", git_ref, path.display()),
                stderr: format!(
                    "fatal: path '{}' does not exist in '{}'",
                    path.display(),
                    git_ref
                ),
            })
    }

    async fn diff_view(&self, base: &Path, working: &Path) -> Result<()> {
        write(&self.operations).diff_views += 1;
        write(&self.state)
            .diff_views
            .push((base.to_path_buf(), working.to_path_buf()));
        Ok(())
    }
}

// ============ Rendering ============

type RenderFn = dyn Fn(&Path, &[String]) -> TemplateOutput + Send + Sync;

/// Recorded `helm template` invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderCall {
    pub chart: PathBuf,
    pub args: Vec<String>,
}

/// Renderer answering from a closure
#[derive(Clone)]
pub struct MockRenderer {
    render: Arc<RenderFn>,
    calls: Arc<RwLock<Vec<RenderCall>>>,
    operations: Arc<RwLock<OperationCounts>>,
}

impl MockRenderer {
    pub fn from_fn(render: impl Fn(&Path, &[String]) -> TemplateOutput + Send + Sync + 'static) -> Self {
        Self {
            render: Arc::new(render),
            calls: Arc::new(RwLock::new(Vec::new())),
            operations: Arc::new(RwLock::new(OperationCounts::default())),
        }
    }

    /// Always print `stdout` and succeed
    pub fn fixed(stdout: impl Into<String>) -> Self {
        let stdout = stdout.into();
        Self::from_fn(move |_, _| TemplateOutput {
            stdout: stdout.clone(),
            stderr: String::new(),
            status: Some(0),
        })
    }

    /// Always exit with `status`
    pub fn failing(status: i32, stderr: impl Into<String>) -> Self {
        let stderr = stderr.into();
        Self::from_fn(move |_, _| TemplateOutput {
            stdout: String::new(),
            stderr: stderr.clone(),
            status: Some(status),
        })
    }

    /// Concatenate the values files passed with `-f`, one document each
    ///
    /// Handy when the rendered output must follow the values.
    pub fn echo_values() -> Self {
        Self::from_fn(|_, args| {
            let mut stdout = String::new();
            let mut iter = args.iter();
            while let Some(arg) = iter.next() {
                if arg == "-f" {
                    if let Some(file) = iter.next() {
                        stdout.push_str("---\n");
                        stdout.push_str(&std::fs::read_to_string(file).unwrap_or_default());
                        if !stdout.ends_with('\n') {
                            stdout.push('\n');
                        }
                    }
                }
            }
            TemplateOutput {
                stdout,
                stderr: String::new(),
                status: Some(0),
            }
        })
    }

    pub fn calls(&self) -> Vec<RenderCall> {
        read(&self.calls).clone()
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        read(&self.operations).clone()
    }
}

#[async_trait]
impl ChartRenderer for MockRenderer {
    async fn template(&self, chart: &Path, args: &[String]) -> Result<TemplateOutput> {
        write(&self.operations).renders += 1;
        write(&self.calls).push(RenderCall {
            chart: chart.to_path_buf(),
            args: args.to_vec(),
        });
        Ok((self.render)(chart, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_mock_package_pull_writes_chart() {
        let tmp = TempDir::new().unwrap();
        let repo = MockPackageRepo::new();

        repo.pull("alias", "demo", "1.0.0", tmp.path()).await.unwrap();

        let chart = std::fs::read_to_string(tmp.path().join("demo/Chart.yaml")).unwrap();
        assert!(chart.contains("version: 1.0.0"));
        assert_eq!(repo.operation_counts().pulls, 1);
        assert_eq!(
            repo.calls(),
            vec![PackageCall::Pull {
                alias: "alias".to_string(),
                chart: "demo".to_string(),
                revision: "1.0.0".to_string(),
                dest: tmp.path().to_path_buf(),
            }]
        );
    }

    #[tokio::test]
    async fn test_mock_package_failure() {
        let tmp = TempDir::new().unwrap();
        let repo = MockPackageRepo::failing("Error: chart \"demo\" version \"9.9.9\" not found");

        let err = repo.pull("alias", "demo", "9.9.9", tmp.path()).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_mock_vcs_lazy_revision() {
        let tmp = TempDir::new().unwrap();
        let url = "https://git.example.test/charts";
        let vcs = MockVcs::new().with_remote(
            url,
            MockRemote::new()
                .revision("main", &[("chart/Chart.yaml", "version: 1.0.0\n")])
                .revision_after_fetch("v2", &[("chart/Chart.yaml", "version: 2.0.0\n")]),
        );

        let dir = tmp.path().join("clone");
        vcs.clone_repo(url, &dir).await.unwrap();
        assert!(vcs.checkout(&dir, "main").await.unwrap());
        assert!(!vcs.checkout(&dir, "v2").await.unwrap());

        vcs.fetch(&dir).await.unwrap();
        assert!(vcs.checkout(&dir, "v2").await.unwrap());

        let chart = std::fs::read_to_string(dir.join("chart/Chart.yaml")).unwrap();
        assert_eq!(chart, "version: 2.0.0\n");
    }

    #[tokio::test]
    async fn test_mock_vcs_worktree() {
        let vcs = MockVcs::new()
            .with_worktree("/repo")
            .with_file_at("HEAD", "apps/demo/application.yaml", "kind: Application\n");

        assert!(vcs.is_repo(Path::new("/repo/apps/demo")).await);
        assert!(!vcs.is_repo(Path::new("/elsewhere")).await);
        assert_eq!(vcs.toplevel(Path::new("/repo/apps")).await.unwrap(), PathBuf::from("/repo"));

        let content = vcs
            .show_file_at(Path::new("/repo"), "HEAD", Path::new("apps/demo/application.yaml"))
            .await
            .unwrap();
        assert_eq!(content, b"kind: Application\n");
        assert!(vcs
            .show_file_at(Path::new("/repo"), "HEAD~1", Path::new("apps/demo/application.yaml"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_mock_renderer_echo_values() {
        let tmp = TempDir::new().unwrap();
        let values = tmp.path().join("values.yaml");
        std::fs::write(&values, "replicas: 2").unwrap();

        let renderer = MockRenderer::echo_values();
        let args = vec!["-f".to_string(), values.display().to_string()];
        let output = renderer.template(Path::new("/chart"), &args).await.unwrap();

        assert!(output.success());
        assert_eq!(output.stdout, "---\nreplicas: 2\n");
        assert_eq!(renderer.calls().len(), 1);
    }
}
