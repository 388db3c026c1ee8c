//! Diff of the rendered manifest against a git ref
//!
//! A [`DiffSession`] renders the application twice: once from the files as
//! they were at `base_ref`, staged under `<workdir>/.diff/`, and once from the
//! working tree. The two manifests are then compared resource by resource and
//! handed to the external diff viewer.
//!
//! Stages run in order and the session stops at the first failing one. Both
//! renders must succeed before anything is presented.

use argotmpl_core::DEFAULT_VALUES_FILE;
use indexmap::IndexMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::diff::{DiffEngine, DiffResult};
use crate::error::{EngineError, Result};
use crate::normalize::sort_keys_in_file;
use crate::pipeline::{RenderJob, RenderPipeline};

/// Directory under the workdir holding the base files and manifest
pub const DIFF_DIR: &str = ".diff";

/// Default base ref
pub const DEFAULT_BASE_REF: &str = "HEAD";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffStage {
    Validate,
    DetectChanges,
    ExtractBase,
    RenderBase,
    RenderWorking,
    Normalize,
    Present,
}

impl fmt::Display for DiffStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiffStage::Validate => "validate",
            DiffStage::DetectChanges => "detect-changes",
            DiffStage::ExtractBase => "extract-base",
            DiffStage::RenderBase => "render-base",
            DiffStage::RenderWorking => "render-working",
            DiffStage::Normalize => "normalize",
            DiffStage::Present => "present",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Completed,
    Failed { stage: DiffStage, reason: String },
}

/// Inputs shared by every stage
pub struct DiffContext {
    pub pipeline: RenderPipeline,
    /// Render of the working tree; its workdir is the diff workdir
    pub job: RenderJob,
}

/// Outcome of a completed session
#[derive(Debug, Clone)]
pub struct DiffReport {
    /// Source files that differ from the base ref
    pub changed_sources: Vec<PathBuf>,
    /// Change detection ran and found nothing
    pub no_source_changes: bool,
    pub resources: DiffResult,
    pub summary: String,
    pub base_manifest: PathBuf,
    pub working_manifest: PathBuf,
}

/// One `diff` invocation
#[derive(Debug, Clone)]
pub struct DiffSession {
    pub base_ref: String,
    pub sort_keys: bool,
    stage: DiffStage,
    state: SessionState,
    base_manifest: Option<PathBuf>,
    working_manifest: Option<PathBuf>,
}

impl DiffSession {
    pub fn new(base_ref: impl Into<String>) -> Self {
        Self {
            base_ref: base_ref.into(),
            sort_keys: false,
            stage: DiffStage::Validate,
            state: SessionState::Running,
            base_manifest: None,
            working_manifest: None,
        }
    }

    pub fn with_sort_keys(mut self, sort_keys: bool) -> Self {
        self.sort_keys = sort_keys;
        self
    }

    pub fn stage(&self) -> DiffStage {
        self.stage
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn base_manifest(&self) -> Option<&Path> {
        self.base_manifest.as_deref()
    }

    pub fn working_manifest(&self) -> Option<&Path> {
        self.working_manifest.as_deref()
    }

    /// Run every stage, recording the terminal state
    pub async fn run(&mut self, ctx: &DiffContext) -> Result<DiffReport> {
        self.state = SessionState::Running;
        match self.run_stages(ctx).await {
            Ok(report) => {
                self.state = SessionState::Completed;
                Ok(report)
            }
            Err(e) => {
                tracing::debug!("Diff failed during {}: {}", self.stage, e);
                self.state = SessionState::Failed {
                    stage: self.stage,
                    reason: e.to_string(),
                };
                Err(e)
            }
        }
    }

    fn enter(&mut self, stage: DiffStage) {
        tracing::info!("Diff stage: {}", stage);
        self.stage = stage;
    }

    async fn run_stages(&mut self, ctx: &DiffContext) -> Result<DiffReport> {
        let workdir = ctx.job.workdir.as_path();

        self.enter(DiffStage::Validate);
        let root = self.validate(ctx).await?;

        self.enter(DiffStage::DetectChanges);
        let changed_sources = self.detect_changes(ctx, &root).await;

        self.enter(DiffStage::ExtractBase);
        let base_job = self.extract_base(ctx, &root).await?;

        self.enter(DiffStage::RenderBase);
        let base = ctx.pipeline.run(&base_job).await?;
        self.base_manifest = Some(base.manifest_file.clone());

        self.enter(DiffStage::RenderWorking);
        let working = ctx.pipeline.run(&ctx.job).await?;
        self.working_manifest = Some(working.manifest_file.clone());

        self.enter(DiffStage::Normalize);
        if self.sort_keys {
            sort_keys_in_file(&base.manifest_file)?;
            sort_keys_in_file(&working.manifest_file)?;
        }

        self.enter(DiffStage::Present);
        let base_text = tokio::fs::read_to_string(&base.manifest_file).await?;
        let working_text = tokio::fs::read_to_string(&working.manifest_file).await?;

        let engine = DiffEngine::new();
        let resources = engine.diff_manifests(&base_text, &working_text);
        let summary = engine.summary(&resources);
        tracing::info!("{}: {}", workdir.display(), summary);

        ctx.pipeline
            .vcs()
            .diff_view(&base.manifest_file, &working.manifest_file)
            .await?;

        Ok(DiffReport {
            no_source_changes: changed_sources.as_ref().is_some_and(Vec::is_empty),
            changed_sources: changed_sources.unwrap_or_default(),
            resources,
            summary,
            base_manifest: base.manifest_file,
            working_manifest: working.manifest_file,
        })
    }

    /// Git top-level of the workdir
    async fn validate(&self, ctx: &DiffContext) -> Result<PathBuf> {
        let workdir = &ctx.job.workdir;
        let not_a_repo = || EngineError::NotAGitRepo {
            path: workdir.display().to_string(),
        };

        let vcs = ctx.pipeline.vcs();
        if !vcs.is_repo(workdir).await {
            return Err(not_a_repo());
        }
        vcs.toplevel(workdir).await.map_err(|_| not_a_repo())
    }

    /// Source files changed since the base ref; `None` when the check failed
    async fn detect_changes(&self, ctx: &DiffContext, root: &Path) -> Option<Vec<PathBuf>> {
        let mut paths = Vec::new();
        if let Ok(rel) = ctx.job.descriptor.strip_prefix(root) {
            paths.push(rel.to_path_buf());
        }

        match ctx.pipeline.plan(&ctx.job).await {
            Ok((_, values)) => paths.extend(values.relative_to(root)),
            Err(e) => tracing::debug!("Values files unknown for change detection: {}", e),
        }

        let default_values = ctx.job.descriptor_dir().join(DEFAULT_VALUES_FILE);
        if let Ok(rel) = default_values.strip_prefix(root) {
            if !paths.iter().any(|p| p == rel) {
                paths.push(rel.to_path_buf());
            }
        }

        match ctx
            .pipeline
            .vcs()
            .changed_files(root, &self.base_ref, &paths)
            .await
        {
            Ok(changed) => {
                if changed.is_empty() {
                    tracing::info!("No source changes against {}", self.base_ref);
                }
                Some(changed)
            }
            Err(e) => {
                tracing::warn!("Could not check for source changes: {}", e);
                None
            }
        }
    }

    /// Stage the descriptor and its values files as of the base ref
    ///
    /// Returns the job rendering the staged copy.
    async fn extract_base(&self, ctx: &DiffContext, root: &Path) -> Result<RenderJob> {
        let job = &ctx.job;
        let staging_root = job.workdir.join(DIFF_DIR);

        if staging_root.exists() {
            tokio::fs::remove_dir_all(&staging_root)
                .await
                .map_err(|e| EngineError::staging(DIFF_DIR, &self.base_ref, e))?;
        }
        tokio::fs::create_dir_all(&staging_root)
            .await
            .map_err(|e| EngineError::staging(DIFF_DIR, &self.base_ref, e))?;

        let descriptor_rel = job.descriptor.strip_prefix(root).map_err(|_| {
            EngineError::staging(
                job.descriptor.display().to_string(),
                &self.base_ref,
                format!("not inside the repository at {}", root.display()),
            )
        })?;
        let descriptor = self.stage_file(ctx, root, &staging_root, descriptor_rel).await?;

        let workdir = match job.workdir.strip_prefix(root) {
            Ok(rel) => staging_root.join(rel),
            Err(_) => staging_root.clone(),
        };

        // Overrides inside the repository follow it into the staging root
        let ref_overrides: IndexMap<String, PathBuf> = job
            .ref_overrides
            .iter()
            .map(|(name, path)| {
                let absolute = if path.is_absolute() {
                    path.clone()
                } else {
                    job.workdir.join(path)
                };
                let moved = match absolute.strip_prefix(root) {
                    Ok(rel) => staging_root.join(rel),
                    Err(_) => absolute,
                };
                (name.clone(), moved)
            })
            .collect();

        let base_job = RenderJob {
            descriptor,
            workdir,
            output_dir: staging_root.clone(),
            ref_overrides,
            git_root: Some(staging_root.clone()),
            extra_args: job.extra_args.clone(),
            decode_secrets: job.decode_secrets,
        };

        let base_app = argotmpl_core::Application::load(&base_job.descriptor)?;
        if base_app.value_files().is_empty() {
            if let Ok(rel) = job.descriptor_dir().join(DEFAULT_VALUES_FILE).strip_prefix(root) {
                if let Err(e) = self.stage_file(ctx, root, &staging_root, rel).await {
                    tracing::debug!("No default values file at {}: {}", self.base_ref, e);
                }
            }
            return Ok(base_job);
        }

        let (_, values) = ctx.pipeline.plan(&base_job).await?;
        for rel in values.relative_to(&staging_root) {
            self.stage_file(ctx, root, &staging_root, &rel).await?;
        }

        Ok(base_job)
    }

    async fn stage_file(
        &self,
        ctx: &DiffContext,
        root: &Path,
        staging_root: &Path,
        rel: &Path,
    ) -> Result<PathBuf> {
        let file = rel.display().to_string();
        let content = ctx
            .pipeline
            .vcs()
            .show_file_at(root, &self.base_ref, rel)
            .await
            .map_err(|e| EngineError::staging(&file, &self.base_ref, e))?;

        let dest = staging_root.join(rel);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::staging(&file, &self.base_ref, e))?;
        }
        tokio::fs::write(&dest, content)
            .await
            .map_err(|e| EngineError::staging(&file, &self.base_ref, e))?;

        tracing::debug!("Staged {} as of {}", file, self.base_ref);
        Ok(dest)
    }
}

impl Default for DiffSession {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_REF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::MANIFEST_FILE;
    use argotmpl_repo::backend::mock::{MockPackageRepo, MockRenderer, MockVcs};
    use argotmpl_repo::{ChartCache, ChartResolver, VcsClient};
    use std::sync::Arc;
    use tempfile::TempDir;

    const APP: &str = r#"apiVersion: argoproj.io/v1alpha1
kind: Application
metadata:
  name: demo
spec:
  source:
    repoURL: https://example.test/charts
    chart: demo
    targetRevision: 1.0.0
    helm:
      valueFiles:
        - values.yaml
"#;

    const REF_APP: &str = r#"apiVersion: argoproj.io/v1alpha1
kind: Application
metadata:
  name: demo
spec:
  sources:
    - repoURL: https://example.test/charts
      chart: demo
      targetRevision: 1.0.0
      helm:
        valueFiles:
          - $values/envs/prod.yaml
    - repoURL: https://git.example.test/config.git
      ref: values
"#;

    const VALUES: &str = "kind: ConfigMap\nmetadata:\n  name: demo\ndata:\n  replicas: \"1\"\n";

    const UNSORTED_VALUES: &str = "metadata:\n  name: demo\nkind: ConfigMap\ndata:\n  replicas: \"1\"\n";

    struct Fixture {
        tmp: TempDir,
        vcs: MockVcs,
        renderer: MockRenderer,
    }

    impl Fixture {
        /// Work tree at the temp dir with `files` both committed at HEAD and on disk
        fn new(files: &[(&str, &str)]) -> Self {
            let tmp = TempDir::new().unwrap();
            let mut vcs = MockVcs::new().with_worktree(tmp.path());
            for (rel, content) in files {
                vcs = vcs.with_file_at("HEAD", *rel, content);
                let path = tmp.path().join(rel);
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(path, content).unwrap();
            }
            Self {
                tmp,
                vcs,
                renderer: MockRenderer::echo_values(),
            }
        }

        fn root(&self) -> &Path {
            self.tmp.path()
        }

        fn context(&self, vcs: MockVcs) -> DiffContext {
            let cache = ChartCache::new(self.root().join(".chart"), self.root().join(".chart_repo"));
            let vcs: Arc<dyn VcsClient> = Arc::new(vcs);
            let resolver = ChartResolver::new(cache, Arc::new(MockPackageRepo::new()), vcs.clone());
            DiffContext {
                pipeline: RenderPipeline::new(resolver, Arc::new(self.renderer.clone()), vcs),
                job: RenderJob {
                    descriptor: self.root().join("application.yaml"),
                    workdir: self.root().to_path_buf(),
                    output_dir: self.root().to_path_buf(),
                    ..Default::default()
                },
            }
        }
    }

    #[tokio::test]
    async fn test_identical_files_empty_diff() {
        let fx = Fixture::new(&[("application.yaml", APP), ("values.yaml", VALUES)]);
        let ctx = fx.context(fx.vcs.clone());
        let mut session = DiffSession::default();

        let report = session.run(&ctx).await.unwrap();

        assert_eq!(session.state(), &SessionState::Completed);
        assert!(!report.resources.has_changes());
        assert_eq!(report.summary, "No changes");
        assert!(report.no_source_changes);

        let base = fx.root().join(DIFF_DIR).join(MANIFEST_FILE);
        let working = fx.root().join(MANIFEST_FILE);
        assert_eq!(report.base_manifest, base);
        assert_eq!(report.working_manifest, working);
        assert_eq!(fx.vcs.diff_views(), vec![(base, working)]);
        assert!(fx.root().join(DIFF_DIR).join("values.yaml").is_file());
    }

    #[tokio::test]
    async fn test_changed_values_show_up() {
        let fx = Fixture::new(&[("application.yaml", APP), ("values.yaml", VALUES)]);
        std::fs::write(fx.root().join("values.yaml"), VALUES.replace("\"1\"", "\"3\"")).unwrap();
        let vcs = fx.vcs.clone().with_changed_files(&["values.yaml"]);
        let ctx = fx.context(vcs);
        let mut session = DiffSession::new("HEAD");

        let report = session.run(&ctx).await.unwrap();

        assert_eq!(report.changed_sources, vec![PathBuf::from("values.yaml")]);
        assert!(!report.no_source_changes);
        assert_eq!(report.summary, "1 modified");
    }

    #[tokio::test]
    async fn test_failed_change_check_is_advisory() {
        let fx = Fixture::new(&[("application.yaml", APP), ("values.yaml", VALUES)]);
        let ctx = fx.context(fx.vcs.clone().failing_changes());
        let mut session = DiffSession::default();

        let report = session.run(&ctx).await.unwrap();
        assert!(!report.no_source_changes);
        assert!(report.changed_sources.is_empty());
        assert_eq!(session.state(), &SessionState::Completed);
    }

    #[tokio::test]
    async fn test_sorted_manifests() {
        let fx = Fixture::new(&[("application.yaml", APP), ("values.yaml", UNSORTED_VALUES)]);
        let ctx = fx.context(fx.vcs.clone());
        let mut session = DiffSession::default().with_sort_keys(true);

        let report = session.run(&ctx).await.unwrap();
        assert!(!report.resources.has_changes());

        let working = std::fs::read_to_string(&report.working_manifest).unwrap();
        assert!(working.starts_with("data:"));
    }

    #[tokio::test]
    async fn test_ref_values_are_staged() {
        let fx = Fixture::new(&[
            ("apps/demo/application.yaml", REF_APP),
            ("envs/prod.yaml", VALUES),
        ]);
        let mut ctx = fx.context(fx.vcs.clone());
        ctx.job.descriptor = fx.root().join("apps/demo/application.yaml");
        let mut session = DiffSession::default();

        let report = session.run(&ctx).await.unwrap();

        assert!(!report.resources.has_changes());
        assert!(fx.root().join(DIFF_DIR).join("envs/prod.yaml").is_file());
        assert!(fx.root().join(DIFF_DIR).join("apps/demo/application.yaml").is_file());

        // the base render read the staged copy
        let calls = fx.renderer.calls();
        let staged = fx.root().join(DIFF_DIR).join("envs/prod.yaml").display().to_string();
        assert!(calls[0].args.contains(&staged));
    }

    #[tokio::test]
    async fn test_not_a_git_repo() {
        let fx = Fixture::new(&[("application.yaml", APP)]);
        let ctx = fx.context(MockVcs::new());
        let mut session = DiffSession::default();

        let err = session.run(&ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::NotAGitRepo { .. }));
        assert!(matches!(
            session.state(),
            SessionState::Failed { stage: DiffStage::Validate, .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_base_file_fails_staging() {
        let fx = Fixture::new(&[("values.yaml", VALUES)]);
        std::fs::write(fx.root().join("application.yaml"), APP).unwrap();
        let ctx = fx.context(fx.vcs.clone());
        let mut session = DiffSession::new("main");

        let err = session.run(&ctx).await.unwrap_err();
        match err {
            EngineError::DiffStagingFailed { file, git_ref, .. } => {
                assert_eq!(file, "application.yaml");
                assert_eq!(git_ref, "main");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(session.stage(), DiffStage::ExtractBase);
        assert!(fx.renderer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_render_failure_presents_nothing() {
        let mut fx = Fixture::new(&[("application.yaml", APP), ("values.yaml", VALUES)]);
        fx.renderer = MockRenderer::failing(1, "Error: parse error in deployment.yaml");
        let ctx = fx.context(fx.vcs.clone());
        let mut session = DiffSession::default();

        let err = session.run(&ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::RenderFailed { .. }));
        assert!(matches!(
            session.state(),
            SessionState::Failed { stage: DiffStage::RenderBase, .. }
        ));
        assert!(fx.vcs.diff_views().is_empty());
        assert!(session.working_manifest().is_none());
    }
}
