//! Descriptor to manifest: load, resolve, render, write

use argotmpl_core::{Application, RefMapping, SourceDescriptor, ValuesPlan};
use argotmpl_repo::{ChartRenderer, ChartResolver, VcsClient};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::render::{RenderOutput, RenderRequest, Renderer};

/// One render of one application descriptor
#[derive(Debug, Clone, Default)]
pub struct RenderJob {
    /// Application descriptor file
    pub descriptor: PathBuf,
    /// Directory relative `--ref-map` paths and the git root are taken from
    pub workdir: PathBuf,
    /// Where `.manifest.yaml` is written
    pub output_dir: PathBuf,
    pub ref_overrides: IndexMap<String, PathBuf>,
    /// Directory a single ref source maps to; looked up with git when unset
    pub git_root: Option<PathBuf>,
    pub extra_args: Vec<String>,
    pub decode_secrets: bool,
}

impl RenderJob {
    pub fn descriptor_dir(&self) -> &Path {
        self.descriptor.parent().unwrap_or(Path::new("."))
    }
}

/// What a finished render produced
#[derive(Debug, Clone)]
pub struct Rendered {
    pub source: SourceDescriptor,
    pub chart_path: PathBuf,
    pub values: ValuesPlan,
    pub output: RenderOutput,
    /// Manifest file to show or compare
    pub manifest_file: PathBuf,
}

/// Runs [`RenderJob`]s against a resolver and a renderer
#[derive(Clone)]
pub struct RenderPipeline {
    resolver: ChartResolver,
    renderer: Renderer,
    vcs: Arc<dyn VcsClient>,
}

impl RenderPipeline {
    pub fn new(
        resolver: ChartResolver,
        renderer: Arc<dyn ChartRenderer>,
        vcs: Arc<dyn VcsClient>,
    ) -> Self {
        Self {
            resolver,
            renderer: Renderer::new(renderer),
            vcs,
        }
    }

    pub fn resolver(&self) -> &ChartResolver {
        &self.resolver
    }

    pub fn vcs(&self) -> &Arc<dyn VcsClient> {
        &self.vcs
    }

    /// Load the descriptor and plan its values files, without fetching anything
    pub async fn plan(&self, job: &RenderJob) -> Result<(Application, ValuesPlan)> {
        let app = Application::load(&job.descriptor)?;
        app.validate()?;

        let refs = app.ref_sources();
        let git_root = match &job.git_root {
            Some(root) => Some(root.clone()),
            None if !refs.is_empty() && job.ref_overrides.is_empty() => {
                self.vcs.toplevel(&job.workdir).await.ok()
            }
            None => None,
        };

        let mapping = RefMapping::build(&refs, &job.ref_overrides, git_root.as_deref(), &job.workdir)?;
        let values = ValuesPlan::resolve(&app, job.descriptor_dir(), &mapping)?;
        Ok((app, values))
    }

    pub async fn run(&self, job: &RenderJob) -> Result<Rendered> {
        let (app, values) = self.plan(job).await?;
        let source = SourceDescriptor::for_chart(&app)?;
        tracing::info!("Application {} uses {}", app.app_name(), source);

        let chart = self.resolver.resolve(&source).await?;
        let request = RenderRequest {
            chart_path: chart.path.clone(),
            release_name: app.release_name().to_string(),
            values_files: values.files.clone(),
            skip_crds: app.skip_crds(),
            extra_args: job.extra_args.clone(),
            decode_secrets: job.decode_secrets,
        };
        let output = self.renderer.render(&request).await?;
        drop(chart);

        for warning in &output.warnings {
            tracing::warn!("{}", warning);
        }

        let manifest_file = output.write_to(&job.output_dir)?;

        Ok(Rendered {
            source,
            chart_path: request.chart_path,
            values,
            output,
            manifest_file,
        })
    }
}
