//! Normalized chart sources
//!
//! A [`SourceDescriptor`] is what the chart resolver works from. The kind of
//! source is derived from the descriptor fields, never supplied by the user:
//!
//! - `chart` + `repoURL` starting with `http://`/`https://` → [`SourceKind::HttpsRepo`]
//! - `chart` + any other `repoURL` → [`SourceKind::OciRegistry`]
//! - `path` → [`SourceKind::GitPath`], whatever the URL looks like
//!
//! The HTTPS/OCI split is a literal prefix test. An OCI registry reachable
//! only through an `https://` alias is classified as an HTTPS repository.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::application::Application;
use crate::error::{CoreError, Result};

const HTTP_PREFIXES: [&str; 2] = ["http://", "https://"];

/// Where the chart comes from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SourceKind {
    /// Classic Helm repository with an index.yaml
    HttpsRepo { chart: String },
    /// OCI registry, pulled by reference
    OciRegistry { chart: String },
    /// Chart directory inside a git repository
    GitPath { path: String },
}

impl SourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::HttpsRepo { .. } => "helm-repo",
            SourceKind::OciRegistry { .. } => "helm-oci",
            SourceKind::GitPath { .. } => "git",
        }
    }
}

/// Normalized chart source record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDescriptor {
    pub kind: SourceKind,
    pub repo_url: String,
    /// Chart version, OCI tag or git ref
    pub revision: String,
}

impl SourceDescriptor {
    /// Build the descriptor for `app.spec.sources[index]`
    pub fn from_application(app: &Application, index: usize) -> Result<Self> {
        let source = app
            .sources()
            .get(index)
            .ok_or_else(|| CoreError::malformed(index, "no such source"))?;

        let repo_url = source
            .repo_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| CoreError::malformed(index, "missing 'repoURL'"))?;

        let revision = source
            .target_revision
            .as_deref()
            .filter(|rev| !rev.is_empty())
            .ok_or_else(|| CoreError::malformed(index, "missing 'targetRevision'"))?;

        let kind = classify(repo_url, source.chart.as_deref(), source.path.as_deref())
            .map_err(|message| CoreError::malformed(index, message))?;

        // Chart versions are compared without a leading 'v'; git refs are used verbatim
        let revision = match kind {
            SourceKind::GitPath { .. } => revision.to_string(),
            _ => revision.trim_start_matches('v').to_string(),
        };

        Ok(Self {
            kind,
            repo_url: repo_url.to_string(),
            revision,
        })
    }

    /// Descriptor for the application's chart source
    pub fn for_chart(app: &Application) -> Result<Self> {
        let index = app
            .chart_source_index()
            .ok_or_else(|| CoreError::malformed(0, "neither 'chart' nor 'path' is present"))?;
        Self::from_application(app, index)
    }

    /// Chart name, or the git path, as written in the descriptor
    pub fn chart_name(&self) -> &str {
        match &self.kind {
            SourceKind::HttpsRepo { chart } | SourceKind::OciRegistry { chart } => chart,
            SourceKind::GitPath { path } => path,
        }
    }

    /// Name of the chart directory once materialized
    pub fn chart_dir_name(&self) -> &str {
        match &self.kind {
            SourceKind::HttpsRepo { chart } | SourceKind::OciRegistry { chart } => chart,
            SourceKind::GitPath { path } => path
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or(path),
        }
    }

    pub fn is_git(&self) -> bool {
        matches!(self.kind, SourceKind::GitPath { .. })
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}@{} ({})",
            self.repo_url,
            self.chart_name(),
            self.revision,
            self.kind.label()
        )
    }
}

/// Derive the source kind from the raw fields
pub fn classify(
    repo_url: &str,
    chart: Option<&str>,
    path: Option<&str>,
) -> std::result::Result<SourceKind, String> {
    match (chart, path) {
        (Some(_), Some(_)) => Err("both 'chart' and 'path' are present".to_string()),
        (None, None) => Err("neither 'chart' nor 'path' is present".to_string()),
        (None, Some(path)) => Ok(SourceKind::GitPath {
            path: path.to_string(),
        }),
        (Some(chart), None) if is_http_url(repo_url) => Ok(SourceKind::HttpsRepo {
            chart: chart.to_string(),
        }),
        (Some(chart), None) => Ok(SourceKind::OciRegistry {
            chart: chart.to_string(),
        }),
    }
}

pub fn is_http_url(url: &str) -> bool {
    HTTP_PREFIXES.iter().any(|prefix| url.starts_with(prefix))
}

/// Stable local name for a repository URL
///
/// `https://prometheus-community.github.io/helm-charts` becomes
/// `prometheus-community.github.io-helm-charts`. Used both as the Helm repo
/// alias and as the git clone directory name.
pub fn repo_alias(repo_url: &str) -> String {
    let stripped = HTTP_PREFIXES
        .iter()
        .find_map(|prefix| repo_url.strip_prefix(prefix))
        .unwrap_or(repo_url);

    stripped.replace('/', "-").trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_with_source(source: &str) -> Application {
        Application::from_yaml(&format!(
            "kind: Application\nmetadata:\n  name: demo\nspec:\n  sources:\n    - {}\n",
            source.trim().replace('\n', "\n      ")
        ))
        .unwrap()
    }

    #[test]
    fn test_classify_https() {
        let kind = classify("https://example.test/charts", Some("demo"), None).unwrap();
        assert_eq!(kind, SourceKind::HttpsRepo { chart: "demo".into() });

        let kind = classify("http://example.test/charts", Some("demo"), None).unwrap();
        assert_eq!(kind, SourceKind::HttpsRepo { chart: "demo".into() });
    }

    #[test]
    fn test_classify_oci_when_prefix_missing() {
        let kind = classify("example.test/charts", Some("demo"), None).unwrap();
        assert_eq!(kind, SourceKind::OciRegistry { chart: "demo".into() });

        // Literal prefix test, not protocol-aware
        let kind = classify("oci://example.test/charts", Some("demo"), None).unwrap();
        assert_eq!(kind, SourceKind::OciRegistry { chart: "demo".into() });
        let kind = classify("HTTPS://example.test/charts", Some("demo"), None).unwrap();
        assert_eq!(kind, SourceKind::OciRegistry { chart: "demo".into() });
    }

    #[test]
    fn test_classify_git_ignores_prefix() {
        for url in ["https://github.com/org/repo", "git@github.com:org/repo.git"] {
            let kind = classify(url, None, Some("charts/demo")).unwrap();
            assert_eq!(kind, SourceKind::GitPath { path: "charts/demo".into() });
        }
    }

    #[test]
    fn test_classify_rejects_ambiguous() {
        assert!(classify("https://x", Some("a"), Some("b")).is_err());
        assert!(classify("https://x", None, None).is_err());
    }

    #[test]
    fn test_from_application_https() {
        let app = app_with_source(
            "repoURL: https://example.test/charts\nchart: demo\ntargetRevision: v1.0.0",
        );
        let desc = SourceDescriptor::for_chart(&app).unwrap();

        assert_eq!(desc.kind, SourceKind::HttpsRepo { chart: "demo".into() });
        assert_eq!(desc.repo_url, "https://example.test/charts");
        assert_eq!(desc.revision, "1.0.0");
        assert_eq!(desc.chart_dir_name(), "demo");
    }

    #[test]
    fn test_from_application_git_keeps_revision() {
        let app = app_with_source(
            "repoURL: https://github.com/argoproj/argo-helm\npath: charts/argo-events/\ntargetRevision: v2.4.19\nhelm: {}",
        );
        let desc = SourceDescriptor::for_chart(&app).unwrap();

        assert!(desc.is_git());
        assert_eq!(desc.revision, "v2.4.19");
        assert_eq!(desc.chart_dir_name(), "argo-events");
    }

    #[test]
    fn test_missing_revision_is_malformed() {
        let app = app_with_source("repoURL: https://example.test/charts\nchart: demo");
        let err = SourceDescriptor::for_chart(&app).unwrap_err();
        assert!(matches!(err, CoreError::MalformedSource { index: 0, .. }));
        assert!(err.to_string().contains("targetRevision"));
    }

    #[test]
    fn test_missing_chart_and_path_is_malformed() {
        let app = app_with_source("repoURL: https://example.test/charts\ntargetRevision: 1.0.0");
        let err = SourceDescriptor::from_application(&app, 0).unwrap_err();
        assert!(matches!(err, CoreError::MalformedSource { .. }));

        let err = SourceDescriptor::for_chart(&app).unwrap_err();
        assert!(err.to_string().contains("neither 'chart' nor 'path'"));
    }

    #[test]
    fn test_out_of_range_index() {
        let app = app_with_source("repoURL: https://x\nchart: demo\ntargetRevision: 1.0.0");
        assert!(SourceDescriptor::from_application(&app, 3).is_err());
    }

    #[test]
    fn test_repo_alias() {
        assert_eq!(
            repo_alias("https://prometheus-community.github.io/helm-charts"),
            "prometheus-community.github.io-helm-charts"
        );
        assert_eq!(repo_alias("https://grafana.github.io/helm-charts/"), "grafana.github.io-helm-charts");
        assert_eq!(repo_alias("http://example.test/charts"), "example.test-charts");
        assert_eq!(repo_alias("public.ecr.aws/karpenter"), "public.ecr.aws-karpenter");
        assert_eq!(
            repo_alias("https://github.com/argoproj/argo-helm"),
            "github.com-argoproj-argo-helm"
        );
    }
}
