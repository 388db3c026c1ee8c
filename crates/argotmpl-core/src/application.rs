//! Argo CD `Application` descriptor model and validation

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::error::{CoreError, Result};

/// Expected value of the top-level `kind` field
pub const APPLICATION_KIND: &str = "Application";

/// An Argo CD Application, as loaded from `application.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    #[serde(default)]
    pub api_version: String,

    #[serde(default)]
    pub kind: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub spec: ApplicationSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub namespace: String,
}

/// Application spec. Only the source list matters here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationSpec {
    /// Multi-source form
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,

    /// Legacy single-source form, folded into `sources` on load
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
}

/// One entry of `spec.sources`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(rename = "repoURL", default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_revision: Option<String>,

    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub ref_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm: Option<HelmSource>,
}

/// Helm settings attached to a chart source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,

    #[serde(default)]
    pub skip_crds: bool,

    #[serde(default)]
    pub value_files: Vec<String>,
}

impl Source {
    /// A Helm chart definition: `chart` or `path`, never both, never with `ref`
    pub fn is_chart_source(&self) -> bool {
        self.ref_name.is_none() && (self.chart.is_some() != self.path.is_some())
    }

    /// A pure reference source providing values files to the chart source
    pub fn is_ref_source(&self) -> bool {
        self.ref_name.is_some() && self.chart.is_none() && self.path.is_none() && self.helm.is_none()
    }
}

impl Application {
    /// Load an application from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CoreError::DescriptorNotFound {
                path: path.display().to_string(),
            },
            _ => CoreError::Io(e),
        })?;

        Self::from_yaml(&content).map_err(|e| match e {
            CoreError::DescriptorParse { message, .. } => CoreError::DescriptorParse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    /// Parse an application from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut app: Self = serde_yaml::from_str(yaml).map_err(|e| CoreError::DescriptorParse {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })?;

        if app.spec.sources.is_empty() {
            match app.spec.source.take() {
                Some(source) => app.spec.sources.push(source),
                None => {
                    return Err(CoreError::invalid(
                        "missing 'sources' or 'source' in spec",
                    ));
                }
            }
        }

        Ok(app)
    }

    /// All sources, with the legacy `source` already folded in
    pub fn sources(&self) -> &[Source] {
        &self.spec.sources
    }

    pub fn app_name(&self) -> &str {
        &self.metadata.name
    }

    /// Index of the source that declares the chart
    pub fn chart_source_index(&self) -> Option<usize> {
        self.sources()
            .iter()
            .position(|s| s.chart.is_some() || s.path.is_some())
    }

    /// The source carrying the `helm` block, if any
    pub fn helm(&self) -> Option<&HelmSource> {
        self.sources().iter().find_map(|s| s.helm.as_ref())
    }

    /// Release name: `helm.releaseName`, falling back to `metadata.name`
    pub fn release_name(&self) -> &str {
        self.helm()
            .and_then(|h| h.release_name.as_deref())
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.metadata.name)
    }

    pub fn skip_crds(&self) -> bool {
        self.helm().map(|h| h.skip_crds).unwrap_or(false)
    }

    pub fn value_files(&self) -> &[String] {
        self.helm().map(|h| h.value_files.as_slice()).unwrap_or(&[])
    }

    /// Ref sources in declaration order: ref name -> repoURL
    pub fn ref_sources(&self) -> IndexMap<String, String> {
        self.sources()
            .iter()
            .filter_map(|s| match (&s.ref_name, &s.repo_url) {
                (Some(name), Some(url)) if !name.is_empty() && !url.is_empty() => {
                    Some((name.clone(), url.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Validate the application, failing on the first problem found
    pub fn validate(&self) -> Result<()> {
        if self.kind != APPLICATION_KIND {
            return Err(CoreError::invalid(format!(
                "Invalid resource kind: '{}' expected, got '{}'",
                APPLICATION_KIND, self.kind
            )));
        }

        let mut seen = BTreeSet::new();
        let mut duplicates = BTreeSet::new();
        for name in self.sources().iter().filter_map(|s| s.ref_name.as_deref()) {
            if !seen.insert(name) {
                duplicates.insert(name);
            }
        }
        if !duplicates.is_empty() {
            return Err(CoreError::invalid(format!(
                "Duplicate ref sources found: {}",
                duplicates.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }

        let mut chart_indices = Vec::new();
        for (i, source) in self.sources().iter().enumerate() {
            if source.is_chart_source() {
                chart_indices.push(i);
            } else if !source.is_ref_source() {
                return Err(CoreError::invalid(format!(
                    "Source #{} is invalid: must be either a Helm chart (with 'chart' or 'path') \
                     or a reference source (with 'ref')",
                    i
                )));
            }
        }

        match chart_indices.len() {
            0 => {
                return Err(CoreError::invalid(
                    "Application does not use Helm: no Helm chart source found",
                ));
            }
            1 => {}
            _ => {
                return Err(CoreError::invalid(format!(
                    "Multiple Helm charts found: sources {:?} define Helm charts. \
                     Only one Helm chart per application is supported.",
                    chart_indices
                )));
            }
        }

        let refs = self.ref_sources();
        if refs.is_empty() {
            return Ok(());
        }

        for vf in self.value_files() {
            let Some(rest) = vf.strip_prefix('$') else {
                return Err(CoreError::invalid(format!(
                    "valueFile '{}' must use ref prefix (e.g., $ref_name/path) when ref sources are defined",
                    vf
                )));
            };
            let Some((ref_name, _)) = rest.split_once('/') else {
                return Err(CoreError::invalid(format!(
                    "valueFile '{}', ref/path expected but not found",
                    vf
                )));
            };
            if !refs.contains_key(ref_name) {
                return Err(CoreError::invalid(format!(
                    "valueFile '{}' references undefined ref '{}'. Available refs: {}",
                    vf,
                    ref_name,
                    refs.keys().cloned().collect::<Vec<_>>().join(", ")
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTI_SOURCE: &str = r#"
apiVersion: argoproj.io/v1alpha1
kind: Application
metadata:
  name: karpenter-app
spec:
  sources:
    - repoURL: public.ecr.aws/karpenter
      targetRevision: 1.5.2
      chart: karpenter
      helm:
        releaseName: karpenter
        skipCrds: true
        valueFiles:
          - $values/values.yaml
    - repoURL: https://github.com/org/values-repo
      ref: values
"#;

    #[test]
    fn test_load_multi_source() {
        let app = Application::from_yaml(MULTI_SOURCE).unwrap();
        assert_eq!(app.sources().len(), 2);
        assert_eq!(app.chart_source_index(), Some(0));
        assert_eq!(app.release_name(), "karpenter");
        assert!(app.skip_crds());
        assert_eq!(app.value_files(), ["$values/values.yaml"]);
        assert_eq!(
            app.ref_sources().get("values").map(String::as_str),
            Some("https://github.com/org/values-repo")
        );
        app.validate().unwrap();
    }

    #[test]
    fn test_singular_source_is_folded() {
        let app = Application::from_yaml(
            r#"
kind: Application
metadata:
  name: demo
spec:
  source:
    repoURL: https://example.test/charts
    chart: demo
    targetRevision: 1.0.0
"#,
        )
        .unwrap();

        assert_eq!(app.sources().len(), 1);
        assert!(app.spec.source.is_none());
        assert_eq!(app.release_name(), "demo");
        assert!(!app.skip_crds());
    }

    #[test]
    fn test_missing_sources() {
        let err = Application::from_yaml("kind: Application\nspec: {}\n").unwrap_err();
        assert!(err.to_string().contains("missing 'sources' or 'source'"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = Application::load(&dir.path().join("application.yaml")).unwrap_err();
        assert!(matches!(err, CoreError::DescriptorNotFound { .. }));
    }

    #[test]
    fn test_load_unparsable_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("application.yaml");
        std::fs::write(&path, "spec: [unclosed").unwrap();

        let err = Application::load(&path).unwrap_err();
        match err {
            CoreError::DescriptorParse { path: p, .. } => assert!(p.ends_with("application.yaml")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validate_wrong_kind() {
        let yaml = MULTI_SOURCE.replace("kind: Application", "kind: ApplicationSet");
        let err = Application::from_yaml(&yaml).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("'Application' expected, got 'ApplicationSet'"));
    }

    #[test]
    fn test_validate_duplicate_refs() {
        let yaml = format!(
            "{}    - repoURL: https://github.com/org/other\n      ref: values\n",
            MULTI_SOURCE
        );
        let err = Application::from_yaml(&yaml).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate ref sources found: values"));
    }

    #[test]
    fn test_validate_multiple_charts() {
        let yaml = format!(
            "{}    - repoURL: https://example.test/charts\n      chart: other\n      targetRevision: 1.0.0\n",
            MULTI_SOURCE
        );
        let err = Application::from_yaml(&yaml).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("Multiple Helm charts found"));
    }

    #[test]
    fn test_validate_undefined_ref() {
        let yaml = MULTI_SOURCE.replace("$values/values.yaml", "$nonexistent/values.yaml");
        let err = Application::from_yaml(&yaml).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("references undefined ref 'nonexistent'"));
    }

    #[test]
    fn test_validate_plain_value_file_with_refs() {
        let yaml = MULTI_SOURCE.replace("$values/values.yaml", "values.yaml");
        let err = Application::from_yaml(&yaml).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("must use ref prefix"));
    }

    #[test]
    fn test_validate_no_chart() {
        let app = Application::from_yaml(
            "kind: Application\nspec:\n  sources:\n    - repoURL: https://github.com/org/values\n      ref: values\n",
        )
        .unwrap();
        let err = app.validate().unwrap_err();
        assert!(err.to_string().contains("no Helm chart source found"));
    }
}
