//! Render orchestration around `helm template`

use argotmpl_repo::ChartRenderer;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::secrets::{DecodeWarning, decode_secrets};

/// Rendered manifest, written beside the application
pub const MANIFEST_FILE: &str = ".manifest.yaml";

/// Manifest with Secret data decoded
pub const SECRETS_MANIFEST_FILE: &str = ".manifest.secrets.yaml";

/// Everything needed for one `helm template` run
#[derive(Debug, Clone, Default)]
pub struct RenderRequest {
    pub chart_path: PathBuf,
    pub release_name: String,
    pub values_files: Vec<PathBuf>,
    pub skip_crds: bool,
    /// Passed through to helm, after the generated arguments
    pub extra_args: Vec<String>,
    pub decode_secrets: bool,
}

impl RenderRequest {
    /// Arguments for `helm template`, without the chart path
    pub fn helm_args(&self) -> Vec<String> {
        let mut args = vec!["--release-name".to_string(), self.release_name.clone()];

        if self.skip_crds {
            args.push("--skip-crds".to_string());
        }

        for file in &self.values_files {
            args.push("-f".to_string());
            args.push(file.display().to_string());
        }

        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Result of a successful render
#[derive(Debug, Clone, Default)]
pub struct RenderOutput {
    pub manifest: String,
    /// Set when secret decoding was requested
    pub decoded: Option<String>,
    pub warnings: Vec<DecodeWarning>,
    /// helm's stderr, usually deprecation notices
    pub stderr: String,
}

impl RenderOutput {
    /// Manifest to show the user: decoded when available
    pub fn display_manifest(&self) -> &str {
        self.decoded.as_deref().unwrap_or(&self.manifest)
    }

    /// File name of the manifest returned by [`display_manifest`](Self::display_manifest)
    pub fn display_file(&self) -> &'static str {
        if self.decoded.is_some() {
            SECRETS_MANIFEST_FILE
        } else {
            MANIFEST_FILE
        }
    }

    /// Write the manifest files into `dir`, returning the displayed one
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;

        let primary = dir.join(MANIFEST_FILE);
        std::fs::write(&primary, &self.manifest)?;
        tracing::debug!("Wrote {}", primary.display());

        match &self.decoded {
            Some(decoded) => {
                let secrets = dir.join(SECRETS_MANIFEST_FILE);
                std::fs::write(&secrets, decoded)?;
                tracing::debug!("Wrote {}", secrets.display());
                Ok(secrets)
            }
            None => Ok(primary),
        }
    }
}

/// Runs the chart renderer and post-processes its output
#[derive(Clone)]
pub struct Renderer {
    renderer: Arc<dyn ChartRenderer>,
}

impl Renderer {
    pub fn new(renderer: Arc<dyn ChartRenderer>) -> Self {
        Self { renderer }
    }

    pub async fn render(&self, request: &RenderRequest) -> Result<RenderOutput> {
        let args = request.helm_args();
        tracing::info!("Rendering {}", request.chart_path.display());

        let output = self.renderer.template(&request.chart_path, &args).await?;
        if !output.success() {
            return Err(EngineError::RenderFailed {
                status: output
                    .status
                    .map(|code| format!("exit code {}", code))
                    .unwrap_or_else(|| "terminated by signal".to_string()),
                stderr: output.stderr.trim().to_string(),
            });
        }

        if !output.stderr.trim().is_empty() {
            tracing::debug!("helm stderr: {}", output.stderr.trim());
        }

        let (decoded, warnings) = if request.decode_secrets {
            let decoded = decode_secrets(&output.stdout);
            (Some(decoded.text), decoded.warnings)
        } else {
            (None, Vec::new())
        };

        Ok(RenderOutput {
            manifest: output.stdout,
            decoded,
            warnings,
            stderr: output.stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argotmpl_repo::backend::mock::MockRenderer;
    use tempfile::TempDir;

    const SECRET: &str = "apiVersion: v1\nkind: Secret\nmetadata:\n  name: creds\ndata:\n  user: YWRtaW4=\n  pass: '%%%'\n";

    fn request() -> RenderRequest {
        RenderRequest {
            chart_path: PathBuf::from("/charts/demo"),
            release_name: "demo".to_string(),
            values_files: vec![PathBuf::from("/repo/values.yaml"), PathBuf::from("/repo/prod.yaml")],
            skip_crds: true,
            extra_args: vec!["--namespace".to_string(), "apps".to_string()],
            decode_secrets: false,
        }
    }

    #[test]
    fn test_helm_args_order() {
        assert_eq!(
            request().helm_args(),
            vec![
                "--release-name",
                "demo",
                "--skip-crds",
                "-f",
                "/repo/values.yaml",
                "-f",
                "/repo/prod.yaml",
                "--namespace",
                "apps",
            ]
        );
    }

    #[test]
    fn test_helm_args_minimal() {
        let request = RenderRequest {
            release_name: "demo".to_string(),
            ..Default::default()
        };
        assert_eq!(request.helm_args(), vec!["--release-name", "demo"]);
    }

    #[tokio::test]
    async fn test_render_passes_chart_and_args() {
        let mock = MockRenderer::fixed("kind: ConfigMap\n");
        let renderer = Renderer::new(Arc::new(mock.clone()));

        let output = renderer.render(&request()).await.unwrap();
        assert_eq!(output.manifest, "kind: ConfigMap\n");
        assert!(output.decoded.is_none());

        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].chart, PathBuf::from("/charts/demo"));
        assert_eq!(calls[0].args, request().helm_args());
    }

    #[tokio::test]
    async fn test_render_failure_keeps_stderr() {
        let renderer = Renderer::new(Arc::new(MockRenderer::failing(
            1,
            "Error: template: demo/templates/deploy.yaml:3: unexpected EOF\n",
        )));

        let err = renderer.render(&request()).await.unwrap_err();
        match err {
            EngineError::RenderFailed { status, stderr } => {
                assert_eq!(status, "exit code 1");
                assert!(stderr.contains("unexpected EOF"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_render_decodes_secrets() {
        let renderer = Renderer::new(Arc::new(MockRenderer::fixed(SECRET)));
        let mut req = request();
        req.decode_secrets = true;

        let output = renderer.render(&req).await.unwrap();
        assert_eq!(output.manifest, SECRET);
        let decoded = output.decoded.as_deref().unwrap();
        assert!(decoded.contains("user: admin"));
        assert_eq!(output.warnings.len(), 1);
        assert_eq!(output.display_file(), SECRETS_MANIFEST_FILE);
    }

    #[test]
    fn test_write_to() {
        let tmp = TempDir::new().unwrap();

        let plain = RenderOutput {
            manifest: "a: 1\n".to_string(),
            ..Default::default()
        };
        let written = plain.write_to(tmp.path()).unwrap();
        assert_eq!(written, tmp.path().join(MANIFEST_FILE));
        assert!(!tmp.path().join(SECRETS_MANIFEST_FILE).exists());

        let decoded = RenderOutput {
            manifest: "a: 1\n".to_string(),
            decoded: Some("a: decoded\n".to_string()),
            ..Default::default()
        };
        let written = decoded.write_to(tmp.path()).unwrap();
        assert_eq!(written, tmp.path().join(SECRETS_MANIFEST_FILE));
        assert_eq!(std::fs::read_to_string(tmp.path().join(MANIFEST_FILE)).unwrap(), "a: 1\n");
        assert_eq!(std::fs::read_to_string(&written).unwrap(), "a: decoded\n");
    }
}
