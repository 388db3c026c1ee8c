//! Render command - materialize the chart and run `helm template`

use console::style;
use std::io::Write;

use crate::commands::Workspace;
use crate::error::Result;

pub async fn run(workspace: &Workspace) -> Result<()> {
    let rendered = workspace.pipeline.run(&workspace.job).await?;

    for warning in &rendered.output.warnings {
        eprintln!("{} {}", style("⚠").yellow(), warning);
    }

    let stderr = rendered.output.stderr.trim();
    if !stderr.is_empty() {
        tracing::info!("helm: {}", stderr);
    }

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(rendered.output.display_manifest().as_bytes())?;
    stdout.flush()?;

    eprintln!(
        "{} Rendered {} into {}",
        style("✓").green(),
        style(&rendered.source).cyan(),
        rendered
            .manifest_file
            .strip_prefix(&workspace.workdir)
            .unwrap_or(&rendered.manifest_file)
            .display()
    );

    Ok(())
}
