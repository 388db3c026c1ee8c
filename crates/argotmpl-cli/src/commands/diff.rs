//! Diff command - compare the rendered manifest with the one at a git ref

use argotmpl_engine::{ChangeType, DiffContext, DiffReport, DiffSession};
use console::style;

use crate::commands::Workspace;
use crate::error::Result;

pub async fn run(workspace: Workspace, base_ref: &str, sort_keys: bool) -> Result<()> {
    let mut session = DiffSession::new(base_ref).with_sort_keys(sort_keys);
    let ctx = DiffContext {
        pipeline: workspace.pipeline,
        job: workspace.job,
    };

    let report = session.run(&ctx).await?;
    print_report(&report, base_ref);
    Ok(())
}

fn print_report(report: &DiffReport, base_ref: &str) {
    if report.no_source_changes {
        eprintln!(
            "{} No changes in the application or its values files against {}",
            style("⚠").yellow(),
            style(base_ref).bold()
        );
    } else if !report.changed_sources.is_empty() {
        eprintln!("{} Changed since {}:", style("→").blue(), style(base_ref).bold());
        for file in &report.changed_sources {
            eprintln!("    {}", file.display());
        }
    }

    for change in &report.resources.changes {
        let marker = match change.change_type {
            ChangeType::Added => style("+").green(),
            ChangeType::Modified => style("~").yellow(),
            ChangeType::Removed => style("-").red(),
        };
        eprintln!("  {} {}", marker, change.id());
    }

    let summary = if report.resources.has_changes() {
        style(&report.summary).bold()
    } else {
        style(&report.summary).dim()
    };
    eprintln!("{} {}", style("✓").green(), summary);
}
