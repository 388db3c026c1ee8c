//! Capability backends
//!
//! - [`HelmCli`]: `helm` subprocess, for packages and rendering
//! - [`GitCli`]: `git` subprocess
//! - [`mock`]: in-memory implementations for tests

pub mod git;
pub mod helm;
pub mod mock;

pub use git::GitCli;
pub use helm::HelmCli;

use std::ffi::OsStr;
use std::path::Path;
use std::process::Output;

use crate::error::{RepoError, Result};

/// Run `program args...` to completion, capturing its output
pub(crate) async fn run_tool<I, S>(program: &Path, args: I, cwd: Option<&Path>) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
    tracing::debug!("Running: {}", command_line(program, &args));

    let mut command = tokio::process::Command::new(program);
    command.args(&args).stdin(std::process::Stdio::null());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    command.output().await.map_err(|source| RepoError::Spawn {
        program: program.display().to_string(),
        source,
    })
}

/// Printable form of a command line, for logs and error messages
pub(crate) fn command_line<S: AsRef<OsStr>>(program: &Path, args: &[S]) -> String {
    let mut parts = vec![program.to_string_lossy().into_owned()];
    parts.extend(
        args.iter()
            .map(|a| AsRef::<OsStr>::as_ref(a).to_string_lossy().into_owned()),
    );
    parts.join(" ")
}

pub(crate) fn stderr_of(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("exited with {}", output.status)
    } else {
        stderr
    }
}
