//! Values files and ref source mapping
//!
//! Ref sources (`ref: values`) let the chart source pull values files out of
//! another repository with `$values/path/to/file.yaml`. Locally, every ref
//! name is mapped to a directory: either an explicit override, or the git
//! top-level of the working directory when only one ref source exists.

use indexmap::IndexMap;
use std::path::{Path, PathBuf};

use crate::application::Application;
use crate::error::{CoreError, Result};

/// Default values file picked up when the application declares none
pub const DEFAULT_VALUES_FILE: &str = "values.yaml";

/// Ref name -> local directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefMapping {
    entries: IndexMap<String, PathBuf>,
}

impl RefMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the mapping for the given ref sources
    ///
    /// Overrides win when present; relative override paths are taken from
    /// `workdir`. Without overrides a single ref source maps to `git_root`;
    /// several ref sources need explicit overrides.
    pub fn build(
        ref_sources: &IndexMap<String, String>,
        overrides: &IndexMap<String, PathBuf>,
        git_root: Option<&Path>,
        workdir: &Path,
    ) -> Result<Self> {
        let mut entries = IndexMap::new();

        if ref_sources.is_empty() {
            return Ok(Self { entries });
        }

        if !overrides.is_empty() {
            for (name, path) in overrides {
                let path = if path.is_absolute() {
                    path.clone()
                } else {
                    workdir.join(path)
                };
                tracing::debug!("Ref mapping override: {} -> {}", name, path.display());
                entries.insert(name.clone(), path);
            }
            return Ok(Self { entries });
        }

        if ref_sources.len() > 1 {
            let names: Vec<&str> = ref_sources.keys().map(String::as_str).collect();
            return Err(CoreError::ref_mapping(format!(
                "Multiple ref sources found ({}) but no --ref-map provided. \
                 Please specify --ref-map to map each ref to a local path \
                 (e.g., --ref-map values=/path/to/values --ref-map other=/path/to/other)",
                names.join(", ")
            )));
        }

        let root = git_root.ok_or_else(|| CoreError::NotInGitRepo {
            path: workdir.display().to_string(),
        })?;

        // len() == 1 checked above
        if let Some(name) = ref_sources.keys().next() {
            tracing::debug!("Ref mapping: {} -> {}", name, root.display());
            entries.insert(name.clone(), root.to_path_buf());
        }

        Ok(Self { entries })
    }

    pub fn insert(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.entries.insert(name.into(), path.into());
    }

    pub fn get(&self, name: &str) -> Option<&Path> {
        self.entries.get(name).map(PathBuf::as_path)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.entries
            .iter()
            .map(|(name, path)| (name.as_str(), path.as_path()))
    }

    /// Same mapping with every target under `from` moved under `to`
    ///
    /// Targets outside `from` are kept as they are.
    pub fn rebased(&self, from: &Path, to: &Path) -> Self {
        let entries = self
            .entries
            .iter()
            .map(|(name, path)| {
                let moved = match path.strip_prefix(from) {
                    Ok(rel) => to.join(rel),
                    Err(_) => path.clone(),
                };
                (name.clone(), moved)
            })
            .collect();
        Self { entries }
    }
}

/// Values files to hand to `helm template`, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValuesPlan {
    pub files: Vec<PathBuf>,
}

impl ValuesPlan {
    /// Resolve the application's `valueFiles` to local paths
    pub fn resolve(app: &Application, descriptor_dir: &Path, mapping: &RefMapping) -> Result<Self> {
        let declared = app.value_files();

        if declared.is_empty() {
            let default = descriptor_dir.join(DEFAULT_VALUES_FILE);
            let files = if default.is_file() {
                tracing::debug!("Using default values file {}", default.display());
                vec![default]
            } else {
                Vec::new()
            };
            return Ok(Self { files });
        }

        let has_refs = !app.ref_sources().is_empty();
        let mut files = Vec::with_capacity(declared.len());

        for vf in declared {
            let resolved = match vf.strip_prefix('$') {
                Some(rest) => resolve_ref_file(vf, rest, mapping)?,
                None if has_refs => {
                    return Err(CoreError::ref_mapping(format!(
                        "valueFile '{}', should start with mapping",
                        vf
                    )));
                }
                None => {
                    let path = Path::new(vf);
                    if path.is_absolute() {
                        path.to_path_buf()
                    } else {
                        descriptor_dir.join(path)
                    }
                }
            };
            tracing::debug!("Mapped valueFile: {} -> {}", vf, resolved.display());
            files.push(resolved);
        }

        Ok(Self { files })
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Files living under `root`, as paths relative to it
    pub fn relative_to(&self, root: &Path) -> Vec<PathBuf> {
        self.files
            .iter()
            .filter_map(|f| f.strip_prefix(root).ok().map(Path::to_path_buf))
            .collect()
    }
}

fn resolve_ref_file(vf: &str, rest: &str, mapping: &RefMapping) -> Result<PathBuf> {
    let (ref_name, relative) = rest.split_once('/').ok_or_else(|| {
        CoreError::ref_mapping(format!("valueFile '{}', ref/path expected but not found", vf))
    })?;

    let base = mapping.get(ref_name).ok_or_else(|| {
        CoreError::ref_mapping(format!(
            "Ref '{}' in valueFile '{}' not found in mapping",
            ref_name, vf
        ))
    })?;

    Ok(base.join(relative))
}
