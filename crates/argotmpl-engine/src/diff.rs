//! Resource-level comparison of two rendered manifests
//!
//! Documents are matched on (kind, namespace, name). Documents sharing that
//! identity, including those missing `kind` or `metadata.name`, are told
//! apart by their order in the stream. A document present on one side only
//! is added or removed; a document whose text differs is modified and
//! carries a line diff.

use similar::{ChangeTag, TextDiff};
use std::collections::BTreeMap;
use std::fmt;

/// Diff engine for manifest comparison
pub struct DiffEngine {
    /// Unchanged lines kept around each hunk
    pub context_lines: usize,
}

impl DiffEngine {
    pub fn new() -> Self {
        Self { context_lines: 3 }
    }

    pub fn with_context(mut self, lines: usize) -> Self {
        self.context_lines = lines;
        self
    }

    /// Compare a base manifest with a working one
    pub fn diff_manifests(&self, base: &str, working: &str) -> DiffResult {
        let old_resources = parse_manifest_resources(base);
        let new_resources = parse_manifest_resources(working);

        let mut changes = Vec::new();

        for (key, new_content) in &new_resources {
            match old_resources.get(key) {
                Some(old_content) if old_content != new_content => {
                    changes.push(ResourceChange::new(
                        key,
                        ChangeType::Modified,
                        self.line_diff(old_content, new_content),
                    ));
                }
                None => {
                    changes.push(ResourceChange::new(
                        key,
                        ChangeType::Added,
                        DiffContent::whole(new_content, LineType::Added),
                    ));
                }
                _ => {}
            }
        }

        for (key, old_content) in &old_resources {
            if !new_resources.contains_key(key) {
                changes.push(ResourceChange::new(
                    key,
                    ChangeType::Removed,
                    DiffContent::whole(old_content, LineType::Removed),
                ));
            }
        }

        DiffResult { changes }
    }

    /// Line diff of two documents, trimmed to `context_lines` around changes
    fn line_diff(&self, old: &str, new: &str) -> DiffContent {
        let diff = TextDiff::from_lines(old, new);
        let mut lines = Vec::new();

        for group in diff.grouped_ops(self.context_lines) {
            for op in group {
                for change in diff.iter_changes(&op) {
                    let line_type = match change.tag() {
                        ChangeTag::Delete => LineType::Removed,
                        ChangeTag::Insert => LineType::Added,
                        ChangeTag::Equal => LineType::Context,
                    };

                    lines.push(DiffLine {
                        line_type,
                        content: change.value().trim_end().to_string(),
                        old_index: change.old_index(),
                        new_index: change.new_index(),
                    });
                }
            }
        }

        DiffContent { lines }
    }

    /// One line such as `1 added, 2 modified`
    pub fn summary(&self, result: &DiffResult) -> String {
        let mut parts = Vec::new();

        for change_type in [ChangeType::Added, ChangeType::Modified, ChangeType::Removed] {
            let count = result.of_type(change_type).len();
            if count > 0 {
                parts.push(format!("{} {}", count, change_type));
            }
        }

        if parts.is_empty() {
            "No changes".to_string()
        } else {
            parts.join(", ")
        }
    }
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of comparing two manifests
#[derive(Debug, Clone, Default)]
pub struct DiffResult {
    pub changes: Vec<ResourceChange>,
}

impl DiffResult {
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn of_type(&self, change_type: ChangeType) -> Vec<&ResourceChange> {
        self.changes
            .iter()
            .filter(|c| c.change_type == change_type)
            .collect()
    }
}

/// One resource that differs between the two manifests
#[derive(Debug, Clone)]
pub struct ResourceChange {
    pub kind: String,
    pub name: String,
    /// `None` when the manifest leaves it unset
    pub namespace: Option<String>,
    /// Position among documents with the same kind, namespace and name
    pub occurrence: usize,

    pub change_type: ChangeType,

    pub diff: DiffContent,
}

impl ResourceChange {
    fn new(key: &ResourceKey, change_type: ChangeType, diff: DiffContent) -> Self {
        Self {
            kind: key.kind.clone(),
            name: key.name.clone(),
            namespace: key.namespace.clone(),
            occurrence: key.occurrence,
            change_type,
            diff,
        }
    }

    /// `namespace/Kind/name`, or `Kind/name` without a namespace; repeats get a `#n` suffix
    pub fn id(&self) -> String {
        let id = match &self.namespace {
            Some(ns) => format!("{}/{}/{}", ns, self.kind, self.name),
            None => format!("{}/{}", self.kind, self.name),
        };
        match self.occurrence {
            0 => id,
            n => format!("{}#{}", id, n + 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Added,
    Modified,
    Removed,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeType::Added => write!(f, "added"),
            ChangeType::Modified => write!(f, "modified"),
            ChangeType::Removed => write!(f, "removed"),
        }
    }
}

/// Lines of one resource diff
#[derive(Debug, Clone, Default)]
pub struct DiffContent {
    pub lines: Vec<DiffLine>,
}

impl DiffContent {
    /// Every line of `content` tagged with `line_type`
    fn whole(content: &str, line_type: LineType) -> Self {
        let lines = content
            .lines()
            .enumerate()
            .map(|(i, line)| DiffLine {
                line_type,
                content: line.to_string(),
                old_index: (line_type == LineType::Removed).then_some(i),
                new_index: (line_type == LineType::Added).then_some(i),
            })
            .collect();

        Self { lines }
    }

    /// `+`/`-`/space prefixed lines
    pub fn unified(&self) -> String {
        let mut output = String::new();

        for line in &self.lines {
            let prefix = match line.line_type {
                LineType::Added => "+",
                LineType::Removed => "-",
                LineType::Context => " ",
            };
            output.push_str(prefix);
            output.push_str(&line.content);
            output.push('\n');
        }

        output
    }
}

#[derive(Debug, Clone)]
pub struct DiffLine {
    pub line_type: LineType,
    pub content: String,
    pub old_index: Option<usize>,
    pub new_index: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineType {
    Added,
    Removed,
    Context,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ResourceKey {
    kind: String,
    namespace: Option<String>,
    name: String,
    occurrence: usize,
}

/// Split a YAML stream on document separator lines
fn split_documents(manifest: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut current = String::new();

    for line in manifest.lines() {
        if line.trim_end() == "---" || line.starts_with("--- ") {
            docs.push(std::mem::take(&mut current));
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    docs.push(current);

    docs.into_iter()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .collect()
}

/// Parse a manifest into individual resources, in key order
fn parse_manifest_resources(manifest: &str) -> BTreeMap<ResourceKey, String> {
    let mut resources = BTreeMap::new();

    for doc in split_documents(manifest) {
        let yaml: serde_yaml::Value = match serde_yaml::from_str(&doc) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!("Skipping unparsable document: {}", e);
                continue;
            }
        };
        if yaml.is_null() {
            continue;
        }

        let kind = yaml
            .get("kind")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown")
            .to_string();

        let name = yaml
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(|n| n.as_str())
            .unwrap_or("unnamed")
            .to_string();

        let namespace = yaml
            .get("metadata")
            .and_then(|m| m.get("namespace"))
            .and_then(|n| n.as_str())
            .map(String::from);

        let mut key = ResourceKey {
            kind,
            namespace,
            name,
            occurrence: 0,
        };
        while resources.contains_key(&key) {
            key.occurrence += 1;
        }
        if key.occurrence == 1 {
            tracing::warn!(
                "Manifest repeats {}/{}, matching repeats by position",
                key.kind,
                key.name
            );
        }
        resources.insert(key, doc);
    }

    resources
}
