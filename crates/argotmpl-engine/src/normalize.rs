//! Multi-document YAML helpers and key-order normalization

use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::path::Path;

use crate::error::Result;

/// Parse every document of a YAML stream, skipping empty ones
pub fn parse_documents(text: &str) -> Result<Vec<Value>> {
    let mut docs = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(text) {
        let value = Value::deserialize(doc)?;
        if !value.is_null() {
            docs.push(value);
        }
    }
    Ok(docs)
}

/// Serialize documents back into one stream, `---` separated
pub fn emit_documents(docs: &[Value]) -> Result<String> {
    let mut out = String::new();
    for (i, doc) in docs.iter().enumerate() {
        if i > 0 {
            out.push_str("---\n");
        }
        out.push_str(&serde_yaml::to_string(doc)?);
    }
    Ok(out)
}

/// Recursively sort mapping keys
pub fn sort_value(value: Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut entries: Vec<(Value, Value)> = map
                .into_iter()
                .map(|(k, v)| (k, sort_value(v)))
                .collect();
            entries.sort_by_cached_key(|(k, _)| key_text(k));
            Value::Mapping(entries.into_iter().collect::<Mapping>())
        }
        Value::Sequence(items) => Value::Sequence(items.into_iter().map(sort_value).collect()),
        Value::Tagged(mut tagged) => {
            tagged.value = sort_value(tagged.value);
            Value::Tagged(tagged)
        }
        other => other,
    }
}

fn key_text(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Canonical key order for a whole manifest
///
/// Document order and sequence order are kept; only mapping keys move.
pub fn sort_keys(manifest: &str) -> Result<String> {
    let docs: Vec<Value> = parse_documents(manifest)?
        .into_iter()
        .map(sort_value)
        .collect();
    emit_documents(&docs)
}

/// Rewrite a manifest file in canonical key order
pub fn sort_keys_in_file(path: &Path) -> Result<()> {
    tracing::debug!("Sorting keys in {}", path.display());
    let content = std::fs::read_to_string(path)?;
    std::fs::write(path, sort_keys(&content)?)?;
    Ok(())
}
