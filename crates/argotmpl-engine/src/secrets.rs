//! Base64 decoding of Secret data for review
//!
//! Produces a second manifest in which every `kind: Secret` document has its
//! `data` values decoded. A value that is not valid base64, or not UTF-8 once
//! decoded, stays encoded and is reported as a [`DecodeWarning`]. The render
//! is never aborted for it.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_yaml::Value;
use std::fmt;

use crate::normalize::{emit_documents, parse_documents};

/// A Secret field that was left encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeWarning {
    /// Secret name
    pub secret: String,
    /// Key under `data`
    pub key: String,
    pub reason: String,
}

impl fmt::Display for DecodeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Secret {}: could not decode data.{}: {}",
            self.secret, self.key, self.reason
        )
    }
}

/// Decoded manifest text with the fields that could not be decoded
#[derive(Debug, Clone, Default)]
pub struct DecodedManifest {
    pub text: String,
    pub warnings: Vec<DecodeWarning>,
}

/// Decode the `data` of every Secret in `manifest`
///
/// A manifest that does not parse as YAML is returned unchanged.
pub fn decode_secrets(manifest: &str) -> DecodedManifest {
    let mut docs = match parse_documents(manifest) {
        Ok(docs) => docs,
        Err(e) => {
            tracing::warn!("Failed to parse manifest, secrets left encoded: {}", e);
            return DecodedManifest {
                text: manifest.to_string(),
                warnings: Vec::new(),
            };
        }
    };

    let mut warnings = Vec::new();
    for doc in docs.iter_mut() {
        if doc.get("kind").and_then(Value::as_str) != Some("Secret") {
            continue;
        }

        let name = doc
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        tracing::debug!("Processing Secret {}", name);

        let Some(data) = doc.get_mut("data").and_then(Value::as_mapping_mut) else {
            continue;
        };

        for (key, value) in data.iter_mut() {
            let Some(encoded) = value.as_str() else {
                continue;
            };
            let key = key.as_str().unwrap_or_default().to_string();

            match decode_field(encoded) {
                Ok(decoded) => *value = Value::String(decoded),
                Err(reason) => {
                    let warning = DecodeWarning {
                        secret: name.clone(),
                        key,
                        reason,
                    };
                    tracing::warn!("{}", warning);
                    warnings.push(warning);
                }
            }
        }
    }

    match emit_documents(&docs) {
        Ok(text) => DecodedManifest { text, warnings },
        Err(e) => {
            tracing::warn!("Failed to write decoded manifest, secrets left encoded: {}", e);
            DecodedManifest {
                text: manifest.to_string(),
                warnings,
            }
        }
    }
}

fn decode_field(encoded: &str) -> std::result::Result<String, String> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| format!("invalid base64: {}", e))?;
    String::from_utf8(bytes).map_err(|_| "decoded value is not UTF-8".to_string())
}
