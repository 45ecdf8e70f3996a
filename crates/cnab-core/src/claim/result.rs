use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::Status;

/// What the result knows about an output without reading its content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_digest: Option<String>,
    /// `true` when the output is declared by the bundle, `false` for outputs
    /// the runtime captured on its own (e.g. invocation image logs).
    #[serde(default)]
    pub generated_by_bundle: bool,
}

impl OutputMetadata {
    pub fn for_content(content: &[u8], generated_by_bundle: bool) -> Self {
        Self {
            content_digest: Some(content_digest(content)),
            generated_by_bundle,
        }
    }
}

/// `sha256:<hex>` digest of output content.
pub fn content_digest(content: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(content))
}

/// The immutable outcome of one execution attempt against a claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResult {
    pub id: String,
    pub claim_id: String,
    #[serde(with = "crate::timestamp")]
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, OutputMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<Value>,
}

impl ClaimResult {
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn record_output(&mut self, name: impl Into<String>, content: &[u8], generated_by_bundle: bool) {
        self.outputs.insert(
            name.into(),
            OutputMetadata::for_content(content, generated_by_bundle),
        );
    }
}
