//! JSON Schema definitions used by bundle parameters and outputs.
//!
//! The keywords the runtime itself reads (`type`, `default`, ...) are typed
//! fields; anything else in a definition is preserved verbatim in `extra`
//! so a bundle round-trips without loss. Validation hands the whole
//! definition to `jsonschema` as a draft-07 schema.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use jsonschema::{Draft, JSONSchema};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// SchemaType
// ---------------------------------------------------------------------------

/// The `type` keyword: a single type name or a list of accepted names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaType {
    Single(String),
    Multiple(Vec<String>),
}

impl SchemaType {
    pub fn names(&self) -> Vec<&str> {
        match self {
            SchemaType::Single(t) => vec![t.as_str()],
            SchemaType::Multiple(ts) => ts.iter().map(String::as_str).collect(),
        }
    }

    pub fn allows(&self, name: &str) -> bool {
        self.names().contains(&name)
    }

    /// True when the only accepted type is `string`.
    fn is_string_only(&self) -> bool {
        self.names() == ["string"]
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<SchemaType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_only: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Schema {
    pub fn of_type(name: &str) -> Self {
        Schema {
            schema_type: Some(SchemaType::Single(name.to_string())),
            ..Default::default()
        }
    }

    /// Interpret raw output file content as a JSON value.
    ///
    /// String-typed (or untyped) definitions take the content verbatim; every
    /// other type parses it as JSON.
    pub fn parse_content(&self, content: &str) -> std::result::Result<Value, String> {
        match &self.schema_type {
            None => Ok(Value::String(content.to_string())),
            Some(t) if t.is_string_only() => Ok(Value::String(content.to_string())),
            Some(t) => match serde_json::from_str::<Value>(content.trim()) {
                Ok(v) => Ok(v),
                Err(_) if t.allows("string") => Ok(Value::String(content.to_string())),
                Err(e) => Err(format!("content is not valid JSON: {e}")),
            },
        }
    }

    /// Check `value` against the full definition.
    ///
    /// Every violation is reported, joined into one message.
    pub fn validate(&self, value: &Value) -> std::result::Result<(), String> {
        let raw = serde_json::to_value(self).map_err(|e| format!("invalid definition: {e}"))?;
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&raw)
            .map_err(|e| format!("invalid definition: {e}"))?;
        if let Err(violations) = compiled.validate(value) {
            let reasons: Vec<String> = violations.map(|e| e.to_string()).collect();
            return Err(reasons.join("; "));
        }
        Ok(())
    }
}

/// Render a definition default the way an output file would contain it.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

static ENV_NAME_RE: OnceLock<Regex> = OnceLock::new();

/// Environment variable names accepted as injection destinations.
pub(crate) fn env_name_re() -> &'static Regex {
    ENV_NAME_RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
