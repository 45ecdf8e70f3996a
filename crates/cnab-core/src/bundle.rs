//! Bundle descriptor: the immutable input describing an application package.
//!
//! Field names follow the `bundle.json` wire format. Every map is a
//! `BTreeMap` and struct fields are declared in wire order, so serializing
//! the same bundle always yields the same bytes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CnabError, Result};
use crate::schema::{env_name_re, Schema};

pub const DEFAULT_BUNDLE_SCHEMA_VERSION: &str = "1.0.1";

pub const ACTION_INSTALL: &str = "install";
pub const ACTION_UPGRADE: &str = "upgrade";
pub const ACTION_UNINSTALL: &str = "uninstall";

/// Image type used when an invocation image leaves `imageType` unset.
pub const DEFAULT_IMAGE_TYPE: &str = "docker";

pub type Definitions = BTreeMap<String, Schema>;

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

fn default_image_type() -> String {
    DEFAULT_IMAGE_TYPE.to_string()
}

/// The image that implements the bundle's actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationImage {
    #[serde(default = "default_image_type")]
    pub image_type: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_digest: Option<String>,
}

impl InvocationImage {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image_type: default_image_type(),
            image: image.into(),
            content_digest: None,
        }
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.content_digest = Some(digest.into());
        self
    }
}

impl Default for InvocationImage {
    fn default() -> Self {
        Self::new("")
    }
}

/// A secondary image referenced by the bundle (rendered into the image map).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    #[serde(default = "default_image_type")]
    pub image_type: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Actions, parameters, credentials, outputs
// ---------------------------------------------------------------------------

/// A custom action declared by the bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleAction {
    #[serde(default, skip_serializing_if = "is_false")]
    pub modifies: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub stateless: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Where a value is injected inside the invocation image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub definition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub apply_to: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<Location>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
}

impl Parameter {
    pub fn applies_to(&self, action: &str) -> bool {
        applies_to(&self.apply_to, action)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub apply_to: Vec<String>,
}

impl Credential {
    pub fn applies_to(&self, action: &str) -> bool {
        applies_to(&self.apply_to, action)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    pub definition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub apply_to: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Output {
    pub fn applies_to(&self, action: &str) -> bool {
        applies_to(&self.apply_to, action)
    }
}

/// An empty `applyTo` list means "every action".
fn applies_to(apply_to: &[String], action: &str) -> bool {
    apply_to.is_empty() || apply_to.iter().any(|a| a == action)
}

fn is_false(b: &bool) -> bool {
    !*b
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub schema_version: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invocation_images: Vec<InvocationImage>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub images: BTreeMap<String, Image>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub actions: BTreeMap<String, BundleAction>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Parameter>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub credentials: BTreeMap<String, Credential>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub definitions: Definitions,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, Value>,
}

impl Bundle {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            schema_version: DEFAULT_BUNDLE_SCHEMA_VERSION.to_string(),
            name: name.into(),
            version: version.into(),
            description: String::new(),
            invocation_images: Vec::new(),
            images: BTreeMap::new(),
            actions: BTreeMap::new(),
            parameters: BTreeMap::new(),
            credentials: BTreeMap::new(),
            outputs: BTreeMap::new(),
            definitions: BTreeMap::new(),
            custom: BTreeMap::new(),
        }
    }

    pub fn is_builtin_action(action: &str) -> bool {
        matches!(action, ACTION_INSTALL | ACTION_UPGRADE | ACTION_UNINSTALL)
    }

    /// Built-in actions are always valid; custom actions must be declared.
    pub fn validate_action(&self, action: &str) -> Result<()> {
        if Self::is_builtin_action(action) || self.actions.contains_key(action) {
            return Ok(());
        }
        Err(CnabError::Configuration(format!(
            "action '{action}' is not defined in bundle {}",
            self.name
        )))
    }

    /// Whether running `action` changes the installation's state.
    pub fn action_modifies(&self, action: &str) -> bool {
        if Self::is_builtin_action(action) {
            return true;
        }
        self.actions.get(action).is_some_and(|a| a.modifies)
    }

    pub fn action_stateless(&self, action: &str) -> bool {
        self.actions.get(action).is_some_and(|a| a.stateless)
    }

    /// The schema backing the declared output `name`, if any.
    pub fn output_definition(&self, name: &str) -> Option<&Schema> {
        self.outputs
            .get(name)
            .and_then(|o| self.definitions.get(&o.definition))
    }

    pub fn parameter_definition(&self, name: &str) -> Option<&Schema> {
        self.parameters
            .get(name)
            .and_then(|p| self.definitions.get(&p.definition))
    }

    /// Check structural consistency: images present, references resolvable,
    /// injection destinations well-formed.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CnabError::Configuration("bundle name is empty".into()));
        }
        if self.invocation_images.is_empty() {
            return Err(CnabError::Configuration(format!(
                "bundle {} declares no invocation images",
                self.name
            )));
        }
        for (name, output) in &self.outputs {
            if !self.definitions.contains_key(&output.definition) {
                return Err(CnabError::Configuration(format!(
                    "output '{name}' references unknown definition '{}'",
                    output.definition
                )));
            }
        }
        for (name, param) in &self.parameters {
            if !self.definitions.contains_key(&param.definition) {
                return Err(CnabError::Configuration(format!(
                    "parameter '{name}' references unknown definition '{}'",
                    param.definition
                )));
            }
            if let Some(env) = param.destination.as_ref().and_then(|d| d.env.as_deref()) {
                check_env_name(name, env)?;
            }
        }
        for (name, cred) in &self.credentials {
            if let Some(env) = cred.env.as_deref() {
                check_env_name(name, env)?;
            }
        }
        Ok(())
    }
}

fn check_env_name(owner: &str, env: &str) -> Result<()> {
    if !env_name_re().is_match(env) {
        return Err(CnabError::Configuration(format!(
            "'{owner}' has invalid environment variable destination '{env}'"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
