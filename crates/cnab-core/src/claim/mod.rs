//! Claims: immutable records of an installation's lifecycle actions.
//!
//! ```text
//! Installation 1──* Claim 1──* ClaimResult 1──* Output
//! ```
//!
//! A claim is never modified after it is persisted. Every new action on an
//! installation produces a new claim via [`Claim::derive`], and every
//! execution attempt against a claim produces a new [`ClaimResult`].

pub mod installation;
pub mod output;
pub mod result;
pub mod status;

use std::collections::BTreeMap;
use std::sync::{Mutex, OnceLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::{Generator, Ulid};

use crate::bundle::Bundle;
use crate::error::{CnabError, Result};

pub use installation::Installation;
pub use output::{Output, OUTPUT_INVOCATION_IMAGE_LOGS};
pub use result::{ClaimResult, OutputMetadata};
pub use status::Status;

/// Version of the claim document format, exposed to invocation images as
/// `CNAB_CLAIMS_VERSION`.
pub const CLAIMS_SCHEMA_VERSION: &str = "1.0.0-DRAFT+b5ed2f3";

pub type Parameters = BTreeMap<String, Value>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

static ULIDS: OnceLock<Mutex<Generator>> = OnceLock::new();

/// A new lexicographically sortable identifier.
///
/// IDs generated within the same millisecond are strictly increasing, so
/// sorting by ID preserves creation order within this process.
pub fn new_ulid() -> String {
    let generator = ULIDS.get_or_init(|| Mutex::new(Generator::new()));
    let mut generator = match generator.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    };
    generator
        .generate()
        .unwrap_or_else(|_| Ulid::new())
        .to_string()
}

// ---------------------------------------------------------------------------
// Installation name validation
// ---------------------------------------------------------------------------

static INSTALLATION_RE: OnceLock<Regex> = OnceLock::new();

fn installation_re() -> &'static Regex {
    INSTALLATION_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap())
}

pub fn validate_installation_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 253 || !installation_re().is_match(name) {
        return Err(CnabError::InvalidInstallation(name.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Claim
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub schema_version: String,
    pub id: String,
    pub installation: String,
    pub revision: String,
    #[serde(with = "crate::timestamp")]
    pub created: DateTime<Utc>,
    pub action: String,
    pub bundle: Bundle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Parameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<Value>,
}

impl Claim {
    /// Create the first claim of an installation.
    pub fn new(
        installation: impl Into<String>,
        action: impl Into<String>,
        bundle: Bundle,
        parameters: Option<Parameters>,
    ) -> Result<Self> {
        let installation = installation.into();
        validate_installation_name(&installation)?;
        let action = action.into();
        if action.is_empty() {
            return Err(CnabError::InvalidClaim("action is empty".into()));
        }
        Ok(Self {
            schema_version: CLAIMS_SCHEMA_VERSION.to_string(),
            id: new_ulid(),
            installation,
            revision: new_ulid(),
            created: Utc::now(),
            action,
            bundle,
            bundle_reference: None,
            parameters,
            custom: None,
        })
    }

    /// Create the next claim for this installation.
    ///
    /// The new claim keeps the installation name and gets a fresh ID and
    /// creation time. Only actions that modify the installation get a new
    /// revision; read-only custom actions reuse the current one.
    pub fn derive(
        &self,
        action: impl Into<String>,
        bundle: Bundle,
        parameters: Option<Parameters>,
    ) -> Result<Self> {
        let mut next = Claim::new(self.installation.clone(), action, bundle, parameters)?;
        next.bundle_reference = self.bundle_reference.clone();
        if !next.is_modifying() {
            next.revision = self.revision.clone();
        }
        Ok(next)
    }

    /// Build a result for an execution attempt of this claim.
    pub fn new_result(&self, status: Status) -> ClaimResult {
        ClaimResult {
            id: new_ulid(),
            claim_id: self.id.clone(),
            created: Utc::now(),
            message: String::new(),
            status,
            outputs: BTreeMap::new(),
            custom: None,
        }
    }

    pub fn is_modifying(&self) -> bool {
        self.bundle.action_modifies(&self.action)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version.is_empty() {
            return Err(CnabError::InvalidClaim("schemaVersion is empty".into()));
        }
        if self.id.is_empty() {
            return Err(CnabError::InvalidClaim("id is empty".into()));
        }
        if self.revision.is_empty() {
            return Err(CnabError::InvalidClaim("revision is empty".into()));
        }
        if self.action.is_empty() {
            return Err(CnabError::InvalidClaim("action is empty".into()));
        }
        validate_installation_name(&self.installation)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
