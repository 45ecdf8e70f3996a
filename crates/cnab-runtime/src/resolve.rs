//! Turning a claim and its credentials into an [`Operation`].
//!
//! Everything injected into the invocation image is derived from the claim
//! alone and serialized deterministically: the same claim (same ID,
//! revision and creation time) always yields byte-identical files.

use std::collections::BTreeMap;

use cnab_core::claim::{Claim, CLAIMS_SCHEMA_VERSION};
use cnab_core::schema::render_value;
use cnab_core::{CnabError, Result};
use cnab_driver::Operation;

pub const BUNDLE_PATH: &str = "/cnab/bundle.json";
pub const CLAIM_PATH: &str = "/cnab/claim.json";
pub const IMAGE_MAP_PATH: &str = "/cnab/app/image-map.json";

pub const ENV_ACTION: &str = "CNAB_ACTION";
pub const ENV_BUNDLE_NAME: &str = "CNAB_BUNDLE_NAME";
pub const ENV_BUNDLE_VERSION: &str = "CNAB_BUNDLE_VERSION";
pub const ENV_CLAIMS_VERSION: &str = "CNAB_CLAIMS_VERSION";
pub const ENV_INSTALLATION_NAME: &str = "CNAB_INSTALLATION_NAME";
pub const ENV_REVISION: &str = "CNAB_REVISION";

/// Resolved credential values by credential name.
pub type CredentialSet = BTreeMap<String, String>;

/// Environment variable a parameter lands in when it declares no destination.
pub fn default_parameter_env(name: &str) -> String {
    let name: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("CNAB_P_{name}")
}

pub fn resolve_operation(claim: &Claim, credentials: &CredentialSet) -> Result<Operation> {
    let bundle = &claim.bundle;
    bundle.validate_action(&claim.action)?;
    let image = bundle.invocation_images.first().cloned().ok_or_else(|| {
        CnabError::Configuration(format!(
            "bundle {} declares no invocation images",
            bundle.name
        ))
    })?;

    let mut op = Operation {
        installation: claim.installation.clone(),
        revision: claim.revision.clone(),
        action: claim.action.clone(),
        parameters: claim.parameters.clone(),
        image,
        bundle: Some(bundle.clone()),
        ..Default::default()
    };

    let env = &mut op.environment;
    env.insert(ENV_ACTION.into(), claim.action.clone());
    env.insert(ENV_BUNDLE_NAME.into(), bundle.name.clone());
    env.insert(ENV_BUNDLE_VERSION.into(), bundle.version.clone());
    env.insert(ENV_CLAIMS_VERSION.into(), CLAIMS_SCHEMA_VERSION.into());
    env.insert(ENV_INSTALLATION_NAME.into(), claim.installation.clone());
    env.insert(ENV_REVISION.into(), claim.revision.clone());

    op.files
        .insert(IMAGE_MAP_PATH.into(), serde_json::to_string(&bundle.images)?);
    op.files
        .insert(BUNDLE_PATH.into(), serde_json::to_string(bundle)?);
    op.files.insert(CLAIM_PATH.into(), serde_json::to_string(claim)?);

    inject_parameters(claim, &mut op)?;
    inject_credentials(claim, credentials, &mut op)?;

    for (name, output) in &bundle.outputs {
        if !output.applies_to(&claim.action) {
            continue;
        }
        let path = output
            .path
            .clone()
            .unwrap_or_else(|| Operation::output_path(name));
        op.outputs.insert(path, name.clone());
    }

    Ok(op)
}

fn inject_parameters(claim: &Claim, op: &mut Operation) -> Result<()> {
    let bundle = &claim.bundle;
    for (name, param) in &bundle.parameters {
        if !param.applies_to(&claim.action) {
            continue;
        }
        let supplied = claim.parameters.as_ref().and_then(|p| p.get(name));
        let default = bundle
            .parameter_definition(name)
            .and_then(|d| d.default.as_ref());
        let Some(value) = supplied.or(default) else {
            if param.required {
                return Err(CnabError::Configuration(format!(
                    "parameter '{name}' is required by action '{}'",
                    claim.action
                )));
            }
            continue;
        };
        let value = render_value(value);

        let destination = param.destination.clone().unwrap_or_default();
        if destination.env.is_none() && destination.path.is_none() {
            op.environment.insert(default_parameter_env(name), value);
            continue;
        }
        if let Some(env) = destination.env {
            op.environment.insert(env, value.clone());
        }
        if let Some(path) = destination.path {
            op.files.insert(path, value);
        }
    }
    Ok(())
}

fn inject_credentials(claim: &Claim, credentials: &CredentialSet, op: &mut Operation) -> Result<()> {
    for (name, cred) in &claim.bundle.credentials {
        if !cred.applies_to(&claim.action) {
            continue;
        }
        let Some(value) = credentials.get(name) else {
            if cred.required {
                return Err(CnabError::Configuration(format!(
                    "credential '{name}' is required by action '{}'",
                    claim.action
                )));
            }
            continue;
        };
        if let Some(env) = &cred.env {
            op.environment.insert(env.clone(), value.clone());
        }
        if let Some(path) = &cred.path {
            op.files.insert(path.clone(), value.clone());
        }
    }
    Ok(())
}
