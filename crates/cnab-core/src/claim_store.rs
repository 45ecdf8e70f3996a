//! Typed persistence of claims, results and outputs.
//!
//! # Layout on the backend
//!
//! ```text
//! installations  group ""            name <installation>
//! claims         group <installation> name <claim id>
//! results        group <claim id>     name <result id>
//! outputs        group <result id>    name <result id>-<output name>
//! ```
//!
//! Every payload (including output content) passes through the encryption
//! handler on the way in and the decryption handler on the way out.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::claim::output::output_key;
use crate::claim::{Claim, ClaimResult, Installation, Output, Status};
use crate::error::{AggregateError, CnabError, Result};
use crate::store::{
    MemoryStore, Store, ITEM_TYPE_CLAIM, ITEM_TYPE_INSTALLATION, ITEM_TYPE_OUTPUT,
    ITEM_TYPE_RESULT,
};

/// Transforms a payload before it is written or after it is read.
pub type EncryptionHandler = Arc<dyn Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync>;

fn no_op_handler() -> EncryptionHandler {
    Arc::new(|data: &[u8]| Ok(data.to_vec()))
}

pub struct ClaimStore {
    backend: Arc<dyn Store>,
    encrypt: EncryptionHandler,
    decrypt: EncryptionHandler,
}

impl ClaimStore {
    /// A claim store over `backend`. `None` handlers store payloads as-is.
    pub fn new(
        backend: Arc<dyn Store>,
        encrypt: Option<EncryptionHandler>,
        decrypt: Option<EncryptionHandler>,
    ) -> Self {
        Self {
            backend,
            encrypt: encrypt.unwrap_or_else(no_op_handler),
            decrypt: decrypt.unwrap_or_else(no_op_handler),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), None, None)
    }

    pub fn backend(&self) -> &Arc<dyn Store> {
        &self.backend
    }

    // -----------------------------------------------------------------------
    // Payload helpers
    // -----------------------------------------------------------------------

    fn write(&self, item_type: &str, group: &str, name: &str, data: &[u8]) -> Result<()> {
        let sealed = (self.encrypt)(data)?;
        self.backend.save(item_type, group, name, &sealed)
    }

    fn fetch(&self, item_type: &str, name: &str) -> Result<Vec<u8>> {
        let sealed = self.backend.read(item_type, name)?;
        (self.decrypt)(&sealed)
    }

    /// Write a record that must not exist yet.
    fn write_new(&self, item_type: &str, group: &str, name: &str, data: &[u8]) -> Result<()> {
        let sealed = (self.encrypt)(data)?;
        self.backend.insert(item_type, group, name, &sealed)
    }

    // -----------------------------------------------------------------------
    // Claims
    // -----------------------------------------------------------------------

    /// Persist a new claim. Claims are immutable: saving an ID that is
    /// already stored fails with `CnabError::AlreadyExists`.
    pub fn save_claim(&self, claim: &Claim) -> Result<()> {
        claim.validate()?;
        let data = serde_json::to_vec(claim)?;
        self.write_new(ITEM_TYPE_CLAIM, &claim.installation, &claim.id, &data)?;
        self.backend
            .save(ITEM_TYPE_INSTALLATION, "", &claim.installation, &[])?;
        debug!(
            installation = %claim.installation,
            claim = %claim.id,
            action = %claim.action,
            "saved claim"
        );
        Ok(())
    }

    pub fn read_claim(&self, id: &str) -> Result<Claim> {
        let data = self.fetch(ITEM_TYPE_CLAIM, id)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Claims of an installation ordered by creation time, oldest first.
    /// Claims created at the same instant keep the order they were saved in.
    pub fn list_claims(&self, installation: &str) -> Result<Vec<Claim>> {
        let mut claims = self
            .backend
            .list(ITEM_TYPE_CLAIM, installation)?
            .iter()
            .map(|id| self.read_claim(id))
            .collect::<Result<Vec<_>>>()?;
        claims.sort_by_key(|c| c.created);
        Ok(claims)
    }

    pub fn read_last_claim(&self, installation: &str) -> Result<Claim> {
        self.list_claims(installation)?
            .pop()
            .ok_or_else(|| CnabError::not_found(ITEM_TYPE_CLAIM, installation))
    }

    // -----------------------------------------------------------------------
    // Installations
    // -----------------------------------------------------------------------

    /// Names of every installation with at least one saved claim, sorted.
    pub fn list_installations(&self) -> Result<Vec<String>> {
        let mut names = self.backend.list(ITEM_TYPE_INSTALLATION, "")?;
        names.sort();
        Ok(names)
    }

    pub fn read_installation(&self, name: &str) -> Result<Installation> {
        let claims = self.list_claims(name)?;
        let Some(latest) = claims.last() else {
            return Err(CnabError::not_found(ITEM_TYPE_INSTALLATION, name));
        };
        let latest_results = self.list_results(&latest.id)?;
        Ok(Installation {
            name: name.to_string(),
            claims,
            latest_results,
        })
    }

    /// Status of the latest attempt on the installation's latest claim.
    pub fn read_installation_status(&self, name: &str) -> Result<Status> {
        let claim = self.read_last_claim(name)?;
        match self.read_last_result(&claim.id) {
            Ok(r) => Ok(r.status),
            Err(e) if e.is_not_found() => Ok(Status::Unknown),
            Err(e) => Err(e),
        }
    }

    // -----------------------------------------------------------------------
    // Results
    // -----------------------------------------------------------------------

    /// Append a result to its claim. Results are never overwritten: an ID
    /// that is already stored fails with `CnabError::AlreadyExists`, even
    /// when two writers race.
    pub fn save_result(&self, result: &ClaimResult) -> Result<()> {
        if result.id.is_empty() || result.claim_id.is_empty() {
            return Err(CnabError::Persistence(
                "result must have an id and a claim id".into(),
            ));
        }
        let data = serde_json::to_vec(result)?;
        self.write_new(ITEM_TYPE_RESULT, &result.claim_id, &result.id, &data)?;
        debug!(
            claim = %result.claim_id,
            result = %result.id,
            status = %result.status,
            "saved result"
        );
        Ok(())
    }

    pub fn read_result(&self, id: &str) -> Result<ClaimResult> {
        let data = self.fetch(ITEM_TYPE_RESULT, id)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Results of a claim ordered by creation time, oldest first.
    pub fn list_results(&self, claim_id: &str) -> Result<Vec<ClaimResult>> {
        let mut results = self
            .backend
            .list(ITEM_TYPE_RESULT, claim_id)?
            .iter()
            .map(|id| self.read_result(id))
            .collect::<Result<Vec<_>>>()?;
        results.sort_by_key(|r| r.created);
        Ok(results)
    }

    pub fn read_last_result(&self, claim_id: &str) -> Result<ClaimResult> {
        self.list_results(claim_id)?
            .pop()
            .ok_or_else(|| CnabError::not_found(ITEM_TYPE_RESULT, claim_id))
    }

    // -----------------------------------------------------------------------
    // Outputs
    // -----------------------------------------------------------------------

    pub fn save_output(&self, output: &Output) -> Result<()> {
        if output.name.is_empty() {
            return Err(CnabError::Persistence("output name is empty".into()));
        }
        self.write(
            ITEM_TYPE_OUTPUT,
            &output.result_id,
            &output.key(),
            &output.value,
        )?;
        debug!(result = %output.result_id, output = %output.name, "saved output");
        Ok(())
    }

    pub fn read_output(&self, result_id: &str, name: &str) -> Result<Output> {
        let result = self.read_result(result_id)?;
        let value = self.fetch(ITEM_TYPE_OUTPUT, &output_key(result_id, name))?;
        Ok(Output::new(result.claim_id, result_id, name, value))
    }

    /// Names of the outputs saved for a result, in the order they were saved.
    pub fn list_outputs(&self, result_id: &str) -> Result<Vec<String>> {
        let prefix = output_key(result_id, "");
        Ok(self
            .backend
            .list(ITEM_TYPE_OUTPUT, result_id)?
            .into_iter()
            .map(|key| match key.strip_prefix(&prefix) {
                Some(name) => name.to_string(),
                None => key,
            })
            .collect())
    }

    /// The most recent value of an output across the installation's history.
    pub fn read_last_output(&self, installation: &str, name: &str) -> Result<Output> {
        for claim in self.list_claims(installation)?.iter().rev() {
            for result in self.list_results(&claim.id)?.iter().rev() {
                match self.read_output(&result.id, name) {
                    Ok(output) => return Ok(output),
                    Err(e) if e.is_not_found() => continue,
                    Err(e) => return Err(e),
                }
            }
        }
        Err(CnabError::not_found(
            ITEM_TYPE_OUTPUT,
            format!("{installation}/{name}"),
        ))
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    /// Remove an installation and everything recorded for it, deleting
    /// outputs before results before claims.
    ///
    /// A failure does not stop the cascade: every remaining record is still
    /// attempted and all failures are returned together.
    pub fn delete_installation(&self, name: &str) -> Result<()> {
        let mut errors = AggregateError::new();

        let claim_ids = errors
            .collect(self.backend.list(ITEM_TYPE_CLAIM, name))
            .unwrap_or_default();
        for claim_id in &claim_ids {
            let result_ids = errors
                .collect(self.backend.list(ITEM_TYPE_RESULT, claim_id))
                .unwrap_or_default();
            for result_id in &result_ids {
                let output_keys = errors
                    .collect(self.backend.list(ITEM_TYPE_OUTPUT, result_id))
                    .unwrap_or_default();
                for key in &output_keys {
                    errors.collect(self.backend.delete(ITEM_TYPE_OUTPUT, key));
                }
                errors.collect(self.backend.delete(ITEM_TYPE_RESULT, result_id));
            }
            errors.collect(self.backend.delete(ITEM_TYPE_CLAIM, claim_id));
        }
        errors.collect(self.backend.delete(ITEM_TYPE_INSTALLATION, name));

        if errors.is_empty() {
            info!(installation = %name, claims = claim_ids.len(), "deleted installation");
        } else {
            warn!(
                installation = %name,
                failures = errors.len(),
                "installation only partially deleted"
            );
        }
        errors.into_result()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
