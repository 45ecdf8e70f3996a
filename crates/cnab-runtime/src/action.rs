//! Runs claims through drivers and records what happened.
//!
//! ```text
//! Claim ─► resolve_operation ─► OperationConfig* ─► Driver::run
//!                                                      │
//!             ClaimResult (succeeded | failed) ◄───────┘
//!                   │
//!     save_operation_result: result, then outputs
//! ```
//!
//! Recording a `running` result before dispatch is the caller's choice
//! ([`ActionRunner::save_initial_claim`]); [`ActionRunner::run_action`] does
//! all of it in one call.

use std::sync::Arc;

use tracing::{debug, info, warn};

use cnab_core::claim::{Claim, ClaimResult, Output, Status, OUTPUT_INVOCATION_IMAGE_LOGS};
use cnab_core::{AggregateError, ClaimStore, CnabError, Result};
use cnab_driver::{
    BufferSink, Context, Driver, DriverRegistry, Operation, OperationConfig, OperationResult,
    OutputSink, TeeSink,
};

use crate::resolve::{resolve_operation, CredentialSet};

pub struct ActionRunner {
    registry: Arc<DriverRegistry>,
    claims: Arc<ClaimStore>,
    /// Driver name used instead of the image type, when set.
    driver: Option<String>,
    save_all_outputs: bool,
    save_logs: bool,
}

impl ActionRunner {
    pub fn new(registry: Arc<DriverRegistry>, claims: Arc<ClaimStore>) -> Self {
        Self {
            registry,
            claims,
            driver: None,
            save_all_outputs: false,
            save_logs: false,
        }
    }

    /// Dispatch every claim to the named driver regardless of image type.
    pub fn with_driver(mut self, name: impl Into<String>) -> Self {
        self.driver = Some(name.into());
        self
    }

    /// Also store outputs the bundle does not declare.
    pub fn with_save_all_outputs(mut self, enabled: bool) -> Self {
        self.save_all_outputs = enabled;
        self
    }

    /// Store the invocation image's stdout as an output of each result.
    pub fn with_save_logs(mut self, enabled: bool) -> Self {
        self.save_logs = enabled;
        self
    }

    pub fn claims(&self) -> &Arc<ClaimStore> {
        &self.claims
    }

    /// Persist `claim` along with a first result in `status`, typically
    /// `running`, so an attempt is visible before it finishes.
    pub fn save_initial_claim(&self, claim: &Claim, status: Status) -> Result<ClaimResult> {
        self.claims.save_claim(claim)?;
        let result = claim.new_result(status);
        self.claims.save_result(&result)?;
        debug!(installation = %claim.installation, claim = %claim.id, %status, "saved initial claim");
        Ok(result)
    }

    /// Save `claim` unless it is already stored, so results recorded for it
    /// are reachable from its installation.
    fn ensure_claim(&self, claim: &Claim) -> Result<()> {
        match self.claims.save_claim(claim) {
            Err(CnabError::AlreadyExists { .. }) => Ok(()),
            other => other,
        }
    }

    fn select_driver(&self, op: &Operation) -> Result<Arc<dyn Driver>> {
        let Some(name) = &self.driver else {
            return self.registry.for_image(&op.image);
        };
        let driver = self.registry.lookup(name)?;
        if !driver.handles(&op.image.image_type) {
            return Err(CnabError::Configuration(format!(
                "driver '{name}' does not support image type '{}'",
                op.image.image_type
            )));
        }
        Ok(driver)
    }

    /// Resolve and execute `claim`.
    ///
    /// On success the returned result is `succeeded`, or `failed` when the
    /// driver reported an error after starting; it is not persisted yet
    /// (see [`save_operation_result`](Self::save_operation_result)).
    ///
    /// When nothing could be executed a `failed` result is persisted here,
    /// along with the claim if it was not saved yet, and the cause is
    /// returned. If persisting fails too, every error comes back together as
    /// an aggregate.
    pub async fn run(
        &self,
        ctx: &Context,
        claim: &Claim,
        credentials: &CredentialSet,
        configs: Vec<OperationConfig>,
    ) -> Result<(OperationResult, ClaimResult)> {
        match self.dispatch(ctx, claim, credentials, configs).await {
            Ok(op_result) => {
                let result = match &op_result.error {
                    None => claim.new_result(Status::Succeeded),
                    Some(e) => claim.new_result(Status::Failed).with_message(e.to_string()),
                };
                Ok((op_result, result))
            }
            Err(cause) => {
                warn!(
                    installation = %claim.installation,
                    action = %claim.action,
                    error = %cause,
                    "action failed"
                );
                let failed = claim
                    .new_result(Status::Failed)
                    .with_message(cause.to_string());
                let mut errors = AggregateError::new();
                errors.push(cause);
                errors.collect(self.ensure_claim(claim));
                errors.collect(self.claims.save_result(&failed));
                Err(errors
                    .into_error()
                    .unwrap_or_else(|| CnabError::Execution("action failed".into())))
            }
        }
    }

    async fn dispatch(
        &self,
        ctx: &Context,
        claim: &Claim,
        credentials: &CredentialSet,
        configs: Vec<OperationConfig>,
    ) -> Result<OperationResult> {
        let mut op = resolve_operation(claim, credentials)?;
        for configure in configs {
            configure(&mut op)?;
        }
        let driver = self.select_driver(&op)?;

        let logs = self.save_logs.then(BufferSink::new);
        if let Some(copy) = &logs {
            let primary: OutputSink = match op.out.take() {
                Some(sink) => sink,
                None => Box::new(tokio::io::stdout()),
            };
            op.out = Some(Box::new(TeeSink::new(primary, copy.clone())));
        }

        info!(
            installation = %claim.installation,
            action = %claim.action,
            claim = %claim.id,
            driver = driver.name(),
            "running action"
        );
        let mut op_result = driver.run(ctx, op).await?;

        if let Some(copy) = logs {
            op_result
                .outputs
                .insert(OUTPUT_INVOCATION_IMAGE_LOGS.to_string(), copy.contents());
        }
        Ok(op_result)
    }

    /// Persist `result` and then the outputs in `op_result`.
    ///
    /// The claim is saved first if it is not stored yet. Declared outputs are
    /// checked against their schema; invalid ones are reported and not
    /// stored. Undeclared outputs are stored only with `save_all_outputs`,
    /// except captured logs with `save_logs`.
    ///
    /// The error the driver reported, if any, leads the returned errors,
    /// followed by every validation and persistence failure.
    pub fn save_operation_result(
        &self,
        op_result: OperationResult,
        claim: &Claim,
        result: &mut ClaimResult,
    ) -> Result<()> {
        let OperationResult { outputs, error } = op_result;
        let mut errors = AggregateError::new();
        if let Some(e) = error {
            errors.push(e);
        }
        let mut keep = Vec::new();

        for (name, content) in outputs {
            let declared = claim.bundle.outputs.contains_key(&name);
            if declared {
                if let Some(schema) = claim.bundle.output_definition(&name) {
                    let checked = std::str::from_utf8(&content)
                        .map_err(|e| format!("content is not valid UTF-8: {e}"))
                        .and_then(|text| schema.parse_content(text))
                        .and_then(|value| schema.validate(&value));
                    if let Err(reason) = checked {
                        errors.push(CnabError::InvalidOutput { name, reason });
                        continue;
                    }
                }
            } else {
                let is_logs = name == OUTPUT_INVOCATION_IMAGE_LOGS && self.save_logs;
                if !is_logs && !self.save_all_outputs {
                    debug!(output = %name, "discarding undeclared output");
                    continue;
                }
            }
            result.record_output(name.clone(), &content, declared);
            keep.push(Output::new(&claim.id, &result.id, name, content));
        }

        errors.collect(self.ensure_claim(claim));
        errors.collect(self.claims.save_result(result));
        for output in &keep {
            errors.collect(self.claims.save_output(output));
        }

        if !errors.is_empty() {
            warn!(claim = %claim.id, result = %result.id, failures = errors.len(), "action did not complete cleanly");
        }
        errors.into_result()
    }

    /// Save the claim with a `running` result, run it, and save the outcome.
    ///
    /// Returns the persisted final result. A failed execution is returned as
    /// an error, aggregated with any failure to persist it.
    pub async fn run_action(
        &self,
        ctx: &Context,
        claim: &Claim,
        credentials: &CredentialSet,
        configs: Vec<OperationConfig>,
    ) -> Result<ClaimResult> {
        self.save_initial_claim(claim, Status::Running)?;
        let (op_result, mut result) = self.run(ctx, claim, credentials, configs).await?;
        self.save_operation_result(op_result, claim, &mut result)?;
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
