//! Runs invocation images as docker containers.
//!
//! One run is one container:
//!
//! ```text
//! resolve reference ─► pull (if needed) ─► create ─► copy files in
//!        ─► start + stream output ─► copy outputs out ─► remove
//! ```
//!
//! The container is removed on every path out of [`DockerDriver::run`],
//! including cancellation and failure, unless `CLEANUP_CONTAINERS` is off.

pub mod cli;
pub mod reference;
pub mod runtime;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::driver::{Configurable, Driver};
use crate::operation::{Operation, OperationResult};
use crate::sink::OutputSink;
use cnab_core::schema::render_value;
use cnab_core::{AggregateError, CnabError, Result};

pub use cli::DockerCli;
pub use runtime::{ContainerRuntime, ContainerSpec, ENTRYPOINT};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const CONFIG_VERBOSE: &str = "VERBOSE";
pub const CONFIG_PULL_ALWAYS: &str = "PULL_ALWAYS";
pub const CONFIG_QUIET: &str = "DOCKER_DRIVER_QUIET";
pub const CONFIG_OUTPUTS_MOUNT_PATH: &str = "OUTPUTS_MOUNT_PATH";
pub const CONFIG_CLEANUP_CONTAINERS: &str = "CLEANUP_CONTAINERS";
pub const CONFIG_DOCKER_BINARY: &str = "DOCKER_BINARY";

const CONFIG_KEYS: [&str; 6] = [
    CONFIG_VERBOSE,
    CONFIG_PULL_ALWAYS,
    CONFIG_QUIET,
    CONFIG_OUTPUTS_MOUNT_PATH,
    CONFIG_CLEANUP_CONTAINERS,
    CONFIG_DOCKER_BINARY,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerConfig {
    /// Forward container stderr to this process when no error sink is set.
    pub verbose: bool,
    /// Pull the image even when it is present locally.
    pub pull_always: bool,
    /// Suppress pull progress.
    pub quiet: bool,
    /// Parent directory for temporary file staging.
    pub outputs_mount_path: Option<PathBuf>,
    pub cleanup_containers: bool,
    pub binary: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            pull_always: false,
            quiet: false,
            outputs_mount_path: None,
            cleanup_containers: true,
            binary: "docker".to_string(),
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(CnabError::Configuration(format!(
            "{key} must be a boolean, got '{other}'"
        ))),
    }
}

impl DockerConfig {
    /// Apply every recognised key in `settings` on top of the current values.
    pub fn apply(&mut self, settings: &BTreeMap<String, String>) -> Result<()> {
        for (key, value) in settings {
            match key.as_str() {
                CONFIG_VERBOSE => self.verbose = parse_bool(key, value)?,
                CONFIG_PULL_ALWAYS => self.pull_always = parse_bool(key, value)?,
                CONFIG_QUIET => self.quiet = parse_bool(key, value)?,
                CONFIG_CLEANUP_CONTAINERS => self.cleanup_containers = parse_bool(key, value)?,
                CONFIG_OUTPUTS_MOUNT_PATH => {
                    self.outputs_mount_path =
                        Some(value.trim()).filter(|v| !v.is_empty()).map(PathBuf::from);
                }
                CONFIG_DOCKER_BINARY => {
                    let binary = value.trim();
                    if binary.is_empty() {
                        return Err(CnabError::Configuration(format!("{key} is empty")));
                    }
                    self.binary = binary.to_string();
                }
                other => debug!(key = other, "ignoring unknown docker driver setting"),
            }
        }
        Ok(())
    }

    pub fn from_map(settings: &BTreeMap<String, String>) -> Result<Self> {
        let mut config = Self::default();
        config.apply(settings)?;
        Ok(config)
    }

    /// Read the recognised keys from the process environment. Invalid values
    /// are logged and left at their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        for key in CONFIG_KEYS {
            let Ok(value) = std::env::var(key) else {
                continue;
            };
            let single = BTreeMap::from([(key.to_string(), value)]);
            if let Err(e) = config.apply(&single) {
                warn!(error = %e, "ignoring docker driver setting from environment");
            }
        }
        config
    }

    fn cli(&self) -> DockerCli {
        let cli = DockerCli::new(&self.binary).with_quiet_pull(self.quiet);
        match &self.outputs_mount_path {
            Some(dir) => cli.with_staging_dir(dir),
            None => cli,
        }
    }
}

// ---------------------------------------------------------------------------
// DockerDriver
// ---------------------------------------------------------------------------

pub struct DockerDriver {
    runtime: Arc<dyn ContainerRuntime>,
    config: DockerConfig,
    /// Set when the runtime was injected, so reconfiguring keeps it.
    custom_runtime: bool,
}

impl DockerDriver {
    pub fn new(config: DockerConfig) -> Self {
        Self {
            runtime: Arc::new(config.cli()),
            config,
            custom_runtime: false,
        }
    }

    pub fn from_env() -> Self {
        Self::new(DockerConfig::from_env())
    }

    pub fn with_runtime(runtime: Arc<dyn ContainerRuntime>, config: DockerConfig) -> Self {
        Self {
            runtime,
            config,
            custom_runtime: true,
        }
    }

    pub fn config(&self) -> &DockerConfig {
        &self.config
    }

    async fn ensure_image(&self, ctx: &Context, image: &str) -> Result<()> {
        let present = !self.config.pull_always
            && until_cancelled(ctx, self.runtime.image_exists(image)).await?;
        if !present {
            info!(image, "pulling invocation image");
            until_cancelled(ctx, self.runtime.pull(image)).await?;
        }
        Ok(())
    }

    fn default_sinks(&self, op: &mut Operation) -> (OutputSink, OutputSink) {
        let out: OutputSink = match op.out.take() {
            Some(sink) => sink,
            None => Box::new(tokio::io::stdout()),
        };
        let err: OutputSink = match op.err.take() {
            Some(sink) => sink,
            None if self.config.verbose => Box::new(tokio::io::stderr()),
            None => Box::new(tokio::io::sink()),
        };
        (out, err)
    }

    /// Everything between creating the container and reading its outputs.
    /// Cleanup is the caller's job.
    async fn execute(
        &self,
        ctx: &Context,
        spec: &ContainerSpec,
        op: &Operation,
        out: &mut OutputSink,
        err: &mut OutputSink,
    ) -> Result<OperationResult> {
        let id = until_cancelled(ctx, self.runtime.create(spec)).await?;
        debug!(container = %id, name = %spec.name, image = %spec.image, "created container");

        until_cancelled(ctx, self.runtime.copy_in(&id, &op.files)).await?;
        ctx.check()?;

        info!(
            installation = %op.installation,
            action = %op.action,
            container = %spec.name,
            "starting invocation image"
        );
        let code = tokio::select! {
            biased;
            cause = ctx.cancelled() => {
                warn!(container = %spec.name, "run cancelled, stopping container");
                if let Err(e) = self.runtime.kill(&id).await {
                    warn!(container = %spec.name, error = %e, "failed to stop container");
                }
                return Err(cause);
            }
            code = self.runtime.start_attached(&id, out, err) => code?,
        };
        info!(container = %spec.name, exit_code = code, "invocation image exited");

        let mut errors = AggregateError::new();
        if code != 0 {
            errors.push(CnabError::Execution(format!("container exit code: {code}")));
        }

        let mut result = OperationResult::default();
        for (path, name) in &op.outputs {
            if !applies(op, name) {
                debug!(output = %name, action = %op.action, "output does not apply to action");
                continue;
            }
            match until_cancelled(ctx, self.runtime.copy_out(&id, path)).await {
                Ok(content) => {
                    result.outputs.insert(name.clone(), content);
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => match output_default(op, name) {
                    Some(default) => {
                        debug!(output = %name, "output not written, using default");
                        result.outputs.insert(name.clone(), default);
                    }
                    None => errors.push(CnabError::OutputExtraction {
                        name: name.clone(),
                        reason: e.to_string(),
                    }),
                },
            }
        }
        fill_defaults(op, &mut result);

        result.error = errors.into_error();
        Ok(result)
    }
}

/// An output with no bundle declaration is always extracted.
fn applies(op: &Operation, name: &str) -> bool {
    match op.bundle.as_ref().and_then(|b| b.outputs.get(name)) {
        Some(_) => op.output_applies(name),
        None => true,
    }
}

fn output_default(op: &Operation, name: &str) -> Option<Vec<u8>> {
    op.bundle
        .as_ref()?
        .output_definition(name)?
        .default
        .as_ref()
        .map(|v| render_value(v).into_bytes())
}

/// Declared outputs that apply to the action but were not requested still
/// get their default value, if they have one.
fn fill_defaults(op: &Operation, result: &mut OperationResult) {
    let Some(bundle) = &op.bundle else {
        return;
    };
    for (name, output) in &bundle.outputs {
        if result.outputs.contains_key(name) || !output.applies_to(&op.action) {
            continue;
        }
        if let Some(default) = output_default(op, name) {
            result.outputs.insert(name.clone(), default);
        }
    }
}

async fn until_cancelled<T>(ctx: &Context, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        cause = ctx.cancelled() => Err(cause),
        res = fut => res,
    }
}

static CONTAINER_SEQ: AtomicU64 = AtomicU64::new(0);

/// A container name unique to this process and call.
fn container_name(installation: &str) -> String {
    let slug: String = installation
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') { c } else { '-' })
        .collect();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    let seq = CONTAINER_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("cnab-{slug}-{}-{nanos:09}-{seq}", std::process::id())
}

#[async_trait]
impl Driver for DockerDriver {
    fn name(&self) -> &str {
        "docker"
    }

    fn handles(&self, image_type: &str) -> bool {
        matches!(image_type, "docker" | "oci")
    }

    async fn run(&self, ctx: &Context, mut op: Operation) -> Result<OperationResult> {
        ctx.check()?;
        if !self.handles(&op.image.image_type) {
            return Err(CnabError::Configuration(format!(
                "docker driver does not support image type '{}'",
                op.image.image_type
            )));
        }
        let image = reference::resolve(&op.image)?;
        self.ensure_image(ctx, &image).await?;

        let spec = ContainerSpec {
            name: container_name(&op.installation),
            image,
            env: op.environment.clone(),
            entrypoint: ENTRYPOINT.to_string(),
        };
        let (mut out, mut err) = self.default_sinks(&mut op);

        let outcome = self.execute(ctx, &spec, &op, &mut out, &mut err).await;

        if !self.config.cleanup_containers {
            debug!(container = %spec.name, "leaving container in place");
            return outcome;
        }
        match (outcome, self.runtime.remove(&spec.name).await) {
            (outcome, Ok(())) => {
                debug!(container = %spec.name, "removed container");
                outcome
            }
            (Ok(mut result), Err(e)) => {
                warn!(container = %spec.name, error = %e, "failed to remove container");
                let mut errors = AggregateError::new();
                if let Some(prior) = result.error.take() {
                    errors.push(prior);
                }
                errors.push(e);
                result.error = errors.into_error();
                Ok(result)
            }
            (Err(cause), Err(e)) => {
                warn!(container = %spec.name, error = %e, "failed to remove container");
                Err(cause)
            }
        }
    }
}

impl Configurable for DockerDriver {
    fn config_options(&self) -> BTreeMap<&'static str, &'static str> {
        BTreeMap::from([
            (CONFIG_VERBOSE, "Forward container stderr when no error sink is set (true/false)"),
            (CONFIG_PULL_ALWAYS, "Always pull the invocation image (true/false)"),
            (CONFIG_QUIET, "Suppress image pull progress (true/false)"),
            (CONFIG_OUTPUTS_MOUNT_PATH, "Directory used to stage files copied into and out of containers"),
            (CONFIG_CLEANUP_CONTAINERS, "Remove containers after each run (default true)"),
            (CONFIG_DOCKER_BINARY, "Path to the docker client (default docker)"),
        ])
    }

    fn set_config(&mut self, settings: &BTreeMap<String, String>) -> Result<()> {
        let mut config = self.config.clone();
        config.apply(settings)?;
        if !self.custom_runtime {
            self.runtime = Arc::new(config.cli());
        }
        self.config = config;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
