use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::context::Context;
use crate::operation::{Operation, OperationResult};
use cnab_core::Result;

/// Executes an [`Operation`] through some invocation mechanism.
///
/// `run` returns `Err` when nothing was executed (configuration problems,
/// cancellation, runtime unavailable). Once the entry point has started,
/// failures are reported in [`OperationResult::error`] so any outputs
/// captured alongside them are not lost.
///
/// Implementations must check `ctx` before any side effect and race every
/// blocking external call against [`Context::cancelled`].
#[async_trait]
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this driver can run invocation images of `image_type`.
    fn handles(&self, image_type: &str) -> bool;

    async fn run(&self, ctx: &Context, op: Operation) -> Result<OperationResult>;
}

/// A driver whose behaviour can be tuned through string key/value pairs.
pub trait Configurable {
    /// Supported keys and a one-line description of each.
    fn config_options(&self) -> BTreeMap<&'static str, &'static str>;

    fn set_config(&mut self, settings: &BTreeMap<String, String>) -> Result<()>;
}
