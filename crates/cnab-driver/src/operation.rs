//! The fully resolved request a driver executes, and what it hands back.

use std::collections::BTreeMap;
use std::fmt;

use cnab_core::bundle::{Bundle, InvocationImage};
use cnab_core::claim::Parameters;
use cnab_core::CnabError;
use serde::Serialize;

use crate::sink::OutputSink;

/// Directory inside the execution environment where outputs are written.
pub const OUTPUTS_DIR: &str = "/cnab/app/outputs";

/// One action against one installation, ready to execute.
///
/// Serializes to the configuration printed by the debug driver; the sinks
/// are not part of it.
#[derive(Serialize, Default)]
pub struct Operation {
    #[serde(rename = "installation_name")]
    pub installation: String,
    pub revision: String,
    pub action: String,
    pub parameters: Option<Parameters>,
    pub image: InvocationImage,
    /// Variables exposed to the entry point.
    pub environment: BTreeMap<String, String>,
    /// Absolute path → content, written before the entry point starts.
    pub files: BTreeMap<String, String>,
    /// Path inside the environment → output name, read after exit.
    pub outputs: BTreeMap<String, String>,
    #[serde(rename = "Bundle")]
    pub bundle: Option<Bundle>,
    #[serde(skip)]
    pub out: Option<OutputSink>,
    #[serde(skip)]
    pub err: Option<OutputSink>,
}

impl Operation {
    /// Path an output named `name` is read from.
    pub fn output_path(name: &str) -> String {
        format!("{OUTPUTS_DIR}/{name}")
    }

    /// Whether the bundle declares `name` and it applies to this action.
    pub fn output_applies(&self, name: &str) -> bool {
        self.bundle
            .as_ref()
            .and_then(|b| b.outputs.get(name))
            .is_some_and(|o| o.applies_to(&self.action))
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("installation", &self.installation)
            .field("revision", &self.revision)
            .field("action", &self.action)
            .field("image", &self.image)
            .field("environment", &self.environment.keys().collect::<Vec<_>>())
            .field("files", &self.files.keys().collect::<Vec<_>>())
            .field("outputs", &self.outputs)
            .field("out", &self.out.is_some())
            .field("err", &self.err.is_some())
            .finish()
    }
}

/// What a completed run produced.
///
/// `error` carries failures that happened after the entry point started
/// (non-zero exit, unreadable outputs) so that whatever was captured is
/// still reported alongside it.
#[derive(Debug, Default)]
pub struct OperationResult {
    /// Output name → raw content, byte for byte as the image wrote it.
    pub outputs: BTreeMap<String, Vec<u8>>,
    pub error: Option<CnabError>,
}

impl OperationResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Adjusts an operation after it is resolved and before it is dispatched.
pub type OperationConfig = Box<dyn FnOnce(&mut Operation) -> cnab_core::Result<()> + Send>;

#[cfg(test)]
mod tests {
    use super::*;
    use cnab_core::bundle::Output;

    #[test]
    fn sinks_and_debug_hide_content() {
        let mut op = Operation {
            installation: "hello".into(),
            action: "install".into(),
            ..Default::default()
        };
        op.environment.insert("SECRET".into(), "hunter2".into());
        let dbg = format!("{op:?}");
        assert!(dbg.contains("SECRET"));
        assert!(!dbg.contains("hunter2"));

        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["installation_name"], "hello");
        assert!(json.get("out").is_none());
        assert!(json["Bundle"].is_null());
    }

    #[test]
    fn output_applies_respects_apply_to() {
        let mut bundle = Bundle::new("mybuns", "1.0.0");
        bundle.outputs.insert(
            "output1".into(),
            Output {
                definition: "output1".into(),
                apply_to: vec!["install".into()],
                ..Default::default()
            },
        );
        let mut op = Operation {
            action: "install".into(),
            bundle: Some(bundle),
            ..Default::default()
        };
        assert!(op.output_applies("output1"));
        assert!(!op.output_applies("missing"));
        op.action = "upgrade".into();
        assert!(!op.output_applies("output1"));
        assert_eq!(Operation::output_path("output1"), "/cnab/app/outputs/output1");
    }
}
