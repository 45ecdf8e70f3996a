/// Output name under which captured invocation image stdout is stored.
pub const OUTPUT_INVOCATION_IMAGE_LOGS: &str = "io.cnab.outputs.invocationImageLogs";

/// A named artifact captured after an execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub claim_id: String,
    pub result_id: String,
    pub name: String,
    pub value: Vec<u8>,
}

impl Output {
    pub fn new(
        claim_id: impl Into<String>,
        result_id: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            claim_id: claim_id.into(),
            result_id: result_id.into(),
            name: name.into(),
            value: value.into(),
        }
    }

    /// Storage key: outputs are unique per (result, name).
    pub fn key(&self) -> String {
        output_key(&self.result_id, &self.name)
    }

    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

pub(crate) fn output_key(result_id: &str, name: &str) -> String {
    format!("{result_id}-{name}")
}
