use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CnabError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("could not extract output '{name}': {reason}")]
    OutputExtraction { name: String, reason: String },

    #[error("output '{name}' does not match its schema: {reason}")]
    InvalidOutput { name: String, reason: String },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("{item_type} not found: {name}")]
    NotFound { item_type: String, name: String },

    #[error("{item_type} already exists: {name}")]
    AlreadyExists { item_type: String, name: String },

    #[error("invalid installation name '{0}': must be non-empty and contain only letters, digits, '.', '_' or '-'")]
    InvalidInstallation(String),

    #[error("invalid claim: {0}")]
    InvalidClaim(String),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CnabError {
    pub fn not_found(item_type: impl Into<String>, name: impl Into<String>) -> Self {
        CnabError::NotFound {
            item_type: item_type.into(),
            name: name.into(),
        }
    }

    pub fn already_exists(item_type: impl Into<String>, name: impl Into<String>) -> Self {
        CnabError::AlreadyExists {
            item_type: item_type.into(),
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CnabError::NotFound { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CnabError::Cancelled(_))
    }
}

pub type Result<T> = std::result::Result<T, CnabError>;

// ---------------------------------------------------------------------------
// AggregateError
// ---------------------------------------------------------------------------

/// An ordered collection of failures that occurred within one logical step.
///
/// Causes are kept in the order they were appended; nested aggregates are
/// flattened so every leaf is reachable through [`AggregateError::errors`].
/// The rendering lists every constituent message:
///
/// ```text
/// 2 errors occurred:
///     * execution failed: container exit code: 1
///     * persistence error: disk full
/// ```
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<CnabError>,
}

impl AggregateError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a cause. An aggregate is flattened into its leaves.
    pub fn push(&mut self, err: CnabError) {
        match err {
            CnabError::Aggregate(inner) => self.errors.extend(inner.errors),
            other => self.errors.push(other),
        }
    }

    /// Append the error half of `result`, returning the success value if any.
    pub fn collect<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.push(e);
                None
            }
        }
    }

    pub fn errors(&self) -> &[CnabError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<CnabError> {
        self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Collapse into a single error: `None` when empty, the sole cause when
    /// there is exactly one, otherwise the aggregate itself.
    pub fn into_error(mut self) -> Option<CnabError> {
        match self.errors.len() {
            0 => None,
            1 => self.errors.pop(),
            _ => Some(CnabError::Aggregate(self)),
        }
    }

    pub fn into_result(self) -> Result<()> {
        match self.into_error() {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

impl FromIterator<CnabError> for AggregateError {
    fn from_iter<I: IntoIterator<Item = CnabError>>(iter: I) -> Self {
        let mut agg = AggregateError::new();
        for err in iter {
            agg.push(err);
        }
        agg
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.len() == 1 {
            write!(f, "1 error occurred:")?;
        } else {
            write!(f, "{} errors occurred:", self.errors.len())?;
        }
        for err in &self.errors {
            write!(f, "\n\t* {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .first()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
