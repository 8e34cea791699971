use thiserror::Error;

/// Rejected input to the scenario engine. Fatal to the call that raised it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid input for `{metric}`: {reason}")]
    InvalidInput { metric: String, reason: String },
}

impl EngineError {
    pub(crate) fn invalid(metric: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            metric: metric.into(),
            reason: reason.into(),
        }
    }
}

/// Failures of the export/import envelope codec.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("invalid import file: {0}")]
    Format(String),

    #[error("import type mismatch: expected `{expected}`, found `{actual}`")]
    TypeMismatch { expected: String, actual: String },

    #[error("transfer I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize export payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failures of the durable state store.
///
/// Reads never surface these to callers of the soft read path; writes always do.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read `{key}`: {reason}")]
    Read { key: String, reason: String },

    #[error("failed to write `{key}`: {reason}")]
    Write { key: String, reason: String },

    #[error("stored collection `{key}` is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("failed to serialize state collection: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("state `{id}` has calculatorType `{actual}`, not `{expected}`")]
    TypeMismatch {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("state `{id}` has an invalid payload: {reason}")]
    InvalidPayload { id: String, reason: String },
}
