use serde::{Deserialize, Serialize};

/// Outcome of an operation that reports failure as a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub message: String,
    pub success: bool,
}

impl OperationResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            success: true,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            success: false,
        }
    }
}

/// A message taken off the broker and waiting to be streamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectedMessage {
    /// Raw JSON text as delivered
    pub payload: String,
    pub success: bool,
}

impl CollectedMessage {
    pub fn received(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            success: true,
        }
    }
}
