//! Dispatch outcomes and their failure taxonomy.

use serde::{Deserialize, Serialize};

/// Classification of a failed dispatch.
///
/// The class decides what happens to the order, not the message text.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network, timeout, 5xx, malformed response. The order stays eligible.
    TransientInfra,
    /// Device token unregistered or rejected. The order is resolved anyway.
    PermanentTarget,
    /// The order itself is unusable (unknown type). The gateway is not called.
    InvalidInput,
}

impl ErrorClass {
    /// Whether an order failing with this class should be marked as notified.
    pub fn resolves_order(self) -> bool {
        matches!(self, ErrorClass::PermanentTarget)
    }
}

/// Result of one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    Failed { class: ErrorClass, message: String },
}

impl DispatchOutcome {
    pub fn failed(class: ErrorClass, message: impl Into<String>) -> Self {
        Self::Failed {
            class,
            message: message.into(),
        }
    }

    pub fn error_class(&self) -> Option<ErrorClass> {
        match self {
            DispatchOutcome::Sent => None,
            DispatchOutcome::Failed { class, .. } => Some(*class),
        }
    }
}
