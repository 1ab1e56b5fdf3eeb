//! Failure classification for push gateway responses.
//!
//! Two sources of evidence are combined:
//!
//! | Evidence                                   | Class             |
//! |--------------------------------------------|-------------------|
//! | detail `errorCode` / `status` is `UNREGISTERED` or `NOT_FOUND` | `PermanentTarget` |
//! | transport error, timeout, 429, 5xx         | `TransientInfra`  |
//! | message contains `not found`, `UNREGISTERED` or `invalid authentication` | `PermanentTarget` |
//! | anything else                              | `TransientInfra`  |
//!
//! The message match is a heuristic kept as a fallback for gateway responses
//! without structured codes. Callers only see the resulting `ErrorClass`.

use serde::Deserialize;

use orderpush_core::ErrorClass;

const PERMANENT_CODES: &[&str] = &["UNREGISTERED", "NOT_FOUND"];
const PERMANENT_MESSAGE_MARKERS: &[&str] = &["not found", "unregistered", "invalid authentication"];

/// Everything known about one failed gateway call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayFailure {
    /// `None` when the request never produced a response.
    pub http_status: Option<u16>,
    pub message: String,
    pub status: Option<String>,
    pub error_codes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "errorCode", default)]
    error_code: Option<String>,
}

impl GatewayFailure {
    /// Failure for a request that never got a response.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Parse a non-success response. Unparseable bodies keep the raw text.
    pub fn from_response(http_status: u16, body: &str) -> Self {
        match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(envelope) => Self {
                http_status: Some(http_status),
                message: envelope.error.message,
                status: envelope.error.status,
                error_codes: envelope
                    .error
                    .details
                    .into_iter()
                    .filter_map(|d| d.error_code)
                    .collect(),
            },
            Err(_) => Self {
                http_status: Some(http_status),
                message: body.chars().take(200).collect(),
                ..Self::default()
            },
        }
    }

    /// Short human-readable summary for logs.
    pub fn summary(&self) -> String {
        let mut out = match self.http_status {
            Some(code) => format!("HTTP {code}"),
            None => "transport error".to_string(),
        };
        if let Some(status) = &self.status {
            out.push_str(&format!(" {status}"));
        }
        if !self.error_codes.is_empty() {
            out.push_str(&format!(" [{}]", self.error_codes.join(",")));
        }
        if !self.message.is_empty() {
            out.push_str(&format!(": {}", self.message));
        }
        out
    }
}

/// Maps a gateway failure to an [`ErrorClass`].
pub trait FailureClassifier: Send + Sync {
    fn classify(&self, failure: &GatewayFailure) -> ErrorClass;
}

/// Structured codes first, then status-based transient detection, then the
/// free-text heuristic.
#[derive(Debug, Default, Clone, Copy)]
pub struct GatewayErrorClassifier;

impl FailureClassifier for GatewayErrorClassifier {
    fn classify(&self, failure: &GatewayFailure) -> ErrorClass {
        let Some(http_status) = failure.http_status else {
            return ErrorClass::TransientInfra;
        };

        let structured = failure
            .error_codes
            .iter()
            .chain(failure.status.iter())
            .any(|code| PERMANENT_CODES.contains(&code.as_str()));
        if structured {
            return ErrorClass::PermanentTarget;
        }

        if http_status == 429 || http_status >= 500 {
            return ErrorClass::TransientInfra;
        }

        let message = failure.message.to_ascii_lowercase();
        if PERMANENT_MESSAGE_MARKERS.iter().any(|m| message.contains(m)) {
            return ErrorClass::PermanentTarget;
        }

        ErrorClass::TransientInfra
    }
}
