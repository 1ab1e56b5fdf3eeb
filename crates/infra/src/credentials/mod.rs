//! Push gateway credentials.
//!
//! ```text
//! ServiceAccountKey (loaded once at startup)
//!     |
//!     +-- ServiceAccountExchange (TokenExchange)
//!             signs an RS256 assertion, trades it for a bearer token
//!             |
//!             +-- TokenCache
//!                     reuses the bearer token until `now + margin`
//! ```
//!
//! Private keys and access tokens are held as `SecretString` and never logged.

pub mod cache;
pub mod exchange;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

pub use cache::TokenCache;
pub use exchange::{IssuedToken, ServiceAccountExchange, TokenExchange};

/// Credential error.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("cannot read credentials file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed service account: {0}")]
    Malformed(String),
    #[error("failed to sign assertion: {0}")]
    Signing(String),
    #[error("token endpoint unreachable: {0}")]
    Http(String),
    #[error("token endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed token response: {0}")]
    MalformedResponse(String),
}

#[derive(Deserialize)]
struct ServiceAccountFile {
    client_email: String,
    private_key: String,
    #[serde(default)]
    private_key_id: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

/// Service account material, immutable for the process lifetime.
#[derive(Debug, Clone)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key_id: Option<String>,
    pub project_id: Option<String>,
    pub token_uri: Option<String>,
    private_key: SecretString,
}

impl ServiceAccountKey {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CredentialError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CredentialError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, CredentialError> {
        let file: ServiceAccountFile =
            serde_json::from_str(raw).map_err(|e| CredentialError::Malformed(e.to_string()))?;
        if file.client_email.trim().is_empty() {
            return Err(CredentialError::Malformed("client_email is empty".into()));
        }
        if file.private_key.trim().is_empty() {
            return Err(CredentialError::Malformed("private_key is empty".into()));
        }
        Ok(Self {
            client_email: file.client_email,
            private_key_id: file.private_key_id.filter(|k| !k.is_empty()),
            project_id: file.project_id.filter(|p| !p.is_empty()),
            token_uri: file.token_uri.filter(|u| !u.is_empty()),
            private_key: SecretString::from(file.private_key),
        })
    }

    pub(crate) fn private_key_pem(&self) -> &str {
        self.private_key.expose_secret()
    }
}

/// Bearer token for the push gateway plus the instant it stops being used.
#[derive(Debug, Clone)]
pub struct AccessToken {
    value: SecretString,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(value: SecretString, expires_at: DateTime<Utc>) -> Self {
        Self { value, expires_at }
    }

    pub fn secret(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}
