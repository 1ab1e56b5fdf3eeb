//! Service-account assertion exchange (OAuth 2.0 JWT bearer grant).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CredentialError, ServiceAccountKey};

pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
pub const MESSAGING_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const MAX_ERROR_BODY_CHARS: usize = 200;

/// A bearer token as reported by the token endpoint.
#[derive(Debug)]
pub struct IssuedToken {
    pub access_token: SecretString,
    /// Nominal lifetime reported by the endpoint, if any.
    pub expires_in: Option<Duration>,
}

/// Trades credentials for a bearer token.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self, now: DateTime<Utc>) -> Result<IssuedToken, CredentialError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Production exchange: RS256-signed assertion posted to the token endpoint.
pub struct ServiceAccountExchange {
    client_email: String,
    key_id: Option<String>,
    encoding_key: EncodingKey,
    token_endpoint: String,
    http: reqwest::Client,
}

impl ServiceAccountExchange {
    /// Endpoint precedence: explicit override, then the key's `token_uri`,
    /// then [`DEFAULT_TOKEN_ENDPOINT`].
    pub fn new(
        key: &ServiceAccountKey,
        token_endpoint: Option<String>,
        http: reqwest::Client,
    ) -> Result<Self, CredentialError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key_pem().as_bytes())
            .map_err(|e| CredentialError::Malformed(format!("private_key: {e}")))?;
        let token_endpoint = token_endpoint
            .or_else(|| key.token_uri.clone())
            .unwrap_or_else(|| DEFAULT_TOKEN_ENDPOINT.to_string());
        Ok(Self {
            client_email: key.client_email.clone(),
            key_id: key.private_key_id.clone(),
            encoding_key,
            token_endpoint,
            http,
        })
    }

    pub fn token_endpoint(&self) -> &str {
        &self.token_endpoint
    }

    fn sign_assertion(&self, now: DateTime<Utc>) -> Result<String, CredentialError> {
        let iat = now.timestamp();
        let claims = AssertionClaims {
            iss: self.client_email.clone(),
            scope: MESSAGING_SCOPE.to_string(),
            aud: self.token_endpoint.clone(),
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key_id.clone();
        jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .map_err(|e| CredentialError::Signing(e.to_string()))
    }
}

#[async_trait]
impl TokenExchange for ServiceAccountExchange {
    async fn exchange(&self, now: DateTime<Utc>) -> Result<IssuedToken, CredentialError> {
        let assertion = self.sign_assertion(now)?;

        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&[("grant_type", GRANT_TYPE), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| CredentialError::Http(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CredentialError::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(CredentialError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| CredentialError::MalformedResponse(e.to_string()))?;
        if parsed.access_token.is_empty() {
            return Err(CredentialError::MalformedResponse(
                "access_token is empty".to_string(),
            ));
        }

        debug!(expires_in = ?parsed.expires_in, "access token issued");
        Ok(IssuedToken {
            access_token: SecretString::from(parsed.access_token),
            expires_in: parsed.expires_in.map(Duration::from_secs),
        })
    }
}
