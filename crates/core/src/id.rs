//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Longest database name the storage backend accepts.
const MAX_IDENTIFIER_LEN: usize = 64;

/// Name of a tenant database (multi-tenant boundary).
///
/// Tenant names are interpolated into SQL as schema qualifiers, so only plain
/// identifiers (`[A-Za-z0-9_]`, at most 64 bytes) are accepted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantName(String);

impl TenantName {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        validate_identifier(&value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Validate a plain SQL identifier (database or table name).
pub fn validate_identifier(value: &str) -> Result<(), DomainError> {
    if value.is_empty() {
        return Err(DomainError::invalid_id("identifier is empty"));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(DomainError::invalid_id(format!(
            "identifier longer than {MAX_IDENTIFIER_LEN} bytes: {value}"
        )));
    }
    if !value.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return Err(DomainError::invalid_id(format!(
            "identifier contains forbidden characters: {value}"
        )));
    }
    Ok(())
}

impl core::fmt::Display for TenantName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantName {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TenantName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TenantName> for String {
    fn from(value: TenantName) -> Self {
        value.0
    }
}

/// Identifier of an order inside a tenant database.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(i64);

impl OrderId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl core::fmt::Display for OrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<i64> for OrderId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Opaque push registration token of a user's device.
///
/// `Debug` only shows a short prefix; full tokens never reach the logs.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceToken(String);

impl DeviceToken {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::validation("device token is empty"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for DeviceToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "DeviceToken({prefix}…)")
    }
}

impl TryFrom<String> for DeviceToken {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<DeviceToken> for String {
    fn from(value: DeviceToken) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn tenant_name_accepts_plain_identifiers() {
        let name = TenantName::parse("delivery_acme_01").unwrap();
        assert_eq!(name.as_str(), "delivery_acme_01");
        assert_eq!(name.to_string(), "delivery_acme_01");
    }

    #[test]
    fn tenant_name_rejects_injection() {
        assert!(TenantName::parse("delivery_x`; DROP DATABASE y; --").is_err());
        assert!(TenantName::parse("").is_err());
        assert!(TenantName::parse("a".repeat(65)).is_err());
    }

    #[test]
    fn device_token_rejects_blank() {
        assert!(DeviceToken::parse("").is_err());
        assert!(DeviceToken::parse("   ").is_err());
    }

    #[test]
    fn device_token_debug_is_redacted() {
        let token = DeviceToken::parse("abcdefghijklmnopqrstuvwxyz").unwrap();
        let rendered = format!("{token:?}");
        assert!(rendered.contains("abcdefgh"));
        assert!(!rendered.contains("xyz"));
    }

    proptest! {
        #[test]
        fn identifier_charset_round_trips(name in "[A-Za-z0-9_]{1,64}") {
            let parsed = TenantName::parse(name.clone()).unwrap();
            prop_assert_eq!(parsed.as_str(), name.as_str());
        }

        #[test]
        fn identifiers_with_other_chars_are_rejected(
            prefix in "[a-z]{0,10}",
            bad in "[^A-Za-z0-9_]",
            suffix in "[a-z]{0,10}",
        ) {
            let candidate = format!("{prefix}{bad}{suffix}");
            prop_assert!(TenantName::parse(candidate).is_err());
        }
    }
}
