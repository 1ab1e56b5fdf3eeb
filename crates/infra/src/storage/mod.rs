//! Tenant storage: discovery of tenant databases and transactional order claims.
//!
//! ## Design
//!
//! - Tenants are discovered every cycle; nothing is registered persistently
//! - A claim opens a transaction, locks a bounded batch of eligible orders
//!   and keeps the transaction open until `commit` or `rollback`
//! - Duplicate-delivery protection across worker processes comes from the
//!   storage engine's row locks, not from in-process coordination
//! - Dropping a claim without finishing it rolls it back
//!
//! ## Components
//!
//! - `TenantDirectory`: lists tenant databases matching the naming convention
//! - `OrderClaimStore`: opens claims against one tenant
//! - `OrderClaim`: the open transaction plus its locked orders
//! - `InMemoryOrderStore`: lock-aware in-memory backend for tests/dev
//! - `mysql`: the production backend

pub mod in_memory;
pub mod mysql;

use async_trait::async_trait;
use tracing::warn;

use orderpush_core::{DeviceToken, OrderId, PendingOrder, TenantName};

pub use in_memory::{InMemoryOrderStore, StoredOrder};
pub use mysql::{MySqlClaimStore, MySqlTenantDirectory, TenantPools};

/// Storage error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage call timed out after {0:?}: {1}")]
    Timeout(std::time::Duration, &'static str),
    #[error("unexpected row shape: {0}")]
    Decode(String),
    #[error("query failed: {0}")]
    Query(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed => StoreError::Unavailable(err.to_string()),
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::Decode(_) => StoreError::Decode(err.to_string()),
            other => StoreError::Query(other.to_string()),
        }
    }
}

/// Build a claimed order from its raw columns.
///
/// Rows whose device token does not parse are skipped with a warning so one
/// bad row never fails the tenant's whole claim.
pub(crate) fn claimed_order(
    tenant: &TenantName,
    id: OrderId,
    order_type: String,
    device_token: String,
) -> Option<PendingOrder> {
    match DeviceToken::parse(device_token) {
        Ok(device) => Some(PendingOrder::new(id, order_type, device)),
        Err(err) => {
            warn!(
                tenant = %tenant,
                order_id = %id,
                error = %err,
                "skipping order with unusable device token"
            );
            None
        }
    }
}

/// Enumerates tenant databases.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Tenants in a stable order. Empty means "no tenants yet", not an error.
    async fn list_tenants(&self) -> Result<Vec<TenantName>, StoreError>;
}

/// Opens per-tenant order claims.
#[async_trait]
pub trait OrderClaimStore: Send + Sync {
    type Claim: OrderClaim;

    /// Lock and return up to `limit` eligible orders of `tenant`.
    ///
    /// An order is eligible iff its dispatch-eligibility timestamp is set, its
    /// notification-sent timestamp is null and its device token is non-blank.
    /// Rows whose token still fails to parse are left out of the batch.
    async fn claim_batch(&self, tenant: &TenantName, limit: u32)
    -> Result<Self::Claim, StoreError>;
}

/// An open claim transaction.
#[async_trait]
pub trait OrderClaim: Send {
    /// Locked orders, in claim order.
    fn orders(&self) -> &[PendingOrder];

    /// Set the notification-sent timestamp of `order_id` inside this transaction.
    async fn mark_delivered(&mut self, order_id: OrderId) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}
