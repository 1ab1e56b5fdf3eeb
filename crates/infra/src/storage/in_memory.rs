//! In-memory tenant storage for tests/dev.
//!
//! Emulates the production locking read with `SKIP LOCKED` semantics: rows held
//! by an open claim are invisible to other claims until that claim commits or
//! rolls back. Marks are staged inside the claim and only applied on commit.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use orderpush_core::{OrderId, PendingOrder, TenantName};

use super::{OrderClaim, OrderClaimStore, StoreError, TenantDirectory, claimed_order};

/// An order row as stored by the in-memory backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredOrder {
    pub id: OrderId,
    pub order_type: String,
    pub device_token: String,
    pub eligible_at: Option<DateTime<Utc>>,
    pub notified_at: Option<DateTime<Utc>>,
}

impl StoredOrder {
    /// An order that is eligible right now.
    pub fn eligible(id: i64, order_type: &str, device_token: &str) -> Self {
        Self {
            id: OrderId::new(id),
            order_type: order_type.to_string(),
            device_token: device_token.to_string(),
            eligible_at: Some(Utc::now()),
            notified_at: None,
        }
    }

    /// Same filter as the production claim query: a token is blank once tabs,
    /// line breaks and surrounding spaces are stripped.
    pub fn is_eligible(&self) -> bool {
        self.eligible_at.is_some()
            && self.notified_at.is_none()
            && !self
                .device_token
                .replace(['\t', '\n', '\r'], "")
                .trim_matches(' ')
                .is_empty()
    }
}

#[derive(Debug, Default)]
struct TenantTable {
    orders: BTreeMap<OrderId, StoredOrder>,
    locked: HashSet<OrderId>,
}

#[derive(Debug, Default)]
struct Inner {
    tenants: BTreeMap<TenantName, TenantTable>,
    fail_directory: bool,
    failing_claims: HashSet<TenantName>,
    failing_marks: HashSet<OrderId>,
    directory_calls: usize,
    claims_opened: usize,
}

/// In-memory tenant directory + claim store.
///
/// Clones share the same state, so a test can keep one handle for assertions
/// while the worker owns another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }

    /// Register a tenant with no orders.
    pub fn add_tenant(&self, tenant: &TenantName) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.tenants.entry(tenant.clone()).or_default();
        }
    }

    /// Insert (or replace) an order, registering the tenant if needed.
    pub fn insert_order(&self, tenant: &TenantName, order: StoredOrder) {
        if let Ok(mut inner) = self.inner.lock() {
            inner
                .tenants
                .entry(tenant.clone())
                .or_default()
                .orders
                .insert(order.id, order);
        }
    }

    pub fn order(&self, tenant: &TenantName, id: OrderId) -> Option<StoredOrder> {
        let inner = self.inner.lock().ok()?;
        inner.tenants.get(tenant)?.orders.get(&id).cloned()
    }

    /// Make `list_tenants` fail (connectivity loss).
    pub fn fail_directory(&self, fail: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_directory = fail;
        }
    }

    /// Make every claim against `tenant` fail.
    pub fn fail_claims_for(&self, tenant: &TenantName) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failing_claims.insert(tenant.clone());
        }
    }

    /// Make `mark_delivered` fail for `order_id` in any tenant.
    pub fn fail_mark_for(&self, order_id: OrderId) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failing_marks.insert(order_id);
        }
    }

    /// Undo `fail_mark_for`.
    pub fn allow_mark_for(&self, order_id: OrderId) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failing_marks.remove(&order_id);
        }
    }

    pub fn directory_calls(&self) -> usize {
        self.inner.lock().map(|i| i.directory_calls).unwrap_or(0)
    }

    pub fn claims_opened(&self) -> usize {
        self.inner.lock().map(|i| i.claims_opened).unwrap_or(0)
    }

    /// Number of rows currently locked by open claims for `tenant`.
    pub fn locked_count(&self, tenant: &TenantName) -> usize {
        self.inner
            .lock()
            .ok()
            .and_then(|i| i.tenants.get(tenant).map(|t| t.locked.len()))
            .unwrap_or(0)
    }
}

#[async_trait]
impl TenantDirectory for InMemoryOrderStore {
    async fn list_tenants(&self) -> Result<Vec<TenantName>, StoreError> {
        let mut inner = self.lock()?;
        inner.directory_calls += 1;
        if inner.fail_directory {
            return Err(StoreError::Unavailable("directory unreachable".to_string()));
        }
        Ok(inner.tenants.keys().cloned().collect())
    }
}

#[async_trait]
impl OrderClaimStore for InMemoryOrderStore {
    type Claim = InMemoryClaim;

    async fn claim_batch(
        &self,
        tenant: &TenantName,
        limit: u32,
    ) -> Result<InMemoryClaim, StoreError> {
        let mut inner = self.lock()?;
        inner.claims_opened += 1;
        if inner.failing_claims.contains(tenant) {
            return Err(StoreError::Unavailable(format!("tenant {tenant} unreachable")));
        }

        let table = inner.tenants.entry(tenant.clone()).or_default();
        let selected: Vec<&StoredOrder> = table
            .orders
            .values()
            .filter(|row| row.is_eligible() && !table.locked.contains(&row.id))
            .take(limit as usize)
            .collect();
        let orders: Vec<PendingOrder> = selected
            .into_iter()
            .filter_map(|row| {
                claimed_order(tenant, row.id, row.order_type.clone(), row.device_token.clone())
            })
            .collect();
        for order in &orders {
            table.locked.insert(order.id);
        }

        Ok(InMemoryClaim {
            inner: self.inner.clone(),
            tenant: tenant.clone(),
            orders,
            staged: Vec::new(),
            finished: false,
        })
    }
}

/// Open in-memory claim. Dropping it unfinished releases its locks.
#[derive(Debug)]
pub struct InMemoryClaim {
    inner: Arc<Mutex<Inner>>,
    tenant: TenantName,
    orders: Vec<PendingOrder>,
    staged: Vec<OrderId>,
    finished: bool,
}

impl InMemoryClaim {
    fn release(&mut self, apply_marks: bool) -> Result<(), StoreError> {
        self.finished = true;
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))?;
        let Some(table) = inner.tenants.get_mut(&self.tenant) else {
            return Ok(());
        };
        if apply_marks {
            let now = Utc::now();
            for id in &self.staged {
                if let Some(row) = table.orders.get_mut(id) {
                    row.notified_at = Some(now);
                }
            }
        }
        for order in &self.orders {
            table.locked.remove(&order.id);
        }
        Ok(())
    }
}

#[async_trait]
impl OrderClaim for InMemoryClaim {
    fn orders(&self) -> &[PendingOrder] {
        &self.orders
    }

    async fn mark_delivered(&mut self, order_id: OrderId) -> Result<(), StoreError> {
        let failing = self
            .inner
            .lock()
            .map(|i| i.failing_marks.contains(&order_id))
            .unwrap_or(true);
        if failing {
            return Err(StoreError::Query(format!("update of order {order_id} failed")));
        }
        self.staged.push(order_id);
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        self.release(true)
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        self.release(false)
    }
}

impl Drop for InMemoryClaim {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.release(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(name: &str) -> TenantName {
        TenantName::parse(name).unwrap()
    }

    fn seeded() -> (InMemoryOrderStore, TenantName) {
        let store = InMemoryOrderStore::new();
        let t = tenant("delivery_a");
        for id in 1..=5 {
            store.insert_order(&t, StoredOrder::eligible(id, "E", "device-token"));
        }
        (store, t)
    }

    #[tokio::test]
    async fn claim_respects_limit_and_order() {
        let (store, t) = seeded();

        let claim = store.claim_batch(&t, 3).await.unwrap();
        let ids: Vec<i64> = claim.orders().iter().map(|o| o.id.get()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        claim.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn ineligible_rows_are_not_claimed() {
        let store = InMemoryOrderStore::new();
        let t = tenant("delivery_a");
        store.insert_order(&t, StoredOrder::eligible(1, "E", "tok"));
        store.insert_order(&t, StoredOrder::eligible(2, "E", ""));
        store.insert_order(&t, StoredOrder::eligible(5, "E", " \t\r\n "));
        store.insert_order(
            &t,
            StoredOrder {
                eligible_at: None,
                ..StoredOrder::eligible(3, "E", "tok")
            },
        );
        store.insert_order(
            &t,
            StoredOrder {
                notified_at: Some(Utc::now()),
                ..StoredOrder::eligible(4, "E", "tok")
            },
        );

        let claim = store.claim_batch(&t, 10).await.unwrap();
        let ids: Vec<i64> = claim.orders().iter().map(|o| o.id.get()).collect();
        assert_eq!(ids, vec![1]);
    }

    #[tokio::test]
    async fn unparseable_token_is_left_out_of_the_claim() {
        let store = InMemoryOrderStore::new();
        let t = tenant("delivery_a");
        // Vertical tab survives the blank-token filter but not token parsing.
        store.insert_order(&t, StoredOrder::eligible(1, "E", "\u{0B}"));
        store.insert_order(&t, StoredOrder::eligible(2, "E", "tok"));
        assert!(store.order(&t, OrderId::new(1)).unwrap().is_eligible());

        let claim = store.claim_batch(&t, 10).await.unwrap();
        let ids: Vec<i64> = claim.orders().iter().map(|o| o.id.get()).collect();
        assert_eq!(ids, vec![2]);
        claim.commit().await.unwrap();
        assert_eq!(store.locked_count(&t), 0);
    }

    #[tokio::test]
    async fn overlapping_claims_are_disjoint() {
        let (store, t) = seeded();

        let first = store.claim_batch(&t, 3).await.unwrap();
        let second = store.claim_batch(&t, 3).await.unwrap();

        let a: HashSet<OrderId> = first.orders().iter().map(|o| o.id).collect();
        let b: HashSet<OrderId> = second.orders().iter().map(|o| o.id).collect();
        assert!(a.is_disjoint(&b));
        assert_eq!(a.len() + b.len(), 5);

        first.commit().await.unwrap();
        second.commit().await.unwrap();
        assert_eq!(store.locked_count(&t), 0);
    }

    #[tokio::test]
    async fn marks_apply_only_on_commit() {
        let (store, t) = seeded();

        let mut claim = store.claim_batch(&t, 2).await.unwrap();
        claim.mark_delivered(OrderId::new(1)).await.unwrap();
        assert!(store.order(&t, OrderId::new(1)).unwrap().notified_at.is_none());

        claim.commit().await.unwrap();
        assert!(store.order(&t, OrderId::new(1)).unwrap().notified_at.is_some());
        assert!(store.order(&t, OrderId::new(2)).unwrap().notified_at.is_none());
    }

    #[tokio::test]
    async fn rollback_discards_marks_and_releases_rows() {
        let (store, t) = seeded();

        let mut claim = store.claim_batch(&t, 5).await.unwrap();
        claim.mark_delivered(OrderId::new(1)).await.unwrap();
        claim.rollback().await.unwrap();

        assert!(store.order(&t, OrderId::new(1)).unwrap().notified_at.is_none());
        let again = store.claim_batch(&t, 5).await.unwrap();
        assert_eq!(again.orders().len(), 5);
    }

    #[tokio::test]
    async fn dropping_a_claim_releases_its_locks() {
        let (store, t) = seeded();

        {
            let _claim = store.claim_batch(&t, 5).await.unwrap();
            assert_eq!(store.locked_count(&t), 5);
        }
        assert_eq!(store.locked_count(&t), 0);
    }

    #[tokio::test]
    async fn directory_lists_tenants_sorted() {
        let store = InMemoryOrderStore::new();
        store.add_tenant(&tenant("delivery_b"));
        store.add_tenant(&tenant("delivery_a"));

        let tenants = store.list_tenants().await.unwrap();
        assert_eq!(tenants, vec![tenant("delivery_a"), tenant("delivery_b")]);

        store.fail_directory(true);
        assert!(store.list_tenants().await.is_err());
    }
}
