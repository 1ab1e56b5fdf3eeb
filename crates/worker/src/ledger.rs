//! Attempt counts for orders whose type code is not recognised.

use std::collections::{HashMap, HashSet};

use orderpush_core::{OrderId, TenantName};

/// Counts, per (tenant, order), how many cycles an order was claimed with an
/// unusable type code. Once the count reaches `max_attempts` the order should
/// be resolved so it stops occupying batch slots.
///
/// Counts are process-local; a restart starts every order from zero again.
#[derive(Debug, Default)]
pub struct InvalidOrderLedger {
    max_attempts: u32,
    attempts: HashMap<(TenantName, OrderId), u32>,
}

impl InvalidOrderLedger {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempts: HashMap::new(),
        }
    }

    /// Record one more attempt and return the updated count.
    pub fn record(&mut self, tenant: &TenantName, order_id: OrderId) -> u32 {
        let count = self.attempts.entry((tenant.clone(), order_id)).or_insert(0);
        *count += 1;
        *count
    }

    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    pub fn forget(&mut self, tenant: &TenantName, order_id: OrderId) {
        self.attempts.remove(&(tenant.clone(), order_id));
    }

    /// Drop entries of tenants that are no longer discovered.
    pub fn retain_tenants(&mut self, live: &[TenantName]) {
        let live: HashSet<&TenantName> = live.iter().collect();
        self.attempts.retain(|(tenant, _), _| live.contains(tenant));
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}
