/// Cumulative worker counters, logged at the end of every cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub cycles: u64,
    /// Orders whose notification the gateway accepted.
    pub delivered: u64,
    /// Orders resolved without delivery (dead device token).
    pub permanent_failures: u64,
    /// Dispatches left for a later cycle.
    pub transient_failures: u64,
    /// Orders skipped for an unrecognised type code.
    pub invalid_orders: u64,
    /// Tenants whose batch was rolled back or could not be claimed.
    pub tenant_failures: u64,
}
