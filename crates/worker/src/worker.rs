//! The polling loop.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{Instrument, debug, error, info, info_span, trace, warn};
use uuid::Uuid;

use orderpush_core::{DispatchOutcome, ErrorClass, OrderId, PendingOrder, TenantName};
use orderpush_infra::{
    AccessToken, BackoffPolicy, MemoryProbe, NotificationDispatcher, OrderClaim, OrderClaimStore,
    StoreError, SysinfoMemoryProbe, TenantDirectory, TokenCache, TokenExchange, WorkerConfig,
};

use crate::governor::{ExitReason, Governor};
use crate::ledger::InvalidOrderLedger;
use crate::stats::WorkerStats;

/// Loop tunables.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Claim limit per tenant per cycle.
    pub batch_size: u32,
    pub poll_interval: Duration,
    /// `poll_interval` is multiplied by this when no tenant exists.
    pub empty_directory_multiplier: u32,
    /// Sleep schedule after consecutive token failures.
    pub token_backoff: BackoffPolicy,
    pub invalid_order_max_attempts: u32,
    pub memory_ceiling_bytes: u64,
    pub max_cycles: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        let poll_interval = Duration::from_secs(5);
        Self {
            batch_size: 5,
            poll_interval,
            empty_directory_multiplier: 5,
            token_backoff: BackoffPolicy::exponential(poll_interval * 2, Duration::from_secs(300)),
            invalid_order_max_attempts: 3,
            memory_ceiling_bytes: 128 * 1024 * 1024,
            max_cycles: 1_000,
        }
    }
}

impl WorkerSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        let poll_interval = config.poll_interval();
        Self {
            batch_size: config.batch_size,
            poll_interval,
            empty_directory_multiplier: config.empty_directory_multiplier,
            token_backoff: BackoffPolicy::exponential(
                poll_interval.saturating_mul(2),
                config.token_backoff_max(),
            ),
            invalid_order_max_attempts: config.invalid_order_max_attempts,
            memory_ceiling_bytes: config.memory_ceiling_bytes(),
            max_cycles: config.max_cycles,
        }
    }
}

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    RefreshingToken,
    Discovering,
    /// Index into the tenant list of the current cycle.
    ProcessingTenant(usize),
    Sleeping,
    Exiting,
}

/// What the loop does after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Sleep(Duration),
    Exit(ExitReason),
}

/// Drives claim → dispatch → mark over every discovered tenant, one cycle at
/// a time.
///
/// The worker is the single writer of its token cache, counters and ledger;
/// nothing here is shared with other instances. Cross-process safety comes
/// from the claim store's row locks.
pub struct NotificationWorker<T, C, D, E> {
    directory: T,
    claims: C,
    dispatcher: D,
    tokens: TokenCache<E>,
    probe: Box<dyn MemoryProbe>,
    governor: Governor,
    settings: WorkerSettings,
    ledger: InvalidOrderLedger,
    stats: WorkerStats,
    state: WorkerState,
    token_failures: u32,
}

impl<T, C, D, E> NotificationWorker<T, C, D, E>
where
    T: TenantDirectory,
    C: OrderClaimStore,
    D: NotificationDispatcher,
    E: TokenExchange,
{
    pub fn new(
        directory: T,
        claims: C,
        dispatcher: D,
        tokens: TokenCache<E>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            directory,
            claims,
            dispatcher,
            tokens,
            probe: Box::new(SysinfoMemoryProbe::new()),
            governor: Governor::new(settings.memory_ceiling_bytes, settings.max_cycles),
            ledger: InvalidOrderLedger::new(settings.invalid_order_max_attempts),
            settings,
            stats: WorkerStats::default(),
            state: WorkerState::Idle,
            token_failures: 0,
        }
    }

    pub fn with_memory_probe(mut self, probe: Box<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Run until the governor or `shutdown` stops the loop.
    ///
    /// Shutdown is only observed between cycles; a running cycle always
    /// completes first.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> ExitReason {
        info!(
            batch_size = self.settings.batch_size,
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            max_cycles = self.settings.max_cycles,
            memory_ceiling_bytes = self.settings.memory_ceiling_bytes,
            "worker started"
        );
        loop {
            let pause = match self.run_cycle().await {
                CycleOutcome::Exit(reason) => return reason,
                CycleOutcome::Sleep(pause) => pause,
            };
            if self.sleep_or_shutdown(pause, &mut shutdown).await {
                self.transition(WorkerState::Exiting);
                info!("shutdown requested");
                return ExitReason::ShutdownRequested;
            }
        }
    }

    /// `true` when shutdown was requested before or during the sleep.
    async fn sleep_or_shutdown(
        &mut self,
        pause: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let requested = *shutdown.borrow_and_update();
        if requested {
            return true;
        }

        self.transition(WorkerState::Sleeping);
        trace!(pause_ms = pause.as_millis() as u64, "sleeping");
        let changed = tokio::select! {
            changed = shutdown.changed() => Some(changed.is_ok()),
            _ = tokio::time::sleep(pause) => None,
        };
        match changed {
            None => false,
            Some(true) => {
                let requested = *shutdown.borrow_and_update();
                requested
            }
            Some(false) => {
                // Sender gone: nobody can ask for shutdown any more.
                tokio::time::sleep(pause).await;
                false
            }
        }
    }

    /// One full cycle followed by the governor check.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.stats.cycles += 1;
        let cycle = self.stats.cycles;
        let span = info_span!("cycle", cycle_id = %Uuid::now_v7(), cycle);

        let pause = self.cycle_body().instrument(span.clone()).await;

        span.in_scope(|| {
            info!(
                delivered = self.stats.delivered,
                permanent_failures = self.stats.permanent_failures,
                transient_failures = self.stats.transient_failures,
                invalid_orders = self.stats.invalid_orders,
                tenant_failures = self.stats.tenant_failures,
                "cycle complete"
            );
            let resident = self.probe.resident_bytes();
            match self.governor.evaluate(cycle, resident) {
                Some(reason) => {
                    self.transition(WorkerState::Exiting);
                    warn!(%reason, "governor limit reached; exiting for restart");
                    CycleOutcome::Exit(reason)
                }
                None => {
                    self.transition(WorkerState::Idle);
                    CycleOutcome::Sleep(pause)
                }
            }
        })
    }

    async fn cycle_body(&mut self) -> Duration {
        self.transition(WorkerState::RefreshingToken);
        let token = match self.tokens.get_token().await {
            Ok(token) => {
                self.token_failures = 0;
                token
            }
            Err(err) => {
                self.token_failures = self.token_failures.saturating_add(1);
                let delay = self
                    .settings
                    .token_backoff
                    .delay_for_attempt(self.token_failures);
                error!(
                    error = %err,
                    consecutive_failures = self.token_failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "access token unavailable; skipping cycle"
                );
                return delay;
            }
        };

        self.transition(WorkerState::Discovering);
        let tenants = match self.directory.list_tenants().await {
            Ok(tenants) => tenants,
            Err(err) => {
                warn!(error = %err, "tenant discovery failed; skipping cycle");
                return self.settings.poll_interval;
            }
        };
        self.ledger.retain_tenants(&tenants);

        if tenants.is_empty() {
            info!("no tenants discovered");
            return self
                .settings
                .poll_interval
                .saturating_mul(self.settings.empty_directory_multiplier);
        }
        debug!(tenants = tenants.len(), "tenants discovered");

        for (index, tenant) in tenants.iter().enumerate() {
            self.transition(WorkerState::ProcessingTenant(index));
            let span = info_span!("tenant", tenant = %tenant);
            let processed = self
                .process_tenant(tenant, &token)
                .instrument(span.clone())
                .await;
            if let Err(err) = processed {
                self.stats.tenant_failures += 1;
                span.in_scope(|| error!(error = %err, "tenant skipped this cycle"));
            }
        }

        self.settings.poll_interval
    }

    async fn process_tenant(
        &mut self,
        tenant: &TenantName,
        token: &AccessToken,
    ) -> Result<(), StoreError> {
        let mut claim = self
            .claims
            .claim_batch(tenant, self.settings.batch_size)
            .await?;
        let orders = claim.orders().to_vec();
        if orders.is_empty() {
            debug!("no eligible orders");
            return claim.commit().await;
        }
        info!(orders = orders.len(), "batch claimed");

        let mut resolved_invalid = Vec::new();
        match self
            .deliver_batch(tenant, token, &orders, &mut claim, &mut resolved_invalid)
            .await
        {
            Ok(()) => {
                claim.commit().await?;
                // Attempt counts survive a rolled-back resolution.
                for order_id in resolved_invalid {
                    self.ledger.forget(tenant, order_id);
                }
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = claim.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn deliver_batch(
        &mut self,
        tenant: &TenantName,
        token: &AccessToken,
        orders: &[PendingOrder],
        claim: &mut C::Claim,
        resolved_invalid: &mut Vec<OrderId>,
    ) -> Result<(), StoreError> {
        for order in orders {
            let outcome = self
                .dispatcher
                .dispatch(token, &order.device_token, order.id, &order.order_type)
                .await;
            if self.record_outcome(tenant, order, &outcome) {
                claim.mark_delivered(order.id).await?;
                if outcome.error_class() == Some(ErrorClass::InvalidInput) {
                    resolved_invalid.push(order.id);
                }
            }
        }
        Ok(())
    }

    /// Update counters and decide whether the order gets its notification
    /// timestamp.
    fn record_outcome(
        &mut self,
        tenant: &TenantName,
        order: &PendingOrder,
        outcome: &DispatchOutcome,
    ) -> bool {
        let (class, message) = match outcome {
            DispatchOutcome::Sent => {
                self.stats.delivered += 1;
                info!(order_id = %order.id, "notification sent");
                return true;
            }
            DispatchOutcome::Failed { class, message } => (*class, message),
        };

        match class {
            ErrorClass::PermanentTarget => {
                self.stats.permanent_failures += 1;
                warn!(
                    order_id = %order.id,
                    error = %message,
                    "device rejected; resolving order"
                );
            }
            ErrorClass::TransientInfra => {
                self.stats.transient_failures += 1;
                warn!(
                    order_id = %order.id,
                    error = %message,
                    "dispatch failed; order stays eligible"
                );
            }
            ErrorClass::InvalidInput => {
                self.stats.invalid_orders += 1;
                let attempts = self.ledger.record(tenant, order.id);
                if self.ledger.is_exhausted(attempts) {
                    error!(
                        order_id = %order.id,
                        order_type = %order.order_type,
                        attempts,
                        "unrecognised order type; resolving without notification"
                    );
                    return true;
                }
                warn!(
                    order_id = %order.id,
                    order_type = %order.order_type,
                    attempts,
                    "unrecognised order type; skipped"
                );
            }
        }
        class.resolves_order()
    }

    fn transition(&mut self, next: WorkerState) {
        if self.state != next {
            trace!(from = ?self.state, to = ?next, "state change");
            self.state = next;
        }
    }
}

impl<T, C, D, E> NotificationWorker<T, C, D, E>
where
    T: TenantDirectory + 'static,
    C: OrderClaimStore + 'static,
    D: NotificationDispatcher + 'static,
    E: TokenExchange + 'static,
{
    /// Run the loop on the current runtime.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown, receiver) = watch::channel(false);
        let join = tokio::spawn(async move {
            let mut worker = self;
            let reason = worker.run(receiver).await;
            (reason, worker.stats)
        });
        WorkerHandle { shutdown, join }
    }
}

/// Handle to a spawned worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<(ExitReason, WorkerStats)>,
}

impl WorkerHandle {
    /// Ask the worker to stop at the next cycle boundary.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Request shutdown and wait for the loop to finish.
    pub async fn shutdown(self) -> Result<(ExitReason, WorkerStats), JoinError> {
        self.request_shutdown();
        self.join.await
    }

    /// Wait for the loop to stop on its own.
    pub async fn join(self) -> Result<(ExitReason, WorkerStats), JoinError> {
        let WorkerHandle { shutdown, join } = self;
        let result = join.await;
        drop(shutdown);
        result
    }
}
