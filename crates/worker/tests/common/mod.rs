#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;

use orderpush_core::{
    DeviceToken, DispatchOutcome, ErrorClass, OrderId, OrderType, SystemClock, TenantName,
};
use orderpush_infra::{
    AccessToken, BackoffPolicy, CredentialError, FixedMemoryProbe, InMemoryOrderStore, IssuedToken,
    NotificationDispatcher, TokenCache, TokenExchange,
};
use orderpush_worker::{NotificationWorker, WorkerSettings};

pub fn tenant(name: &str) -> TenantName {
    TenantName::parse(name).unwrap()
}

/// Exchange handing out a fixed token, optionally failing.
#[derive(Clone, Default)]
pub struct StaticExchange {
    pub calls: Arc<AtomicUsize>,
    pub failing: Arc<AtomicBool>,
}

#[async_trait]
impl TokenExchange for StaticExchange {
    async fn exchange(&self, _now: DateTime<Utc>) -> Result<IssuedToken, CredentialError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CredentialError::Http("token endpoint down".into()));
        }
        Ok(IssuedToken {
            access_token: SecretString::from("static-token".to_string()),
            expires_in: None,
        })
    }
}

/// Dispatcher recording every call. Orders with a scripted outcome get it;
/// the rest are `Sent`. Unknown type codes are `InvalidInput` without being
/// recorded as gateway calls.
#[derive(Clone, Default)]
pub struct RecordingDispatcher {
    calls: Arc<Mutex<Vec<(OrderId, String)>>>,
    scripted: Arc<Mutex<HashMap<OrderId, DispatchOutcome>>>,
}

impl RecordingDispatcher {
    pub fn script(&self, order_id: i64, outcome: DispatchOutcome) {
        self.scripted
            .lock()
            .unwrap()
            .insert(OrderId::new(order_id), outcome);
    }

    pub fn calls(&self) -> Vec<(OrderId, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_ids(&self) -> Vec<i64> {
        self.calls().into_iter().map(|(id, _)| id.get()).collect()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn dispatch(
        &self,
        _token: &AccessToken,
        _device: &DeviceToken,
        order_id: OrderId,
        order_type: &str,
    ) -> DispatchOutcome {
        let order_type = match OrderType::from_code(order_type) {
            Ok(parsed) => parsed,
            Err(err) => return DispatchOutcome::failed(ErrorClass::InvalidInput, err.to_string()),
        };
        self.calls
            .lock()
            .unwrap()
            .push((order_id, order_type.title(order_id)));
        // Give concurrently running workers a chance to interleave.
        tokio::task::yield_now().await;
        self.scripted
            .lock()
            .unwrap()
            .get(&order_id)
            .cloned()
            .unwrap_or(DispatchOutcome::Sent)
    }
}

pub type TestWorker<D> =
    NotificationWorker<InMemoryOrderStore, InMemoryOrderStore, D, StaticExchange>;

pub fn settings() -> WorkerSettings {
    WorkerSettings {
        batch_size: 10,
        poll_interval: Duration::from_millis(10),
        token_backoff: BackoffPolicy::exponential(
            Duration::from_millis(20),
            Duration::from_secs(1),
        ),
        ..WorkerSettings::default()
    }
}

pub fn worker_with<D: NotificationDispatcher>(
    store: &InMemoryOrderStore,
    dispatcher: D,
    exchange: StaticExchange,
    settings: WorkerSettings,
    probe: FixedMemoryProbe,
) -> TestWorker<D> {
    let tokens = TokenCache::new(exchange, Arc::new(SystemClock), Duration::from_secs(3000));
    NotificationWorker::new(store.clone(), store.clone(), dispatcher, tokens, settings)
        .with_memory_probe(Box::new(probe))
}

pub fn worker(
    store: &InMemoryOrderStore,
    dispatcher: RecordingDispatcher,
) -> TestWorker<RecordingDispatcher> {
    worker_with(
        store,
        dispatcher,
        StaticExchange::default(),
        settings(),
        FixedMemoryProbe::new(0),
    )
}
