//! Infrastructure layer: storage, credentials, push gateway, configuration.

pub mod backoff;
pub mod config;
pub mod credentials;
pub mod gateway;
pub mod http;
pub mod memory;
pub mod storage;

pub use backoff::BackoffPolicy;
pub use crate::config::{ConfigError, LockMode, WorkerConfig};
pub use credentials::{
    AccessToken, CredentialError, IssuedToken, ServiceAccountExchange, ServiceAccountKey,
    TokenCache, TokenExchange,
};
pub use gateway::{
    FailureClassifier, FcmDispatcher, GatewayErrorClassifier, GatewayFailure,
    NotificationDispatcher, WebpushOptions,
};
pub use memory::{FixedMemoryProbe, MemoryProbe, SysinfoMemoryProbe};
pub use storage::{
    InMemoryOrderStore, MySqlClaimStore, MySqlTenantDirectory, OrderClaim, OrderClaimStore,
    StoreError, StoredOrder, TenantDirectory, TenantPools,
};
