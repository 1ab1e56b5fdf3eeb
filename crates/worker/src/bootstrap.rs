//! Production wiring: MySQL storage, service-account credentials and FCM.

use std::sync::Arc;

use tracing::info;

use orderpush_core::SystemClock;
use orderpush_infra::{
    FcmDispatcher, MySqlClaimStore, MySqlTenantDirectory, ServiceAccountExchange,
    ServiceAccountKey, TenantPools, TokenCache, WebpushOptions, WorkerConfig,
};

use crate::error::WorkerError;
use crate::worker::{NotificationWorker, WorkerSettings};

pub type ProductionWorker = NotificationWorker<
    MySqlTenantDirectory,
    MySqlClaimStore,
    FcmDispatcher,
    ServiceAccountExchange,
>;

/// Build the worker from configuration.
///
/// Credentials are read here, once; a missing or malformed file is fatal.
/// No network or database connection is opened yet.
pub fn build(config: &WorkerConfig) -> Result<ProductionWorker, WorkerError> {
    let key = ServiceAccountKey::load(&config.credentials_path)?;
    let project_id = key
        .project_id
        .clone()
        .or_else(|| config.project_id.clone())
        .ok_or(WorkerError::MissingProjectId)?;

    let http = orderpush_infra::http::build_client(
        config.http_connect_timeout(),
        config.http_timeout(),
    )
    .map_err(|e| WorkerError::HttpClient(e.to_string()))?;

    let exchange =
        ServiceAccountExchange::new(&key, config.token_endpoint.clone(), http.clone())?;
    let tokens = TokenCache::new(exchange, Arc::new(SystemClock), config.token_cache_margin());

    let pools = Arc::new(TenantPools::from_config(config));
    let directory = MySqlTenantDirectory::new(
        pools.clone(),
        config.tenant_pattern.clone(),
        config.db_query_timeout(),
    );
    let claims = MySqlClaimStore::from_config(pools, config)?;

    let dispatcher = FcmDispatcher::new(
        http,
        &config.gateway_base_url,
        &project_id,
        WebpushOptions {
            icon_url: config.icon_url.clone(),
            badge_url: config.badge_url.clone(),
            link_base_url: config.link_base_url.clone(),
        },
    );

    info!(
        client_email = %key.client_email,
        project_id = %project_id,
        db_host = %config.db_host,
        tenant_pattern = %config.tenant_pattern,
        "worker configured"
    );

    let settings = WorkerSettings::from_config(config);
    Ok(NotificationWorker::new(directory, claims, dispatcher, tokens, settings))
}
