//! MySQL-backed tenant directory and order claim store.
//!
//! Each tenant is a database on the same server. Orders live in the tenant's
//! `vendas` table; device tokens live in the shared users database.
//!
//! ## Error Mapping
//!
//! | SQLx Error | StoreError |
//! |------------|------------|
//! | Io / Tls / PoolTimedOut / PoolClosed | `Unavailable` |
//! | ColumnDecode / ColumnNotFound / Decode | `Decode` |
//! | anything else | `Query` |
//! | (call exceeded `db_query_timeout_ms`) | `Timeout` |
//!
//! ## Locking
//!
//! The claim opens its transaction BEFORE the locking read, so row locks are
//! held until `commit`/`rollback`. With `LockMode::SkipLocked` a second worker
//! skips rows another worker holds; with `LockMode::Blocking` it waits and then
//! re-evaluates eligibility against the committed rows.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlSslMode};
use sqlx::{MySql, Row, Transaction};
use tracing::{debug, instrument, warn};

use orderpush_core::{OrderId, PendingOrder, TenantName};

use super::{OrderClaim, OrderClaimStore, StoreError, TenantDirectory, claimed_order};
use crate::config::{LockMode, WorkerConfig};

/// Run a storage call with a hard upper bound on its duration.
async fn bounded<T, F>(limit: Duration, operation: &'static str, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => Err(StoreError::Timeout(limit, operation)),
    }
}

/// Connection pools for the server and each tenant database.
///
/// Pools are created lazily (no connection is opened until first use) and
/// pruned to the set of tenants discovered in the latest cycle.
pub struct TenantPools {
    base: MySqlConnectOptions,
    max_connections: u32,
    acquire_timeout: Duration,
    server: MySqlPool,
    tenants: Mutex<HashMap<TenantName, MySqlPool>>,
}

impl TenantPools {
    pub fn new(
        base: MySqlConnectOptions,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Self {
        let server = Self::pool_options(max_connections, acquire_timeout)
            .connect_lazy_with(base.clone());
        Self {
            base,
            max_connections,
            acquire_timeout,
            server,
            tenants: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        let mut base = MySqlConnectOptions::new()
            .host(&config.db_host)
            .port(config.db_port)
            .username(&config.db_user)
            .password(&config.db_password);
        base = match &config.db_ssl_ca {
            Some(ca) => base.ssl_mode(MySqlSslMode::VerifyCa).ssl_ca(ca),
            None => base.ssl_mode(MySqlSslMode::Preferred),
        };
        Self::new(
            base,
            config.db_max_connections_per_tenant,
            config.db_connect_timeout(),
        )
    }

    fn pool_options(max_connections: u32, acquire_timeout: Duration) -> MySqlPoolOptions {
        MySqlPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(0)
            .acquire_timeout(acquire_timeout)
    }

    /// Pool without a default database, used for discovery.
    pub fn server(&self) -> &MySqlPool {
        &self.server
    }

    /// Pool bound to `tenant`'s database.
    pub fn tenant(&self, tenant: &TenantName) -> Result<MySqlPool, StoreError> {
        let mut pools = self
            .tenants
            .lock()
            .map_err(|_| StoreError::Unavailable("tenant pool registry poisoned".to_string()))?;
        let pool = pools.entry(tenant.clone()).or_insert_with(|| {
            debug!(tenant = %tenant, "creating tenant pool");
            Self::pool_options(self.max_connections, self.acquire_timeout)
                .connect_lazy_with(self.base.clone().database(tenant.as_str()))
        });
        Ok(pool.clone())
    }

    /// Close pools of tenants that are no longer listed.
    pub async fn retain(&self, live: &[TenantName]) {
        let live: HashSet<&TenantName> = live.iter().collect();
        let stale: Vec<(TenantName, MySqlPool)> = match self.tenants.lock() {
            Ok(mut pools) => {
                let names: Vec<TenantName> = pools
                    .keys()
                    .filter(|name| !live.contains(name))
                    .cloned()
                    .collect();
                names
                    .into_iter()
                    .filter_map(|name| pools.remove(&name).map(|pool| (name, pool)))
                    .collect()
            }
            Err(_) => Vec::new(),
        };
        for (name, pool) in stale {
            debug!(tenant = %name, "closing pool of vanished tenant");
            pool.close().await;
        }
    }

    pub fn open_tenant_pools(&self) -> usize {
        self.tenants.lock().map(|p| p.len()).unwrap_or(0)
    }
}

/// Lists tenant databases through `information_schema`.
pub struct MySqlTenantDirectory {
    pools: Arc<TenantPools>,
    pattern: String,
    query_timeout: Duration,
}

impl MySqlTenantDirectory {
    pub fn new(
        pools: Arc<TenantPools>,
        pattern: impl Into<String>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            pools,
            pattern: pattern.into(),
            query_timeout,
        }
    }
}

#[async_trait]
impl TenantDirectory for MySqlTenantDirectory {
    #[instrument(skip(self), fields(pattern = %self.pattern), err)]
    async fn list_tenants(&self) -> Result<Vec<TenantName>, StoreError> {
        let rows = bounded(
            self.query_timeout,
            "list_tenants",
            sqlx::query(
                r#"
                SELECT CAST(SCHEMA_NAME AS CHAR) AS name
                FROM information_schema.SCHEMATA
                WHERE SCHEMA_NAME LIKE ?
                ORDER BY SCHEMA_NAME
                "#,
            )
            .bind(&self.pattern)
            .fetch_all(self.pools.server()),
        )
        .await?;

        let mut tenants = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("name").map_err(StoreError::from)?;
            match TenantName::parse(name.clone()) {
                Ok(tenant) => tenants.push(tenant),
                Err(err) => warn!(database = %name, error = %err, "skipping unusable tenant name"),
            }
        }
        self.pools.retain(&tenants).await;
        Ok(tenants)
    }
}

/// Claims eligible orders with a locking read inside a tenant transaction.
pub struct MySqlClaimStore {
    pools: Arc<TenantPools>,
    claim_sql: String,
    query_timeout: Duration,
}

impl MySqlClaimStore {
    /// `users_database` must already be a validated identifier.
    pub fn new(
        pools: Arc<TenantPools>,
        users_database: &TenantName,
        lock_mode: LockMode,
        query_timeout: Duration,
    ) -> Self {
        Self {
            pools,
            claim_sql: claim_sql(users_database, lock_mode),
            query_timeout,
        }
    }

    pub fn from_config(pools: Arc<TenantPools>, config: &WorkerConfig) -> Result<Self, StoreError> {
        let users_database = TenantName::parse(config.users_database.clone())
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(Self::new(
            pools,
            &users_database,
            config.claim_lock_mode,
            config.db_query_timeout(),
        ))
    }
}

fn claim_sql(users_database: &TenantName, lock_mode: LockMode) -> String {
    let lock = match lock_mode {
        LockMode::SkipLocked => "FOR UPDATE OF v SKIP LOCKED",
        LockMode::Blocking => "FOR UPDATE",
    };
    format!(
        r#"
        SELECT
            CAST(v.Codigo AS SIGNED) AS order_id,
            CAST(v.tipo AS CHAR) AS order_type,
            CAST(u.fcm_token AS CHAR) AS device_token
        FROM vendas v
        INNER JOIN `{users}`.usuarios u ON v.id_usuario = u.id
        WHERE v.pedidoEnviado IS NOT NULL
          AND v.notificacao_enviada IS NULL
          AND u.fcm_token IS NOT NULL
          AND TRIM(REPLACE(REPLACE(REPLACE(u.fcm_token,
                CHAR(9 USING utf8mb4), ''),
                CHAR(10 USING utf8mb4), ''),
                CHAR(13 USING utf8mb4), '')) <> ''
        ORDER BY v.Codigo
        LIMIT ?
        {lock}
        "#,
        users = users_database.as_str(),
    )
}

#[async_trait]
impl OrderClaimStore for MySqlClaimStore {
    type Claim = MySqlClaim;

    #[instrument(skip(self), fields(tenant = %tenant), err)]
    async fn claim_batch(&self, tenant: &TenantName, limit: u32) -> Result<MySqlClaim, StoreError> {
        let pool = self.pools.tenant(tenant)?;
        let mut tx = bounded(self.query_timeout, "begin_transaction", pool.begin()).await?;

        // On error `tx` is dropped, which rolls it back.
        let rows = bounded(
            self.query_timeout,
            "claim_select",
            sqlx::query(&self.claim_sql).bind(limit).fetch_all(&mut *tx),
        )
        .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("order_id").map_err(StoreError::from)?;
            let order_type: Option<String> = row.try_get("order_type").map_err(StoreError::from)?;
            let token: String = row.try_get("device_token").map_err(StoreError::from)?;
            orders.extend(claimed_order(
                tenant,
                OrderId::new(id),
                order_type.unwrap_or_default(),
                token,
            ));
        }

        Ok(MySqlClaim {
            tx,
            tenant: tenant.clone(),
            orders,
            query_timeout: self.query_timeout,
        })
    }
}

/// Open tenant transaction holding row locks on `orders`.
pub struct MySqlClaim {
    tx: Transaction<'static, MySql>,
    tenant: TenantName,
    orders: Vec<PendingOrder>,
    query_timeout: Duration,
}

#[async_trait]
impl OrderClaim for MySqlClaim {
    fn orders(&self) -> &[PendingOrder] {
        &self.orders
    }

    async fn mark_delivered(&mut self, order_id: OrderId) -> Result<(), StoreError> {
        let result = bounded(
            self.query_timeout,
            "mark_delivered",
            sqlx::query("UPDATE vendas SET notificacao_enviada = NOW() WHERE Codigo = ?")
                .bind(order_id.get())
                .execute(&mut *self.tx),
        )
        .await?;
        if result.rows_affected() == 0 {
            warn!(tenant = %self.tenant, order_id = %order_id, "mark_delivered matched no row");
        }
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        bounded(self.query_timeout, "commit_transaction", self.tx.commit()).await
    }

    async fn rollback(self) -> Result<(), StoreError> {
        bounded(self.query_timeout, "rollback_transaction", self.tx.rollback()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TenantName {
        TenantName::parse("usuarios").unwrap()
    }

    #[test]
    fn skip_locked_sql_locks_only_orders() {
        let sql = claim_sql(&users(), LockMode::SkipLocked);
        assert!(sql.contains("FOR UPDATE OF v SKIP LOCKED"));
        assert!(sql.contains("`usuarios`.usuarios u"));
        assert!(sql.contains("LIMIT ?"));
    }

    #[test]
    fn blocking_sql_uses_plain_for_update() {
        let sql = claim_sql(&users(), LockMode::Blocking);
        assert!(sql.trim_end().ends_with("FOR UPDATE"));
        assert!(!sql.contains("SKIP LOCKED"));
    }

    #[test]
    fn claim_sql_encodes_eligibility() {
        let sql = claim_sql(&users(), LockMode::SkipLocked);
        assert!(sql.contains("v.pedidoEnviado IS NOT NULL"));
        assert!(sql.contains("v.notificacao_enviada IS NULL"));
        assert!(sql.contains("u.fcm_token IS NOT NULL"));
        assert!(sql.contains("CHAR(9 USING utf8mb4)"));
        assert!(sql.contains("CHAR(10 USING utf8mb4)"));
        assert!(sql.contains("CHAR(13 USING utf8mb4)"));
        assert!(sql.contains("'')) <> ''"));
    }

    #[tokio::test]
    async fn tenant_pools_are_lazy_and_pruned() {
        let pools = TenantPools::new(
            MySqlConnectOptions::new().host("127.0.0.1").port(1),
            1,
            Duration::from_millis(50),
        );
        let a = TenantName::parse("delivery_a").unwrap();
        let b = TenantName::parse("delivery_b").unwrap();

        pools.tenant(&a).unwrap();
        pools.tenant(&b).unwrap();
        pools.tenant(&a).unwrap();
        assert_eq!(pools.open_tenant_pools(), 2);

        pools.retain(std::slice::from_ref(&a)).await;
        assert_eq!(pools.open_tenant_pools(), 1);
    }
}
