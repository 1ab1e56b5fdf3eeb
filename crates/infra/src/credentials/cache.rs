//! Bearer-token reuse across cycles.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use orderpush_core::Clock;

use super::{AccessToken, CredentialError, TokenExchange};

/// Slack subtracted from the endpoint-reported lifetime.
const EXPIRY_SKEW: Duration = Duration::from_secs(60);

/// Caches one bearer token.
///
/// A token fetched at `T` is reused for every request until `T + margin`,
/// or earlier when the endpoint reports a shorter lifetime. Failed exchanges
/// leave the cache empty so the next call tries again.
pub struct TokenCache<E> {
    exchange: E,
    clock: Arc<dyn Clock>,
    margin: Duration,
    cached: Option<AccessToken>,
}

impl<E: TokenExchange> TokenCache<E> {
    pub fn new(exchange: E, clock: Arc<dyn Clock>, margin: Duration) -> Self {
        Self {
            exchange,
            clock,
            margin,
            cached: None,
        }
    }

    pub async fn get_token(&mut self) -> Result<AccessToken, CredentialError> {
        let now = self.clock.now();
        if let Some(token) = &self.cached {
            if token.is_valid_at(now) {
                return Ok(token.clone());
            }
        }

        self.cached = None;
        let issued = self.exchange.exchange(now).await?;

        let lifetime = match issued.expires_in {
            Some(reported) => self.margin.min(reported.saturating_sub(EXPIRY_SKEW)),
            None => self.margin,
        };
        let lifetime = chrono::Duration::from_std(lifetime).unwrap_or(chrono::Duration::zero());
        let token = AccessToken::new(issued.access_token, now + lifetime);
        info!(expires_at = %token.expires_at(), "access token refreshed");

        self.cached = Some(token.clone());
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::IssuedToken;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use orderpush_core::ManualClock;
    use secrecy::SecretString;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingExchange {
        calls: Arc<AtomicUsize>,
        failing: Arc<AtomicBool>,
        expires_in: Option<Duration>,
    }

    #[async_trait]
    impl TokenExchange for CountingExchange {
        async fn exchange(&self, _now: DateTime<Utc>) -> Result<IssuedToken, CredentialError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.failing.load(Ordering::SeqCst) {
                return Err(CredentialError::Http("connection refused".into()));
            }
            Ok(IssuedToken {
                access_token: SecretString::from(format!("token-{n}")),
                expires_in: self.expires_in,
            })
        }
    }

    fn start() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn token_is_reused_until_the_margin_elapses() {
        let clock = start();
        let exchange = CountingExchange::default();
        let calls = exchange.calls.clone();
        let mut cache =
            TokenCache::new(exchange, Arc::new(clock.clone()), Duration::from_secs(3000));

        let first = cache.get_token().await.unwrap();
        clock.advance(chrono::Duration::seconds(2999));
        let second = cache.get_token().await.unwrap();
        assert_eq!(first.secret(), second.secret());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(chrono::Duration::seconds(1));
        let third = cache.get_token().await.unwrap();
        assert_eq!(third.secret(), "token-2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn shorter_reported_lifetime_wins() {
        let clock = start();
        let exchange = CountingExchange {
            expires_in: Some(Duration::from_secs(600)),
            ..Default::default()
        };
        let mut cache =
            TokenCache::new(exchange, Arc::new(clock.clone()), Duration::from_secs(3000));

        let token = cache.get_token().await.unwrap();
        assert_eq!(token.expires_at(), clock.now() + chrono::Duration::seconds(540));
    }

    #[tokio::test]
    async fn failed_exchange_leaves_cache_empty() {
        let clock = start();
        let exchange = CountingExchange::default();
        let failing = exchange.failing.clone();
        let calls = exchange.calls.clone();
        let mut cache = TokenCache::new(exchange, Arc::new(clock), Duration::from_secs(3000));

        failing.store(true, Ordering::SeqCst);
        assert!(cache.get_token().await.is_err());
        assert!(cache.get_token().await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        failing.store(false, Ordering::SeqCst);
        assert_eq!(cache.get_token().await.unwrap().secret(), "token-3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
