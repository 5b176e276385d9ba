//! Authentication suppliers.
//!
//! A supplier is asked for credentials every time a connection is opened or
//! re-authenticated. Token based suppliers hand out a cached access token
//! and rotate it once it expires.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::bolt::message::AuthToken;
use crate::driver::error::{DriverError, DriverResult};

// ============================================================================
// Authentication
// ============================================================================

/// Credentials plus the instant they stop being valid.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Authentication {
    token: AuthToken,
    expires_at: Option<DateTime<Utc>>,
}

impl Authentication {
    pub fn new(token: AuthToken, expires_at: Option<DateTime<Utc>>) -> Self {
        Self { token, expires_at }
    }

    /// Bearer token, e.g. an SSO access token
    pub fn bearer(token: &str, expires_at: Option<DateTime<Utc>>) -> Self {
        Self::new(AuthToken::bearer(token), expires_at)
    }

    pub fn token(&self) -> &AuthToken {
        &self.token
    }

    pub fn into_token(self) -> AuthToken {
        self.token
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        is_expired(self.expires_at, Utc::now())
    }
}

impl From<AuthToken> for Authentication {
    fn from(token: AuthToken) -> Self {
        Self::new(token, None)
    }
}

impl fmt::Debug for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authentication")
            .field("token", &self.token)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

fn is_expired(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires_at.is_some_and(|at| now >= at)
}

/// Source of credentials for new and re-authenticated connections.
pub trait AuthenticationSupplier: Send + Sync {
    fn get(&self) -> BoxFuture<'_, DriverResult<Authentication>>;
}

/// Supplier that always returns the same credentials.
#[derive(Debug, Clone)]
pub struct StaticSupplier {
    authentication: Authentication,
}

impl StaticSupplier {
    pub fn new(authentication: impl Into<Authentication>) -> Self {
        Self {
            authentication: authentication.into(),
        }
    }
}

impl AuthenticationSupplier for StaticSupplier {
    fn get(&self) -> BoxFuture<'_, DriverResult<Authentication>> {
        let authentication = self.authentication.clone();
        Box::pin(async move { Ok(authentication) })
    }
}

// ============================================================================
// Token rotation
// ============================================================================

/// Result of a token request
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenGrant {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.expires_at, now)
    }
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"******")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "******"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Identity provider round trips used by [`RefreshingSupplier`].
pub trait TokenExchange: Send + Sync {
    /// Obtain a new token from the user's credentials.
    fn exchange(&self) -> BoxFuture<'_, DriverResult<TokenGrant>>;

    /// Trade a refresh token for a new access token.
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, DriverResult<TokenGrant>>;
}

/// One token lifetime. The cell is filled by exactly one request, whose
/// result every caller of this generation shares.
struct Generation {
    previous: Option<TokenGrant>,
    cell: OnceCell<DriverResult<TokenGrant>>,
}

impl Generation {
    fn new(previous: Option<TokenGrant>) -> Arc<Self> {
        Arc::new(Self {
            previous,
            cell: OnceCell::new(),
        })
    }
}

/// Supplier caching a bearer token and rotating it once expired.
///
/// The first call performs a full exchange. Later calls reuse the token until
/// it expires, then refresh it with the refresh token, or exchange again when
/// there is none. Concurrent callers share one request.
pub struct RefreshingSupplier<E> {
    exchange: E,
    current: Mutex<Arc<Generation>>,
}

impl<E: TokenExchange> RefreshingSupplier<E> {
    pub fn new(exchange: E) -> Self {
        Self {
            exchange,
            current: Mutex::new(Generation::new(None)),
        }
    }

    /// Whether a token has been obtained and is past its expiry.
    pub fn current_token_is_expired(&self) -> bool {
        let generation = self.generation();
        matches!(generation.cell.get(), Some(Ok(grant)) if grant.is_expired_at(Utc::now()))
    }

    async fn grant(&self) -> DriverResult<TokenGrant> {
        let generation = self.generation();
        match self.resolve(&generation).await {
            Ok(grant) if grant.is_expired_at(Utc::now()) => {
                debug!("Access token expired");
                let next = self.advance(&generation, Some(grant));
                let result = self.resolve(&next).await;
                if result.is_err() {
                    self.advance(&next, next.previous.clone());
                }
                result
            }
            Ok(grant) => Ok(grant),
            Err(error) => {
                self.advance(&generation, generation.previous.clone());
                Err(error)
            }
        }
    }

    fn generation(&self) -> Arc<Generation> {
        let current = self.current.lock();
        Arc::clone(&current)
    }

    /// Install a successor of `seen` unless another caller already did, and
    /// return whatever generation is current.
    fn advance(&self, seen: &Arc<Generation>, previous: Option<TokenGrant>) -> Arc<Generation> {
        let mut current = self.current.lock();
        if Arc::ptr_eq(&current, seen) {
            *current = Generation::new(previous);
        }
        Arc::clone(&current)
    }

    async fn resolve(&self, generation: &Generation) -> DriverResult<TokenGrant> {
        generation
            .cell
            .get_or_init(|| self.request(generation.previous.as_ref()))
            .await
            .clone()
    }

    async fn request(&self, previous: Option<&TokenGrant>) -> DriverResult<TokenGrant> {
        let result = match previous.and_then(|p| p.refresh_token.as_deref()) {
            Some(refresh_token) => {
                debug!("Refreshing access token");
                self.exchange.refresh(refresh_token).await
            }
            None => {
                debug!("Requesting access token");
                self.exchange.exchange().await
            }
        };
        result.map_err(|error| {
            warn!(%error, "Token request failed");
            match error {
                DriverError::Authentication(_) => error,
                other => DriverError::authentication(other.to_string()),
            }
        })
    }
}

impl<E: TokenExchange> AuthenticationSupplier for RefreshingSupplier<E> {
    fn get(&self) -> BoxFuture<'_, DriverResult<Authentication>> {
        Box::pin(async move {
            let grant = self.grant().await?;
            Ok(Authentication::bearer(&grant.access_token, grant.expires_at))
        })
    }
}

impl<E> fmt::Debug for RefreshingSupplier<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshingSupplier").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingExchange {
        lifetime: chrono::Duration,
        exchanges: AtomicUsize,
        refreshes: AtomicUsize,
        fail: bool,
    }

    impl CountingExchange {
        fn new(lifetime: chrono::Duration) -> Self {
            Self {
                lifetime,
                exchanges: AtomicUsize::new(0),
                refreshes: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn grant(&self, n: usize) -> TokenGrant {
            TokenGrant {
                access_token: format!("access-{}", n),
                refresh_token: Some(format!("refresh-{}", n)),
                expires_at: Some(Utc::now() + self.lifetime),
            }
        }
    }

    impl TokenExchange for CountingExchange {
        fn exchange(&self) -> BoxFuture<'_, DriverResult<TokenGrant>> {
            Box::pin(async move {
                if self.fail {
                    return Err(DriverError::Timeout("identity provider".into()));
                }
                let n = self.exchanges.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(self.grant(n))
            })
        }

        fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, DriverResult<TokenGrant>> {
            Box::pin(async move {
                assert!(refresh_token.starts_with("refresh-"));
                tokio::time::sleep(Duration::from_millis(20)).await;
                let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(TokenGrant {
                    access_token: format!("refreshed-{}", n),
                    refresh_token: Some(format!("refresh-r{}", n)),
                    expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
                })
            })
        }
    }

    #[tokio::test]
    async fn test_static_supplier() {
        let supplier = StaticSupplier::new(AuthToken::basic("neo4j", "secret"));
        let auth = supplier.get().await.unwrap();
        assert_eq!(auth.token().scheme, "basic");
        assert!(!auth.is_expired());
    }

    #[tokio::test]
    async fn test_token_reused_until_expired() {
        let supplier = RefreshingSupplier::new(CountingExchange::new(chrono::Duration::hours(1)));
        let first = supplier.get().await.unwrap();
        let second = supplier.get().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.token().scheme, "bearer");
        assert_eq!(first.token().credentials.as_deref(), Some("access-1"));
        assert_eq!(supplier.exchange.exchanges.load(Ordering::SeqCst), 1);
        assert_eq!(supplier.exchange.refreshes.load(Ordering::SeqCst), 0);
        assert!(!supplier.current_token_is_expired());
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let supplier = Arc::new(RefreshingSupplier::new(CountingExchange::new(
            chrono::Duration::milliseconds(50),
        )));
        supplier.get().await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(supplier.current_token_is_expired());

        let callers = (0..10).map(|_| {
            let supplier = Arc::clone(&supplier);
            tokio::spawn(async move { supplier.get().await })
        });
        let results = futures::future::join_all(callers).await;

        for result in results {
            let auth = result.unwrap().unwrap();
            assert_eq!(auth.token().credentials.as_deref(), Some("refreshed-1"));
        }
        assert_eq!(supplier.exchange.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(supplier.exchange.exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_an_authentication_error() {
        let mut exchange = CountingExchange::new(chrono::Duration::hours(1));
        exchange.fail = true;
        let supplier = RefreshingSupplier::new(exchange);

        let err = supplier.get().await.unwrap_err();
        assert!(matches!(err, DriverError::Authentication(_)));
        // The failed generation is replaced, so the next call asks again.
        assert!(supplier.get().await.is_err());
        assert!(!supplier.current_token_is_expired());
    }
}
