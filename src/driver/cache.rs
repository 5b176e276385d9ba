//! Reference counted cache of drivers.
//!
//! Callers that connect with the same URIs, configuration, credentials and
//! properties share one [`Driver`]. Every lookup opens a session on it and
//! the driver lives as long as at least one of those sessions does.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::auth::{AuthenticationSupplier, AuthenticationSupplierRegistry, StaticSupplier};
use super::driver::{Driver, DriverConfig};
use super::error::DriverResult;
use super::session::{Session, SessionConfig};

/// Property naming the authentication supplier factory to use
pub const SUPPLIER_PROPERTY: &str = "authn.supplier";

// ============================================================================
// Key
// ============================================================================

/// Identity of a cached driver.
///
/// Compared and hashed structurally: the URIs, every configuration field
/// including the credentials, and the properties bag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DriverCacheKey {
    /// Seed URIs; the first one is connected to
    pub uris: Vec<String>,
    pub config: DriverConfig,
    pub properties: BTreeMap<String, String>,
}

impl DriverCacheKey {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            uris: vec![config.uri.clone()],
            config,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_uris(mut self, uris: Vec<String>) -> Self {
        self.uris = uris;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Creates the driver for a key seen for the first time
pub type DriverBuilder = dyn Fn(&DriverCacheKey) -> DriverResult<Driver> + Send + Sync;

/// Builder resolving credentials through `registry`.
///
/// When the properties name a factory under [`SUPPLIER_PROPERTY`], the
/// driver authenticates with the supplier it creates, passing the
/// configured principal and credentials as user and password. Otherwise
/// the configured token is used as is.
pub fn registry_builder(
    registry: Arc<AuthenticationSupplierRegistry>,
) -> impl Fn(&DriverCacheKey) -> DriverResult<Driver> + Send + Sync {
    move |key: &DriverCacheKey| {
        let config = key.config.clone();
        let supplier: Arc<dyn AuthenticationSupplier> = match key.properties.get(SUPPLIER_PROPERTY) {
            Some(name) => {
                let properties: HashMap<String, String> =
                    key.properties.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                registry.create(
                    name,
                    config.auth.principal.as_deref(),
                    config.auth.credentials.as_deref(),
                    &properties,
                )?
            }
            None => Arc::new(StaticSupplier::new(config.auth.clone())),
        };
        Driver::with_supplier(config, supplier)
    }
}

// ============================================================================
// DriverCache
// ============================================================================

/// A driver plus the number of sessions holding it
pub struct CachedDriver {
    key: DriverCacheKey,
    driver: Driver,
    sessions: AtomicI64,
    closed: AtomicBool,
}

impl CachedDriver {
    fn new(key: DriverCacheKey, driver: Driver) -> Self {
        Self {
            key,
            driver,
            sessions: AtomicI64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    pub fn key(&self) -> &DriverCacheKey {
        &self.key
    }

    /// Sessions currently open on this driver
    pub fn session_count(&self) -> i64 {
        self.sessions.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.driver.close();
            info!(uris = ?self.key.uris, "Closed cached driver");
        }
    }
}

impl fmt::Debug for CachedDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedDriver")
            .field("uris", &self.key.uris)
            .field("sessions", &self.session_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Drivers keyed by [`DriverCacheKey`]
pub struct DriverCache {
    drivers: Mutex<HashMap<DriverCacheKey, Arc<CachedDriver>>>,
    builder: Box<DriverBuilder>,
}

impl DriverCache {
    pub fn new<B>(builder: B) -> Arc<Self>
    where
        B: Fn(&DriverCacheKey) -> DriverResult<Driver> + Send + Sync + 'static,
    {
        Arc::new(Self {
            drivers: Mutex::new(HashMap::new()),
            builder: Box::new(builder),
        })
    }

    /// Cache building drivers with [`registry_builder`]
    pub fn with_registry(registry: Arc<AuthenticationSupplierRegistry>) -> Arc<Self> {
        Self::new(registry_builder(registry))
    }

    /// Open a session on the driver for `key`, building the driver first if
    /// no equal key is cached.
    pub fn get_or_create(self: &Arc<Self>, key: DriverCacheKey, config: SessionConfig) -> DriverResult<CachedSession> {
        let mut drivers = self.drivers.lock();
        let (cached, session) = match drivers.get(&key) {
            Some(cached) => {
                let session = cached.driver.session(config)?;
                (Arc::clone(cached), session)
            }
            None => {
                let driver = (self.builder)(&key)?;
                // Only a driver that produced a session is cached.
                let session = driver.session(config)?;
                info!(uris = ?key.uris, "Cached new driver");
                let cached = Arc::new(CachedDriver::new(key.clone(), driver));
                drivers.insert(key, Arc::clone(&cached));
                (cached, session)
            }
        };
        let sessions = cached.sessions.fetch_add(1, Ordering::AcqRel) + 1;
        drop(drivers);

        debug!(uris = ?cached.key.uris, sessions, "Session opened on cached driver");
        Ok(CachedSession {
            session,
            cached,
            cache: Arc::downgrade(self),
            released: false,
        })
    }

    /// Number of cached drivers
    pub fn len(&self) -> usize {
        self.drivers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop `cached` from the cache and close it, unless a session was
    /// opened on it in the meantime.
    fn evict(&self, cached: &Arc<CachedDriver>) {
        let mut drivers = self.drivers.lock();
        if cached.session_count() > 0 {
            return;
        }
        if drivers.get(&cached.key).is_some_and(|current| Arc::ptr_eq(current, cached)) {
            drivers.remove(&cached.key);
        }
        drop(drivers);
        cached.close();
    }
}

impl fmt::Debug for DriverCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverCache").field("drivers", &self.len()).finish()
    }
}

// ============================================================================
// CachedSession
// ============================================================================

/// Session on a cached driver; releases the driver when closed or dropped.
pub struct CachedSession {
    session: Session,
    cached: Arc<CachedDriver>,
    cache: Weak<DriverCache>,
    released: bool,
}

impl CachedSession {
    pub fn driver(&self) -> &Driver {
        &self.cached.driver
    }

    pub fn cached_driver(&self) -> &Arc<CachedDriver> {
        &self.cached
    }

    /// Close the session, and the driver if this was its last session.
    pub async fn close(mut self) -> DriverResult<()> {
        let result = self.session.close().await;
        self.release();
        result
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        let remaining = self.cached.sessions.fetch_sub(1, Ordering::AcqRel) - 1;
        debug!(uris = ?self.cached.key.uris, sessions = remaining, "Session released");
        if remaining > 0 {
            return;
        }
        match self.cache.upgrade() {
            Some(cache) => cache.evict(&self.cached),
            None => self.cached.close(),
        }
    }
}

impl Deref for CachedSession {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Drop for CachedSession {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for CachedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedSession")
            .field("driver", &self.cached)
            .field("released", &self.released)
            .finish()
    }
}
