//! Driver instance and configuration

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::auth::{Authentication, AuthenticationSupplier, StaticSupplier};
use super::bolt::{default_bolt_agent, BoltConnection, ConnectionConfig, CLIENT_USER_AGENT};
use super::error::{DriverError, DriverResult};
use super::session::{Session, SessionConfig};
use crate::bolt::codec::{DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_SIZE};
use crate::bolt::message::{AuthToken, UNLIMITED};
use crate::bolt::BoltVersion;

/// Default Bolt port
pub const DEFAULT_PORT: u16 = 7687;

/// Default number of records per PULL
pub const DEFAULT_FETCH_SIZE: i64 = 1000;

// ============================================================================
// TrustStrategy
// ============================================================================

/// Which certificates an encrypted connection accepts
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum TrustStrategy {
    /// Certificates signed by the system CAs
    #[default]
    TrustSystemCas,
    /// Any certificate (`+ssc` schemes)
    TrustAllCertificates,
    /// Certificates signed by the CAs in these PEM files
    TrustCustomCas { certificates: Vec<PathBuf> },
}

// ============================================================================
// ServerAddress
// ============================================================================

/// Host and port of a server
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse the authority part of a `bolt://` or `neo4j://` URI.
    pub fn from_uri(uri: &str) -> DriverResult<Self> {
        ParsedUri::parse(uri).map(|parsed| parsed.address)
    }

    /// `host:port`, with IPv6 hosts in brackets
    pub fn to_socket_addr(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

/// Connection URI split into the parts the driver cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedUri {
    address: ServerAddress,
    encrypted: bool,
    trust_all: bool,
    routing: bool,
    /// Query parameters of a routing URI
    routing_context: BTreeMap<String, String>,
}

impl ParsedUri {
    fn parse(uri: &str) -> DriverResult<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| DriverError::configuration(format!("Invalid URI '{}': missing scheme", uri)))?;

        let (routing, encrypted, trust_all) = match scheme.to_ascii_lowercase().as_str() {
            "bolt" => (false, false, false),
            "bolt+s" => (false, true, false),
            "bolt+ssc" => (false, true, true),
            "neo4j" => (true, false, false),
            "neo4j+s" => (true, true, false),
            "neo4j+ssc" => (true, true, true),
            other => {
                return Err(DriverError::configuration(format!(
                    "Unsupported URI scheme '{}', expected bolt or neo4j",
                    other
                )))
            }
        };

        let (authority, query) = match rest.split_once('?') {
            Some((authority, query)) => (authority, Some(query)),
            None => (rest, None),
        };
        let authority = authority.trim_end_matches('/');
        let address = parse_authority(authority)?;

        let mut routing_context = BTreeMap::new();
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            if !routing {
                return Err(DriverError::configuration(format!(
                    "Routing context is not supported by the '{}' scheme",
                    scheme
                )));
            }
            for pair in query.split('&') {
                match pair.split_once('=') {
                    Some((key, value)) if !key.is_empty() && !value.is_empty() => {
                        if key == "address" {
                            return Err(DriverError::configuration(
                                "Routing context key 'address' is reserved",
                            ));
                        }
                        routing_context.insert(key.to_string(), value.to_string());
                    }
                    _ => {
                        return Err(DriverError::configuration(format!(
                            "Invalid routing context parameter '{}'",
                            pair
                        )))
                    }
                }
            }
        }

        Ok(Self {
            address,
            encrypted,
            trust_all,
            routing,
            routing_context,
        })
    }
}

fn parse_authority(authority: &str) -> DriverResult<ServerAddress> {
    let invalid = || DriverError::configuration(format!("Invalid server address '{}'", authority));
    let port = |s: &str| s.parse::<u16>().map_err(|_| DriverError::configuration(format!("Invalid port '{}'", s)));

    if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, tail) = bracketed.split_once(']').ok_or_else(invalid)?;
        return match tail.strip_prefix(':') {
            Some(p) => Ok(ServerAddress::new(host, port(p)?)),
            None if tail.is_empty() => Ok(ServerAddress::new(host, DEFAULT_PORT)),
            None => Err(invalid()),
        };
    }

    match authority.split_once(':') {
        _ if authority.is_empty() => Err(invalid()),
        Some((host, p)) if !host.is_empty() && !p.contains(':') => Ok(ServerAddress::new(host, port(p)?)),
        Some(_) => Err(invalid()),
        None => Ok(ServerAddress::new(authority, DEFAULT_PORT)),
    }
}

// ============================================================================
// DriverConfig
// ============================================================================

/// Driver settings.
///
/// Equality and hashing are structural so a configuration can key the
/// driver cache; settings the client does not act on are kept for that
/// reason alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DriverConfig {
    /// URI the driver was created from
    pub uri: String,
    pub address: ServerAddress,
    pub auth: AuthToken,
    pub encrypted: bool,
    pub trust_strategy: TrustStrategy,
    pub max_connection_pool_size: usize,
    pub max_connection_lifetime: Duration,
    pub connection_acquisition_timeout: Duration,
    /// TCP connect plus handshake
    pub connection_timeout: Duration,
    /// Upper bound on retrying transient failures
    pub max_transaction_retry_time: Duration,
    pub keep_alive: bool,
    pub user_agent: String,
    /// Records per PULL, [`UNLIMITED`] for all
    pub fetch_size: i64,
    pub max_chunk_size: usize,
    pub max_message_size: usize,
    /// Sent in HELLO when connecting with a `neo4j` scheme
    pub routing_context: Option<BTreeMap<String, String>>,
}

impl DriverConfig {
    pub fn new(uri: &str, auth: AuthToken) -> DriverResult<Self> {
        let parsed = ParsedUri::parse(uri)?;
        Ok(Self {
            uri: uri.to_string(),
            address: parsed.address,
            auth,
            encrypted: parsed.encrypted,
            trust_strategy: if parsed.trust_all {
                TrustStrategy::TrustAllCertificates
            } else {
                TrustStrategy::default()
            },
            routing_context: parsed.routing.then_some(parsed.routing_context),
            ..Self::default()
        })
    }

    pub fn builder(uri: &str, auth: AuthToken) -> DriverResult<DriverConfigBuilder> {
        let config = Self::new(uri, auth)?;
        Ok(DriverConfigBuilder { config })
    }

    /// Reject settings no connection could be opened with.
    pub fn validate(&self) -> DriverResult<()> {
        if self.fetch_size == 0 || self.fetch_size < UNLIMITED {
            return Err(DriverError::configuration(format!(
                "Fetch size must be positive or {} for all records, got {}",
                UNLIMITED, self.fetch_size
            )));
        }
        if self.max_chunk_size == 0 || self.max_chunk_size > u16::MAX as usize {
            return Err(DriverError::configuration(format!(
                "Max chunk size must be between 1 and {}, got {}",
                u16::MAX,
                self.max_chunk_size
            )));
        }
        if self.max_message_size == 0 {
            return Err(DriverError::configuration("Max message size must be positive"));
        }
        if self.connection_timeout.is_zero() {
            return Err(DriverError::configuration("Connection timeout must be positive"));
        }
        Ok(())
    }

    /// Settings for one connection to [`DriverConfig::address`]
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            address: self.address.to_string(),
            user_agent: self.user_agent.clone(),
            bolt_agent: default_bolt_agent(),
            routing_context: self
                .routing_context
                .as_ref()
                .map(|context| context.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            handshake_timeout: self.connection_timeout,
            max_chunk_size: self.max_chunk_size,
            max_message_size: self.max_message_size,
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            uri: format!("bolt://localhost:{}", DEFAULT_PORT),
            address: ServerAddress::default(),
            auth: AuthToken::none(),
            encrypted: false,
            trust_strategy: TrustStrategy::default(),
            max_connection_pool_size: 100,
            max_connection_lifetime: Duration::from_secs(3600),
            connection_acquisition_timeout: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(30),
            max_transaction_retry_time: Duration::from_secs(30),
            keep_alive: true,
            user_agent: CLIENT_USER_AGENT.to_string(),
            fetch_size: DEFAULT_FETCH_SIZE,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            routing_context: None,
        }
    }
}

// ============================================================================
// DriverConfigBuilder
// ============================================================================

/// Builder for [`DriverConfig`]
#[derive(Debug, Clone)]
pub struct DriverConfigBuilder {
    config: DriverConfig,
}

impl DriverConfigBuilder {
    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.config.encrypted = encrypted;
        self
    }

    pub fn with_trust_strategy(mut self, strategy: TrustStrategy) -> Self {
        self.config.trust_strategy = strategy;
        self
    }

    pub fn with_max_connection_pool_size(mut self, size: usize) -> Self {
        self.config.max_connection_pool_size = size;
        self
    }

    pub fn with_max_connection_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.max_connection_lifetime = lifetime;
        self
    }

    pub fn with_connection_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_acquisition_timeout = timeout;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    pub fn with_max_transaction_retry_time(mut self, time: Duration) -> Self {
        self.config.max_transaction_retry_time = time;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.config.keep_alive = keep_alive;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn with_fetch_size(mut self, size: i64) -> Self {
        self.config.fetch_size = size;
        self
    }

    pub fn with_max_chunk_size(mut self, size: usize) -> Self {
        self.config.max_chunk_size = size;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Replace the routing context parsed from the URI.
    pub fn with_routing_context(mut self, context: BTreeMap<String, String>) -> Self {
        self.config.routing_context = Some(context);
        self
    }

    pub fn build(self) -> DriverConfig {
        self.config
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Byte stream a connection runs over
pub trait AsyncStream: AsyncRead + AsyncWrite {}

impl<T: AsyncRead + AsyncWrite + ?Sized> AsyncStream for T {}

/// Boxed transport handed out by a [`Connector`]
pub type BoxedStream = Pin<Box<dyn AsyncStream + Send>>;

/// Opens transports to a server.
///
/// The built-in [`TcpConnector`] speaks plain TCP. Encrypted connections
/// need a connector that wraps the socket in TLS.
pub trait Connector: Send + Sync {
    fn connect<'a>(&'a self, config: &'a DriverConfig) -> BoxFuture<'a, DriverResult<BoxedStream>>;
}

/// Plain TCP with `TCP_NODELAY`
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, config: &'a DriverConfig) -> BoxFuture<'a, DriverResult<BoxedStream>> {
        Box::pin(async move {
            if config.encrypted {
                return Err(DriverError::configuration(
                    "Encrypted connections need a TLS connector, the TCP connector is plain text only",
                ));
            }
            let address = config.address.to_socket_addr();
            let stream = tokio::time::timeout(config.connection_timeout, TcpStream::connect(&address))
                .await
                .map_err(|_| {
                    DriverError::Timeout(format!(
                        "Connecting to {} took longer than {:?}",
                        address, config.connection_timeout
                    ))
                })?
                .map_err(|e| DriverError::connection_terminated(format!("Failed to connect to {}: {}", address, e)))?;
            stream.set_nodelay(true).ok();
            Ok(Box::pin(stream) as BoxedStream)
        })
    }
}

/// Hands out pre-opened streams in order, one per connection.
///
/// Useful for tests and for transports established outside the driver.
#[derive(Default)]
pub struct StreamConnector {
    streams: Mutex<VecDeque<BoxedStream>>,
}

impl StreamConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.streams.lock().push_back(Box::pin(stream));
    }
}

impl Connector for StreamConnector {
    fn connect<'a>(&'a self, config: &'a DriverConfig) -> BoxFuture<'a, DriverResult<BoxedStream>> {
        let stream = self.streams.lock().pop_front();
        Box::pin(async move {
            stream.ok_or_else(|| {
                DriverError::connection_terminated(format!("No stream left to connect to {}", config.address))
            })
        })
    }
}

impl fmt::Debug for StreamConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConnector")
            .field("available", &self.streams.lock().len())
            .finish()
    }
}

// ============================================================================
// Driver
// ============================================================================

struct DriverInner {
    config: DriverConfig,
    supplier: Arc<dyn AuthenticationSupplier>,
    connector: Arc<dyn Connector>,
    open: AtomicBool,
}

/// Entry point: holds the configuration and opens connections and sessions.
///
/// Cloning is cheap; clones share state, so closing one closes all.
#[derive(Clone)]
pub struct Driver {
    inner: Arc<DriverInner>,
}

impl Driver {
    pub fn new(uri: &str, auth: AuthToken) -> DriverResult<Self> {
        Self::with_config(DriverConfig::new(uri, auth)?)
    }

    /// Driver authenticating with the configuration's token
    pub fn with_config(config: DriverConfig) -> DriverResult<Self> {
        let supplier = Arc::new(StaticSupplier::new(config.auth.clone()));
        Self::with_supplier(config, supplier)
    }

    /// Driver asking `supplier` for credentials on every new connection
    pub fn with_supplier(config: DriverConfig, supplier: Arc<dyn AuthenticationSupplier>) -> DriverResult<Self> {
        Self::with_connector(config, supplier, Arc::new(TcpConnector))
    }

    pub fn with_connector(
        config: DriverConfig,
        supplier: Arc<dyn AuthenticationSupplier>,
        connector: Arc<dyn Connector>,
    ) -> DriverResult<Self> {
        config.validate()?;
        debug!(address = %config.address, encrypted = config.encrypted, "Driver created");
        Ok(Self {
            inner: Arc::new(DriverInner {
                config,
                supplier,
                connector,
                open: AtomicBool::new(true),
            }),
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.inner.config
    }

    pub fn supplier(&self) -> &Arc<dyn AuthenticationSupplier> {
        &self.inner.supplier
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        self.inner.config.connection_config()
    }

    /// Open an authenticated connection.
    pub async fn connect(&self) -> DriverResult<BoltConnection> {
        self.open_connection().await.map(|(connection, _)| connection)
    }

    /// Open a connection, returning the credentials it authenticated with.
    pub(crate) async fn open_connection(&self) -> DriverResult<(BoltConnection, Authentication)> {
        self.ensure_open()?;
        let authentication = self.inner.supplier.get().await?;
        let stream = self.inner.connector.connect(&self.inner.config).await?;
        let connection =
            BoltConnection::open(stream, &self.connection_config(), authentication.token().clone()).await?;
        Ok((connection, authentication))
    }

    pub fn session(&self, config: SessionConfig) -> DriverResult<Session> {
        self.ensure_open()?;
        Ok(Session::new(self.clone(), config))
    }

    pub fn default_session(&self) -> DriverResult<Session> {
        self.session(SessionConfig::default())
    }

    /// Open and close one connection, reporting what the server announced.
    pub async fn verify_connectivity(&self) -> DriverResult<ServerInfo> {
        let connection = self.connect().await?;
        let info = ServerInfo::from_connection(&connection);
        connection.close().await;
        info
    }

    /// Stop handing out connections and sessions. Idempotent.
    pub fn close(&self) {
        if self.inner.open.swap(false, Ordering::AcqRel) {
            info!(address = %self.inner.config.address, "Driver closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DriverError::invalid_state("Driver is closed"))
        }
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("address", &self.inner.config.address)
            .field("open", &self.is_open())
            .finish()
    }
}

// ============================================================================
// ServerInfo
// ============================================================================

/// What a server announced when a connection was opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub address: String,
    /// e.g. `Neo4j/5.13.0`
    pub agent: String,
    pub protocol_version: BoltVersion,
}

impl ServerInfo {
    pub(crate) fn from_connection(connection: &BoltConnection) -> DriverResult<Self> {
        let missing = |what: &str| DriverError::invalid_state(format!("Connection has no {} yet", what));
        Ok(Self {
            address: connection.address().to_string(),
            agent: connection.server_agent().ok_or_else(|| missing("server agent"))?,
            protocol_version: connection.version().ok_or_else(|| missing("protocol version"))?,
        })
    }
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Server @ {} (Agent: {}, Protocol: {})",
            self.address, self.agent, self.protocol_version
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
