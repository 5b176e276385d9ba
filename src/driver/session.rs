//! Sessions: auto-commit queries, explicit transactions and bookmarks
//!
//! A session owns at most one connection, opened on first use and reopened
//! when the previous one died. Before each unit of work the session asks the
//! driver's authentication supplier for credentials; when they changed since
//! the connection authenticated, the connection re-authenticates in place.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, warn};

use super::auth::Authentication;
use super::bolt::{BoltConnection, PullResponse, ResponseFuture, RunResponse, StreamSummary};
use super::driver::{Driver, ServerInfo};
use super::error::{DriverError, DriverResult};
use super::record::BoltRecord;
use super::transaction::{Transaction, TransactionConfig};
use super::types::Value;
use super::wire;
use crate::bolt::message::{
    AccessMode, Notification, PullMessage, QueryStats, RunMessage, TransactionMetadataBuilder, TransactionType,
};
use crate::bolt::packstream::PackStreamValue;

// ============================================================================
// Bookmark
// ============================================================================

/// Causal consistency marker returned by a committed transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bookmark {
    value: String,
}

impl Bookmark {
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into() }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl fmt::Display for Bookmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl From<String> for Bookmark {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Bookmark {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ============================================================================
// RetryPolicy
// ============================================================================

/// Exponential backoff with jitter for transient failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// No new attempt starts after this much time
    pub max_retry_time: Duration,
    pub initial_delay: Duration,
    pub multiplier: f64,
    /// Each delay is scaled by a random factor in `1 ± jitter`
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn new(max_retry_time: Duration) -> Self {
        Self {
            max_retry_time,
            ..Self::default()
        }
    }

    /// Run `work` until it succeeds, fails with an error that is not
    /// retryable, or the retry time is used up.
    pub async fn retry<T, F, Fut>(&self, mut work: F) -> DriverResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        let mut backoff = self.backoff();
        loop {
            match work().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !backoff.wait(&error).await {
                        return Err(error);
                    }
                }
            }
        }
    }

    fn backoff(&self) -> Backoff<'_> {
        Backoff {
            policy: self,
            start: Instant::now(),
            delay: self.initial_delay,
            attempt: 1,
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return delay;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        delay.mul_f64(factor)
    }
}

/// Retry state of one operation
struct Backoff<'a> {
    policy: &'a RetryPolicy,
    start: Instant,
    delay: Duration,
    attempt: u32,
}

impl Backoff<'_> {
    /// Sleep before the next attempt; `false` when `error` ends the operation.
    async fn wait(&mut self, error: &DriverError) -> bool {
        if !error.is_retryable() || self.start.elapsed() >= self.policy.max_retry_time {
            return false;
        }
        let pause = self.policy.jittered(self.delay);
        warn!(%error, attempt = self.attempt, delay_ms = pause.as_millis() as u64, "Transient failure, retrying");
        tokio::time::sleep(pause).await;
        self.delay = self
            .delay
            .mul_f64(self.policy.multiplier.max(1.0))
            .min(self.policy.max_retry_time);
        self.attempt += 1;
        true
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry_time: Duration::from_secs(30),
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

// ============================================================================
// SessionConfig
// ============================================================================

/// Session settings
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Target database; the server default when absent
    pub database: Option<String>,
    /// Records per PULL; the driver's fetch size when absent
    pub fetch_size: Option<i64>,
    pub access_mode: AccessMode,
    /// Bookmarks the first unit of work waits for
    pub bookmarks: Vec<Bookmark>,
    pub impersonated_user: Option<String>,
    /// Backoff for the retrying operations; derived from the driver when absent
    pub retry_policy: Option<RetryPolicy>,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }
}

/// Builder for [`SessionConfig`]
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.config.database = Some(database.into());
        self
    }

    pub fn with_fetch_size(mut self, size: i64) -> Self {
        self.config.fetch_size = Some(size);
        self
    }

    pub fn with_access_mode(mut self, mode: AccessMode) -> Self {
        self.config.access_mode = mode;
        self
    }

    pub fn with_read_access(self) -> Self {
        self.with_access_mode(AccessMode::Read)
    }

    pub fn with_write_access(self) -> Self {
        self.with_access_mode(AccessMode::Write)
    }

    pub fn with_bookmarks(mut self, bookmarks: Vec<Bookmark>) -> Self {
        self.config.bookmarks = bookmarks;
        self
    }

    pub fn with_bookmark(mut self, bookmark: Bookmark) -> Self {
        self.config.bookmarks.push(bookmark);
        self
    }

    pub fn with_impersonated_user(mut self, user: impl Into<String>) -> Self {
        self.config.impersonated_user = Some(user.into());
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry_policy = Some(policy);
        self
    }

    pub fn build(self) -> SessionConfig {
        self.config
    }
}

// ============================================================================
// Query
// ============================================================================

/// Query text and its parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub text: String,
    pub parameters: HashMap<String, Value>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parameters: HashMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_params(mut self, params: HashMap<String, Value>) -> Self {
        self.parameters.extend(params);
        self
    }

    pub(crate) fn run_message(&self, metadata: HashMap<String, PackStreamValue>) -> DriverResult<RunMessage> {
        let parameters = wire::pack_map(self.parameters.clone())?;
        Ok(RunMessage::new(&self.text)
            .with_parameters(parameters)
            .with_metadata(metadata))
    }
}

impl From<&str> for Query {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Query {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

// ============================================================================
// ResultSummary
// ============================================================================

/// What a query did, as the server reported it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    ReadOnly,
    ReadWrite,
    WriteOnly,
    SchemaWrite,
}

impl QueryType {
    /// Parse the `type` entry of a stream summary.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "r" => Some(Self::ReadOnly),
            "rw" => Some(Self::ReadWrite),
            "w" => Some(Self::WriteOnly),
            "s" => Some(Self::SchemaWrite),
            _ => None,
        }
    }
}

/// Summary of a fully consumed result
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSummary {
    pub query: Query,
    pub query_type: Option<QueryType>,
    pub counters: QueryStats,
    pub result_available_after: Option<Duration>,
    pub result_consumed_after: Option<Duration>,
    pub database: Option<String>,
    pub server: Option<ServerInfo>,
    pub notifications: Vec<Notification>,
    /// Bookmark of an auto-commit query
    pub bookmark: Option<Bookmark>,
}

impl ResultSummary {
    fn new(query: Query, run: &RunResponse, stream: StreamSummary, connection: &BoltConnection) -> Self {
        let millis = |ms: Option<i64>| ms.map(|ms| Duration::from_millis(ms.max(0) as u64));
        Self {
            query,
            query_type: stream.query_type.as_deref().and_then(QueryType::parse),
            notifications: Notification::list_from(stream.metadata.get("notifications")),
            counters: stream.stats,
            result_available_after: millis(run.t_first),
            result_consumed_after: millis(stream.t_last),
            database: stream.database,
            server: ServerInfo::from_connection(connection).ok(),
            bookmark: stream.bookmark.map(Bookmark::new),
        }
    }
}

// ============================================================================
// QueryResult
// ============================================================================

/// Records and summary of a query
#[derive(Debug, Clone)]
pub struct QueryResult {
    keys: Arc<[String]>,
    records: Vec<BoltRecord>,
    summary: ResultSummary,
}

impl QueryResult {
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn records(&self) -> &[BoltRecord] {
        &self.records
    }

    pub fn summary(&self) -> &ResultSummary {
        &self.summary
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The only record; an error when there are none or several.
    pub fn single(self) -> DriverResult<BoltRecord> {
        let count = self.records.len();
        let mut records = self.records.into_iter();
        match (records.next(), count) {
            (Some(record), 1) => Ok(record),
            (None, _) => Err(DriverError::NoSuchElement("Result is empty".into())),
            _ => Err(DriverError::NoSuchElement(format!(
                "Expected a single record, got {}",
                count
            ))),
        }
    }

    pub fn first(self) -> Option<BoltRecord> {
        self.records.into_iter().next()
    }

    pub fn into_parts(self) -> (Vec<BoltRecord>, ResultSummary) {
        (self.records, self.summary)
    }
}

impl IntoIterator for QueryResult {
    type Item = BoltRecord;
    type IntoIter = std::vec::IntoIter<BoltRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

/// Await a pipelined RUN and PULL, then keep pulling until the stream ends.
pub(crate) async fn collect_result(
    connection: &BoltConnection,
    query: Query,
    run: ResponseFuture<RunResponse>,
    pull: ResponseFuture<PullResponse>,
    fetch_size: i64,
) -> DriverResult<QueryResult> {
    let run = run.await?;
    let mut batch = pull.await?;
    let mut records = Vec::new();
    loop {
        for values in std::mem::take(&mut batch.records) {
            records.push(BoltRecord::new(Arc::clone(&run.keys), values)?);
        }
        if !batch.has_more {
            break;
        }
        debug!(qid = run.qid, fetched = records.len(), "Pulling next batch");
        batch = connection
            .pull(PullMessage::with_n(fetch_size).with_qid(run.qid))
            .await?;
    }

    let summary = ResultSummary::new(query, &run, batch.summary, connection);
    Ok(QueryResult {
        keys: run.keys,
        records,
        summary,
    })
}

// ============================================================================
// Session
// ============================================================================

/// Work running inside a managed transaction
pub type TransactionWork<'t, T> = BoxFuture<'t, DriverResult<T>>;

struct SessionConnection {
    connection: Arc<BoltConnection>,
    authentication: Authentication,
}

/// Sequence of causally chained units of work on one connection.
pub struct Session {
    driver: Driver,
    config: SessionConfig,
    connection: tokio::sync::Mutex<Option<SessionConnection>>,
    bookmarks: Arc<Mutex<Vec<Bookmark>>>,
    transaction_open: Arc<AtomicBool>,
    open: AtomicBool,
}

impl Session {
    pub(crate) fn new(driver: Driver, config: SessionConfig) -> Self {
        let bookmarks = config.bookmarks.iter().filter(|b| !b.is_empty()).cloned().collect();
        Self {
            driver,
            config,
            connection: tokio::sync::Mutex::new(None),
            bookmarks: Arc::new(Mutex::new(bookmarks)),
            transaction_open: Arc::new(AtomicBool::new(false)),
            open: AtomicBool::new(true),
        }
    }

    /// Run an auto-commit query and fetch all of its records.
    pub async fn run(&self, query: impl Into<Query>, params: Option<HashMap<String, Value>>) -> DriverResult<QueryResult> {
        self.run_with_config(query, params, TransactionConfig::default()).await
    }

    /// Like [`Session::run`], with a timeout and metadata for the implicit transaction.
    pub async fn run_with_config(
        &self,
        query: impl Into<Query>,
        params: Option<HashMap<String, Value>>,
        config: TransactionConfig,
    ) -> DriverResult<QueryResult> {
        self.ensure_open()?;
        self.ensure_no_transaction()?;

        let mut query = query.into();
        if let Some(params) = params {
            query = query.with_params(params);
        }
        let fetch_size = self.fetch_size();

        let connection = self.acquire().await?;
        let metadata =
            self.transaction_metadata(self.config.access_mode, TransactionType::Unconstrained, &config)?;
        let run = connection.run(query.run_message(metadata)?);
        let pull = connection.pull(PullMessage::with_n(fetch_size));

        let result = collect_result(&connection, query, run, pull, fetch_size).await?;
        if let Some(bookmark) = &result.summary.bookmark {
            self.replace_bookmarks(bookmark.clone());
        }
        Ok(result)
    }

    /// [`Session::run`], retried with backoff on transient failures.
    pub async fn run_with_retry(
        &self,
        query: impl Into<Query>,
        params: Option<HashMap<String, Value>>,
    ) -> DriverResult<QueryResult> {
        let query = query.into().with_params(params.unwrap_or_default());
        self.retry_policy().retry(|| self.run(query.clone(), None)).await
    }

    pub async fn begin_transaction(&self, config: Option<TransactionConfig>) -> DriverResult<Transaction> {
        self.begin(self.config.access_mode, config.unwrap_or_default()).await
    }

    /// Run `work` in a read transaction, retrying transient failures.
    ///
    /// The transaction commits when `work` succeeds and rolls back when it fails.
    pub async fn read_transaction<F, T>(&self, work: F) -> DriverResult<T>
    where
        F: for<'t> FnMut(&'t mut Transaction) -> TransactionWork<'t, T>,
    {
        self.execute_transaction(AccessMode::Read, work).await
    }

    /// Run `work` in a write transaction, retrying transient failures.
    pub async fn write_transaction<F, T>(&self, work: F) -> DriverResult<T>
    where
        F: for<'t> FnMut(&'t mut Transaction) -> TransactionWork<'t, T>,
    {
        self.execute_transaction(AccessMode::Write, work).await
    }

    async fn execute_transaction<F, T>(&self, mode: AccessMode, mut work: F) -> DriverResult<T>
    where
        F: for<'t> FnMut(&'t mut Transaction) -> TransactionWork<'t, T>,
    {
        let policy = self.retry_policy();
        let mut backoff = policy.backoff();
        loop {
            match self.attempt_transaction(mode, &mut work).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !backoff.wait(&error).await {
                        return Err(error);
                    }
                }
            }
        }
    }

    async fn attempt_transaction<F, T>(&self, mode: AccessMode, work: &mut F) -> DriverResult<T>
    where
        F: for<'t> FnMut(&'t mut Transaction) -> TransactionWork<'t, T>,
    {
        let mut tx = self.begin(mode, TransactionConfig::default()).await?;
        match work(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback) = tx.rollback().await {
                    debug!(%rollback, "Rollback after failed work failed");
                }
                Err(error)
            }
        }
    }

    async fn begin(&self, mode: AccessMode, config: TransactionConfig) -> DriverResult<Transaction> {
        self.ensure_open()?;
        self.ensure_no_transaction()?;

        let connection = self.acquire().await?;
        let metadata = self.transaction_metadata(mode, TransactionType::Default, &config)?;
        Transaction::begin(
            connection,
            metadata,
            self.fetch_size(),
            Arc::clone(&self.bookmarks),
            Arc::clone(&self.transaction_open),
        )
        .await
    }

    /// The newest bookmark, if any unit of work produced one.
    pub fn last_bookmark(&self) -> Option<Bookmark> {
        self.bookmarks.lock().last().cloned()
    }

    /// Bookmarks the next unit of work will wait for.
    pub fn last_bookmarks(&self) -> Vec<Bookmark> {
        self.bookmarks.lock().clone()
    }

    /// Close the session and its connection.
    pub async fn close(&self) -> DriverResult<()> {
        self.open.store(false, Ordering::Release);
        let current = self.connection.lock().await.take();
        if let Some(current) = current {
            current.connection.close().await;
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DriverError::invalid_state("Session is closed"))
        }
    }

    fn ensure_no_transaction(&self) -> DriverResult<()> {
        if self.transaction_open.load(Ordering::Acquire) {
            Err(DriverError::invalid_state(
                "A transaction is open in this session; commit or roll it back first",
            ))
        } else {
            Ok(())
        }
    }

    fn fetch_size(&self) -> i64 {
        self.config.fetch_size.unwrap_or(self.driver.config().fetch_size)
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.config
            .retry_policy
            .clone()
            .unwrap_or_else(|| RetryPolicy::new(self.driver.config().max_transaction_retry_time))
    }

    fn replace_bookmarks(&self, bookmark: Bookmark) {
        *self.bookmarks.lock() = vec![bookmark];
    }

    fn transaction_metadata(
        &self,
        mode: AccessMode,
        tx_type: TransactionType,
        config: &TransactionConfig,
    ) -> DriverResult<HashMap<String, PackStreamValue>> {
        let bookmarks: Vec<String> = self.bookmarks.lock().iter().map(|b| b.value().to_string()).collect();
        Ok(TransactionMetadataBuilder::new()
            .database(self.config.database.as_deref())
            .bookmarks(bookmarks)
            .mode(mode)
            .tx_type(tx_type)
            .timeout(config.timeout)
            .tx_metadata(wire::pack_map(config.metadata.clone())?)
            .impersonated_user(self.config.impersonated_user.as_deref())
            .build())
    }

    /// The session's connection, opened or re-authenticated as needed.
    async fn acquire(&self) -> DriverResult<Arc<BoltConnection>> {
        let mut slot = self.connection.lock().await;

        if let Some(current) = slot.as_mut() {
            if current.connection.is_open() {
                let authentication = self.driver.supplier().get().await?;
                if authentication == current.authentication {
                    return Ok(Arc::clone(&current.connection));
                }
                debug!(address = %current.connection.address(), "Credentials changed, re-authenticating");
                match current.connection.reauthenticate(authentication.token().clone()).await {
                    Ok(()) => {
                        current.authentication = authentication;
                        return Ok(Arc::clone(&current.connection));
                    }
                    Err(error) => {
                        warn!(%error, "Re-authentication failed, opening a new connection");
                        current.connection.close().await;
                    }
                }
            } else {
                debug!(
                    address = %current.connection.address(),
                    state = %current.connection.state(),
                    "Replacing closed connection"
                );
            }
        }

        let (connection, authentication) = self.driver.open_connection().await?;
        let connection = Arc::new(connection);
        *slot = Some(SessionConnection {
            connection: Arc::clone(&connection),
            authentication,
        });
        Ok(connection)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("database", &self.config.database)
            .field("access_mode", &self.config.access_mode)
            .field("open", &self.is_open())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::bolt::message::{tag, AuthToken};
    use crate::driver::auth::AuthenticationSupplier;
    use crate::driver::bolt::test_support::{accept_authenticated, init_tracing, stub_driver, StubServer};
    use crate::driver::driver::{DriverConfig, StreamConnector};

    fn int(v: i64) -> PackStreamValue {
        PackStreamValue::Integer(v)
    }

    fn fields(names: &[&str]) -> PackStreamValue {
        PackStreamValue::List(names.iter().map(|n| PackStreamValue::from(*n)).collect())
    }

    fn map_of(value: &PackStreamValue) -> &HashMap<String, PackStreamValue> {
        value.as_map().expect("map")
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retry_time: Duration::from_secs(5),
            initial_delay: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }

    #[tokio::test]
    async fn test_auto_commit_run_pulls_every_batch() {
        init_tracing();
        let (driver, mut servers) = stub_driver(1);
        let server = tokio::spawn(async move {
            let mut server = accept_authenticated(servers.remove(0)).await;
            let run = server.expect(tag::RUN).await;
            let pull = server.expect(tag::PULL).await;
            server.success(vec![("fields", fields(&["n"])), ("t_first", int(3))]).await;
            server.record(vec![int(1)]).await;
            server.record(vec![int(2)]).await;
            server.success(vec![("has_more", true.into())]).await;

            let next_pull = server.expect(tag::PULL).await;
            server.record(vec![int(3)]).await;
            server
                .success(vec![("bookmark", "bm-2".into()), ("type", "r".into()), ("db", "movies".into())])
                .await;
            (run, pull, next_pull)
        });

        let session = driver
            .session(
                SessionConfig::builder()
                    .with_database("movies")
                    .with_read_access()
                    .with_fetch_size(2)
                    .with_bookmark(Bookmark::new("bm-1"))
                    .with_impersonated_user("alice")
                    .build(),
            )
            .unwrap();
        let result = session
            .run("UNWIND range(1, 3) AS n RETURN n", Some(HashMap::from([("x".to_string(), Value::Integer(7))])))
            .await
            .unwrap();

        assert_eq!(result.keys(), ["n".to_string()]);
        let values: Vec<i64> = result.records().iter().map(|r| r.get_int("n").unwrap()).collect();
        assert_eq!(values, vec![1, 2, 3]);
        assert_eq!(result.summary().bookmark, Some(Bookmark::new("bm-2")));
        assert_eq!(result.summary().query_type, Some(QueryType::ReadOnly));
        assert_eq!(result.summary().database.as_deref(), Some("movies"));
        assert_eq!(result.summary().result_available_after, Some(Duration::from_millis(3)));
        assert_eq!(
            result.summary().server.as_ref().map(|s| s.agent.as_str()),
            Some("Neo4j/5.13.0")
        );
        assert_eq!(session.last_bookmarks(), vec![Bookmark::new("bm-2")]);

        let (run, pull, next_pull) = server.await.unwrap();
        assert_eq!(run[0].as_str(), Some("UNWIND range(1, 3) AS n RETURN n"));
        assert_eq!(map_of(&run[1]).get("x"), Some(&int(7)));
        let metadata = map_of(&run[2]);
        assert_eq!(metadata.get("db").and_then(|v| v.as_str()), Some("movies"));
        assert_eq!(metadata.get("mode").and_then(|v| v.as_str()), Some("r"));
        assert_eq!(metadata.get("imp_user").and_then(|v| v.as_str()), Some("alice"));
        assert_eq!(metadata.get("tx_type").and_then(|v| v.as_str()), Some("IMPLICIT"));
        assert_eq!(
            metadata.get("bookmarks"),
            Some(&PackStreamValue::List(vec!["bm-1".into()]))
        );
        assert_eq!(map_of(&pull[0]).get("n"), Some(&int(2)));
        assert_eq!(map_of(&next_pull[0]).get("n"), Some(&int(2)));
        assert_eq!(map_of(&next_pull[0]).get("qid"), None);
    }

    #[tokio::test]
    async fn test_failed_query_keeps_the_connection() {
        let (driver, mut servers) = stub_driver(1);
        let server = tokio::spawn(async move {
            let mut server = accept_authenticated(servers.remove(0)).await;
            server.expect(tag::RUN).await;
            server.expect(tag::PULL).await;
            server.failure("Neo.ClientError.Statement.SyntaxError", "Invalid input").await;
            server.ignored().await;

            server.expect(tag::RESET).await;
            server.expect(tag::RUN).await;
            server.expect(tag::PULL).await;
            server.success(vec![]).await;
            server.success(vec![("fields", fields(&["x"]))]).await;
            server.record(vec![int(1)]).await;
            server.success(vec![]).await;
        });

        let session = driver.default_session().unwrap();
        let err = session.run("RETRUN 1", None).await.unwrap_err();
        assert_eq!(err.code(), Some("Neo.ClientError.Statement.SyntaxError"));
        assert!(!err.is_retryable());

        let record = session.run("RETURN 1 AS x", None).await.unwrap().single().unwrap();
        assert_eq!(record.get_int("x").unwrap(), 1);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_with_retry_recovers_from_transient_failure() {
        let (driver, mut servers) = stub_driver(1);
        let server = tokio::spawn(async move {
            let mut server = accept_authenticated(servers.remove(0)).await;
            server.expect(tag::RUN).await;
            server.expect(tag::PULL).await;
            server
                .failure("Neo.TransientError.General.DatabaseUnavailable", "Database is busy")
                .await;
            server.ignored().await;

            server.expect(tag::RESET).await;
            server.expect(tag::RUN).await;
            server.expect(tag::PULL).await;
            server.success(vec![]).await;
            server.success(vec![("fields", fields(&["x"]))]).await;
            server.record(vec![int(42)]).await;
            server.success(vec![]).await;
        });

        let session = driver
            .session(SessionConfig::builder().with_retry_policy(fast_retry()).build())
            .unwrap();
        let result = session.run_with_retry("RETURN 42 AS x", None).await.unwrap();
        assert_eq!(result.single().unwrap().get_int("x").unwrap(), 42);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_retry_gives_up_on_client_errors() {
        let policy = fast_retry();
        let counter = AtomicUsize::new(0);
        let attempts = &counter;
        let result: DriverResult<()> = policy
            .retry(|| async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(DriverError::server("Neo.ClientError.Statement.SyntaxError", "nope"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        let counter = AtomicUsize::new(0);
        let attempts = &counter;
        let result = policy
            .retry(|| async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(DriverError::connection_terminated("reset by peer"))
                } else {
                    Ok("done")
                }
            })
            .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.jittered(Duration::from_secs(1));
            assert!(delay >= Duration::from_millis(800) && delay <= Duration::from_millis(1200));
        }
    }

    #[tokio::test]
    async fn test_dead_connection_is_replaced() {
        let (driver, mut servers) = stub_driver(2);
        let second = servers.pop().unwrap();
        let first = servers.pop().unwrap();
        let server = tokio::spawn(async move {
            let mut server = accept_authenticated(first).await;
            server.expect(tag::RUN).await;
            drop(server);

            let mut server = accept_authenticated(second).await;
            server.expect(tag::RUN).await;
            server.expect(tag::PULL).await;
            server.success(vec![("fields", fields(&[]))]).await;
            server.success(vec![]).await;
        });

        let session = driver.default_session().unwrap();
        let err = session.run("RETURN 1", None).await.unwrap_err();
        assert!(matches!(err, DriverError::ConnectionTerminated(_)));
        assert!(session.run("RETURN 1", None).await.unwrap().is_empty());
        server.await.unwrap();
    }

    /// Hands out a new bearer token on every call after the first.
    struct RotatingSupplier {
        calls: AtomicUsize,
    }

    impl AuthenticationSupplier for RotatingSupplier {
        fn get(&self) -> BoxFuture<'_, DriverResult<Authentication>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok(Authentication::bearer(&format!("token-{}", n.min(1)), None)) })
        }
    }

    #[tokio::test]
    async fn test_changed_credentials_reauthenticate_in_place() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let connector = Arc::new(StreamConnector::new());
        connector.push(client);
        let config = DriverConfig::new("bolt://localhost:7687", AuthToken::none()).unwrap();
        let supplier = Arc::new(RotatingSupplier {
            calls: AtomicUsize::new(0),
        });
        let driver = Driver::with_connector(config, supplier, connector).unwrap();

        let server = tokio::spawn(async move {
            let mut server = StubServer::accept(server, crate::bolt::BoltVersion::V5_4).await;
            server.expect(tag::HELLO).await;
            let logon = server.expect(tag::LOGON).await;
            server.success(vec![("server", "Neo4j/5.13.0".into())]).await;
            server.success(vec![]).await;
            server.expect(tag::RUN).await;
            server.expect(tag::PULL).await;
            server.success(vec![("fields", fields(&[]))]).await;
            server.success(vec![]).await;

            server.expect(tag::LOGOFF).await;
            let relogon = server.expect(tag::LOGON).await;
            server.success(vec![]).await;
            server.success(vec![]).await;
            server.expect(tag::RUN).await;
            server.expect(tag::PULL).await;
            server.success(vec![("fields", fields(&[]))]).await;
            server.success(vec![]).await;
            (logon, relogon)
        });

        let session = driver.default_session().unwrap();
        session.run("RETURN 1", None).await.unwrap();
        session.run("RETURN 1", None).await.unwrap();

        let (logon, relogon) = server.await.unwrap();
        let credentials = |fields: &[PackStreamValue]| {
            map_of(&fields[0]).get("credentials").and_then(|v| v.as_str()).map(str::to_string)
        };
        assert_eq!(credentials(&logon).as_deref(), Some("token-0"));
        assert_eq!(credentials(&relogon).as_deref(), Some("token-1"));
    }

    #[tokio::test]
    async fn test_write_transaction_commits_and_chains_bookmarks() {
        let (driver, mut servers) = stub_driver(1);
        let server = tokio::spawn(async move {
            let mut server = accept_authenticated(servers.remove(0)).await;
            let begin = server.expect(tag::BEGIN).await;
            server.success(vec![]).await;
            server.expect(tag::RUN).await;
            server.expect(tag::PULL).await;
            server.success(vec![("fields", fields(&["id"])), ("qid", int(0))]).await;
            server.record(vec![int(5)]).await;
            server.success(vec![]).await;
            server.expect(tag::COMMIT).await;
            server.success(vec![("bookmark", "bm-tx".into())]).await;

            let run = server.expect(tag::RUN).await;
            server.expect(tag::PULL).await;
            server.success(vec![("fields", fields(&[]))]).await;
            server.success(vec![]).await;
            (begin, run)
        });

        let session = driver.default_session().unwrap();
        let id = session
            .write_transaction(|tx| {
                Box::pin(async move {
                    let record = tx.run("CREATE (n) RETURN id(n) AS id", None).await?.single()?;
                    record.get_int("id")
                })
            })
            .await
            .unwrap();
        assert_eq!(id, 5);
        assert_eq!(session.last_bookmark(), Some(Bookmark::new("bm-tx")));

        session.run("MATCH (n) RETURN n", None).await.unwrap();
        let (begin, run) = server.await.unwrap();
        assert!(map_of(&begin[0]).get("mode").is_none());
        assert_eq!(
            map_of(&run[2]).get("bookmarks"),
            Some(&PackStreamValue::List(vec!["bm-tx".into()]))
        );
    }

    #[tokio::test]
    async fn test_read_transaction_rolls_back_failed_work() {
        let (driver, mut servers) = stub_driver(1);
        let server = tokio::spawn(async move {
            let mut server = accept_authenticated(servers.remove(0)).await;
            let begin = server.expect(tag::BEGIN).await;
            server.success(vec![]).await;
            server.expect(tag::ROLLBACK).await;
            server.success(vec![]).await;
            begin
        });

        let session = driver.default_session().unwrap();
        let err = session
            .read_transaction(|_tx| Box::pin(async move { Err::<(), _>(DriverError::invalid_state("work failed")) }))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::InvalidState(_)));

        let begin = server.await.unwrap();
        assert_eq!(map_of(&begin[0]).get("mode").and_then(|v| v.as_str()), Some("r"));
    }

    #[tokio::test]
    async fn test_auto_commit_rejected_while_transaction_open() {
        let (driver, mut servers) = stub_driver(1);
        let server = tokio::spawn(async move {
            let mut server = accept_authenticated(servers.remove(0)).await;
            server.expect(tag::BEGIN).await;
            server.success(vec![]).await;
            server.expect(tag::ROLLBACK).await;
            server.success(vec![]).await;
        });

        let session = driver.default_session().unwrap();
        let tx = session.begin_transaction(None).await.unwrap();
        assert!(matches!(session.run("RETURN 1", None).await, Err(DriverError::InvalidState(_))));
        assert!(matches!(session.begin_transaction(None).await, Err(DriverError::InvalidState(_))));
        tx.rollback().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_session() {
        let (driver, mut servers) = stub_driver(1);
        let server = tokio::spawn(async move {
            let mut server = accept_authenticated(servers.remove(0)).await;
            server.expect(tag::RUN).await;
            server.expect(tag::PULL).await;
            server.success(vec![("fields", fields(&[]))]).await;
            server.success(vec![]).await;
            server.expect(tag::GOODBYE).await;
        });

        let session = driver.default_session().unwrap();
        session.run("RETURN 1", None).await.unwrap();
        session.close().await.unwrap();
        assert!(!session.is_open());
        assert!(matches!(session.run("RETURN 1", None).await, Err(DriverError::InvalidState(_))));
        server.await.unwrap();
    }

    #[test]
    fn test_query_builder() {
        let query = Query::new("RETURN $x").with_param("x", 1i64).with_param("y", "two");
        assert_eq!(query.parameters.len(), 2);
        let run = query.run_message(HashMap::new()).unwrap();
        assert_eq!(run.query, "RETURN $x");
        assert_eq!(run.parameters.get("y").and_then(|v| v.as_str()), Some("two"));
    }

    #[test]
    fn test_query_type() {
        assert_eq!(QueryType::parse("rw"), Some(QueryType::ReadWrite));
        assert_eq!(QueryType::parse("s"), Some(QueryType::SchemaWrite));
        assert_eq!(QueryType::parse("x"), None);
    }
}
