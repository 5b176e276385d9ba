//! Typed response handlers.
//!
//! Every request resolves a oneshot with its typed summary. Summaries also
//! drive the connection state machine, since the SUCCESS of a request is the
//! point at which the server has actually moved.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::warn;

use super::connection::{ConnectionContext, ConnectionState};
use super::dispatcher::ResponseHandler;
use crate::bolt::message::{QueryStats, NO_QID};
use crate::bolt::packstream::PackStreamValue;
use crate::bolt::SuccessMessage;
use crate::driver::error::{DriverError, DriverResult};
use crate::driver::types::Value;
use crate::driver::wire;

/// HELLO hint carrying the server's idle read timeout.
pub const RECV_TIMEOUT_HINT: &str = "connection.recv_timeout_seconds";

// ============================================================================
// Summary
// ============================================================================

/// Typed result of a request that ends with a single SUCCESS.
pub trait Summary: Sized + Send + 'static {
    /// Request name, for logs and errors
    const REQUEST: &'static str;

    /// A FAILURE for this request is fatal whatever its code.
    const FAILURE_IS_FATAL: bool = false;

    fn from_success(ctx: &ConnectionContext, success: SuccessMessage) -> DriverResult<Self>;
}

/// Handler resolving a oneshot with `T` built from the SUCCESS metadata.
pub struct SummaryHandler<T: Summary> {
    tx: oneshot::Sender<DriverResult<T>>,
    _summary: PhantomData<fn() -> T>,
}

impl<T: Summary> SummaryHandler<T> {
    pub fn new(tx: oneshot::Sender<DriverResult<T>>) -> Self {
        Self {
            tx,
            _summary: PhantomData,
        }
    }
}

impl<T: Summary> ResponseHandler for SummaryHandler<T> {
    fn name(&self) -> &'static str {
        T::REQUEST
    }

    fn on_success(self: Box<Self>, ctx: &ConnectionContext, success: SuccessMessage) -> DriverResult<()> {
        match T::from_success(ctx, success) {
            Ok(summary) => {
                // The caller may have stopped waiting.
                let _ = self.tx.send(Ok(summary));
                Ok(())
            }
            Err(error) => {
                let _ = self.tx.send(Err(error.clone()));
                Err(error)
            }
        }
    }

    fn on_failure(self: Box<Self>, error: DriverError) {
        let _ = self.tx.send(Err(error));
    }

    fn failure_is_fatal(&self) -> bool {
        T::FAILURE_IS_FATAL
    }
}

// ============================================================================
// Connection setup
// ============================================================================

/// SUCCESS of HELLO
#[derive(Debug, Clone, PartialEq)]
pub struct HelloResponse {
    pub server_agent: String,
    pub connection_id: String,
    /// Idle read timeout suggested by the server
    pub recv_timeout: Option<Duration>,
}

impl Summary for HelloResponse {
    const REQUEST: &'static str = "HELLO";
    const FAILURE_IS_FATAL: bool = true;

    fn from_success(ctx: &ConnectionContext, success: SuccessMessage) -> DriverResult<Self> {
        let server_agent = success
            .server()
            .ok_or_else(|| DriverError::protocol_violation("HELLO response carries no server agent"))?
            .to_string();
        let connection_id = success.connection_id().unwrap_or_default().to_string();
        let recv_timeout = success
            .get("hints")
            .and_then(|hints| hints.as_map())
            .and_then(|hints| hints.get(RECV_TIMEOUT_HINT))
            .and_then(recv_timeout_hint);

        ctx.set_server(&server_agent, &connection_id);
        ctx.set_recv_timeout(recv_timeout);
        Ok(Self {
            server_agent,
            connection_id,
            recv_timeout,
        })
    }
}

fn recv_timeout_hint(raw: &PackStreamValue) -> Option<Duration> {
    match raw {
        PackStreamValue::Integer(secs) if *secs > 0 => Some(Duration::from_secs(*secs as u64)),
        other => {
            warn!(hint = RECV_TIMEOUT_HINT, value = ?other, "Ignoring invalid server hint");
            None
        }
    }
}

/// SUCCESS of LOGON
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogonResponse;

impl Summary for LogonResponse {
    const REQUEST: &'static str = "LOGON";

    fn from_success(ctx: &ConnectionContext, _success: SuccessMessage) -> DriverResult<Self> {
        ctx.transition(ConnectionState::Ready);
        Ok(Self)
    }
}

/// SUCCESS of LOGOFF
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogoffResponse;

impl Summary for LogoffResponse {
    const REQUEST: &'static str = "LOGOFF";

    fn from_success(ctx: &ConnectionContext, _success: SuccessMessage) -> DriverResult<Self> {
        ctx.transition(ConnectionState::Authenticating);
        Ok(Self)
    }
}

/// SUCCESS of RESET
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetResponse;

impl Summary for ResetResponse {
    const REQUEST: &'static str = "RESET";
    const FAILURE_IS_FATAL: bool = true;

    fn from_success(ctx: &ConnectionContext, _success: SuccessMessage) -> DriverResult<Self> {
        ctx.end_transaction();
        Ok(Self)
    }
}

// ============================================================================
// Transactions
// ============================================================================

/// SUCCESS of BEGIN
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginResponse;

impl Summary for BeginResponse {
    const REQUEST: &'static str = "BEGIN";

    fn from_success(ctx: &ConnectionContext, _success: SuccessMessage) -> DriverResult<Self> {
        ctx.begin_transaction();
        Ok(Self)
    }
}

/// SUCCESS of COMMIT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResponse {
    pub bookmark: Option<String>,
}

impl Summary for CommitResponse {
    const REQUEST: &'static str = "COMMIT";

    fn from_success(ctx: &ConnectionContext, success: SuccessMessage) -> DriverResult<Self> {
        ctx.end_transaction();
        Ok(Self {
            bookmark: success.bookmark().map(str::to_string),
        })
    }
}

/// SUCCESS of ROLLBACK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollbackResponse;

impl Summary for RollbackResponse {
    const REQUEST: &'static str = "ROLLBACK";

    fn from_success(ctx: &ConnectionContext, _success: SuccessMessage) -> DriverResult<Self> {
        ctx.end_transaction();
        Ok(Self)
    }
}

// ============================================================================
// Query execution
// ============================================================================

/// SUCCESS of RUN
#[derive(Debug, Clone, PartialEq)]
pub struct RunResponse {
    /// Result column names, shared by every record
    pub keys: Arc<[String]>,
    /// Statement id inside an explicit transaction; [`NO_QID`] otherwise
    pub qid: i64,
    /// Milliseconds until the first record was available
    pub t_first: Option<i64>,
}

impl Summary for RunResponse {
    const REQUEST: &'static str = "RUN";

    fn from_success(ctx: &ConnectionContext, success: SuccessMessage) -> DriverResult<Self> {
        let keys = match success.get("fields") {
            None => Vec::new(),
            Some(PackStreamValue::List(fields)) => fields
                .iter()
                .map(|f| {
                    f.as_str().map(str::to_string).ok_or_else(|| {
                        DriverError::protocol_violation(format!("RUN field name is {}, not a string", f.type_name()))
                    })
                })
                .collect::<DriverResult<Vec<_>>>()?,
            Some(other) => {
                return Err(DriverError::protocol_violation(format!(
                    "RUN fields is {}, not a list",
                    other.type_name()
                )))
            }
        };

        if ctx.state() == ConnectionState::Ready {
            ctx.transition(ConnectionState::InTransaction);
        }
        Ok(Self {
            keys: keys.into(),
            qid: success.qid().unwrap_or(NO_QID),
            t_first: success.result_available_after(),
        })
    }
}

/// Metadata of the SUCCESS that ends a PULL or DISCARD batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSummary {
    pub has_more: bool,
    pub bookmark: Option<String>,
    pub database: Option<String>,
    pub query_type: Option<String>,
    pub t_last: Option<i64>,
    pub stats: QueryStats,
    pub metadata: SuccessMessage,
}

impl StreamSummary {
    fn from_success(ctx: &ConnectionContext, success: SuccessMessage) -> Self {
        let has_more = success.has_more();
        if !has_more && !ctx.in_explicit_transaction() && ctx.state() == ConnectionState::InTransaction {
            ctx.transition(ConnectionState::Ready);
        }
        Self {
            has_more,
            bookmark: success.bookmark().map(str::to_string),
            database: success.db().map(str::to_string),
            query_type: success.query_type().map(str::to_string),
            t_last: success.result_consumed_after(),
            stats: success.stats().map(QueryStats::from_map).unwrap_or_default(),
            metadata: success,
        }
    }
}

/// SUCCESS of DISCARD
#[derive(Debug, Clone, PartialEq)]
pub struct DiscardResponse {
    pub has_more: bool,
    pub summary: StreamSummary,
}

impl Summary for DiscardResponse {
    const REQUEST: &'static str = "DISCARD";

    fn from_success(ctx: &ConnectionContext, success: SuccessMessage) -> DriverResult<Self> {
        let summary = StreamSummary::from_success(ctx, success);
        Ok(Self {
            has_more: summary.has_more,
            summary,
        })
    }
}

/// Records of one PULL batch and its closing SUCCESS.
#[derive(Debug, Clone, PartialEq)]
pub struct PullResponse {
    pub records: Vec<Vec<Value>>,
    pub has_more: bool,
    pub summary: StreamSummary,
}

/// PULL is the only request that streams records.
pub struct PullHandler {
    records: Vec<Vec<Value>>,
    tx: oneshot::Sender<DriverResult<PullResponse>>,
}

impl PullHandler {
    pub fn new(tx: oneshot::Sender<DriverResult<PullResponse>>) -> Self {
        Self {
            records: Vec::new(),
            tx,
        }
    }
}

impl ResponseHandler for PullHandler {
    fn name(&self) -> &'static str {
        "PULL"
    }

    fn on_success(self: Box<Self>, ctx: &ConnectionContext, success: SuccessMessage) -> DriverResult<()> {
        let summary = StreamSummary::from_success(ctx, success);
        let _ = self.tx.send(Ok(PullResponse {
            records: self.records,
            has_more: summary.has_more,
            summary,
        }));
        Ok(())
    }

    fn on_failure(self: Box<Self>, error: DriverError) {
        let _ = self.tx.send(Err(error));
    }

    fn on_record(&mut self, fields: Vec<PackStreamValue>) -> DriverResult<()> {
        self.records.push(wire::unpack_list(fields)?);
        Ok(())
    }
}
