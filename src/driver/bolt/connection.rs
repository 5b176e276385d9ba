//! Client-side Bolt connection.
//!
//! A connection is a handle onto one I/O task. The task owns the framed
//! stream and the [`InboundDispatcher`], so reads and writes for one
//! connection never race. Callers hand requests over an unbounded channel and
//! get a [`ResponseFuture`] back straight away, which makes pipelining the
//! default: write RUN and PULL, then await both.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::dispatcher::{InboundDispatcher, ResponseHandler};
use super::handlers::{
    BeginResponse, CommitResponse, DiscardResponse, HelloResponse, LogoffResponse, LogonResponse,
    PullHandler, PullResponse, ResetResponse, RollbackResponse, RunResponse, Summary, SummaryHandler,
};
use super::{default_bolt_agent, CLIENT_USER_AGENT};
use crate::bolt::codec::{BoltMessageCodec, DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_SIZE};
use crate::bolt::handshake::negotiate;
use crate::bolt::message::{
    AuthToken, BeginMessage, BoltAgent, BoltRequest, DiscardMessage, HelloMessage, LogonMessage,
    PullMessage, RunMessage,
};
use crate::bolt::packstream::PackStreamValue;
use crate::bolt::{BoltError, BoltResponse, BoltVersion};
use crate::driver::error::{DriverError, DriverResult};

// ============================================================================
// State
// ============================================================================

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected yet
    Disconnected,
    /// Negotiating the protocol version
    Handshaking,
    /// HELLO sent, waiting for LOGON to succeed
    Authenticating,
    /// Idle and authenticated
    Ready,
    /// Inside an explicit or auto-commit transaction
    InTransaction,
    /// The server rejected a request; one RESET brings it back
    Failed,
    /// Unusable; never reused
    Defunct,
    /// GOODBYE in progress
    Closing,
    /// Closed by the client
    Closed,
}

impl ConnectionState {
    /// Whether requests can still be submitted.
    pub fn is_open(self) -> bool {
        !matches!(
            self,
            ConnectionState::Defunct | ConnectionState::Closing | ConnectionState::Closed
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct ContextInner {
    state: ConnectionState,
    version: Option<BoltVersion>,
    server_agent: Option<String>,
    connection_id: Option<String>,
    recv_timeout: Option<Duration>,
    explicit_tx: bool,
}

/// Attributes of one connection, shared between its handle and its I/O task.
pub struct ConnectionContext {
    address: String,
    inner: Mutex<ContextInner>,
}

impl ConnectionContext {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            inner: Mutex::new(ContextInner {
                state: ConnectionState::Disconnected,
                version: None,
                server_agent: None,
                connection_id: None,
                recv_timeout: None,
                explicit_tx: false,
            }),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Move to `next`. Closed is final, Closing only leads to Closed and a
    /// defunct connection can only be closed; anything else is ignored.
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut inner = self.inner.lock();
        let allowed = match inner.state {
            ConnectionState::Closed => false,
            ConnectionState::Closing => next == ConnectionState::Closed,
            ConnectionState::Defunct => matches!(next, ConnectionState::Closing | ConnectionState::Closed),
            _ => true,
        };
        if allowed && inner.state != next {
            debug!(address = %self.address, from = %inner.state, to = %next, "Connection state change");
            inner.state = next;
        }
        allowed
    }

    pub fn version(&self) -> Option<BoltVersion> {
        self.inner.lock().version
    }

    pub fn server_agent(&self) -> Option<String> {
        self.inner.lock().server_agent.clone()
    }

    pub fn connection_id(&self) -> Option<String> {
        self.inner.lock().connection_id.clone()
    }

    /// Read timeout applied while responses are outstanding.
    pub fn recv_timeout(&self) -> Option<Duration> {
        self.inner.lock().recv_timeout
    }

    pub fn in_explicit_transaction(&self) -> bool {
        self.inner.lock().explicit_tx
    }

    pub(crate) fn set_version(&self, version: BoltVersion) {
        self.inner.lock().version = Some(version);
    }

    pub(crate) fn set_server(&self, server_agent: &str, connection_id: &str) {
        let mut inner = self.inner.lock();
        inner.server_agent = Some(server_agent.to_string());
        inner.connection_id = Some(connection_id.to_string());
    }

    pub(crate) fn set_recv_timeout(&self, timeout: Option<Duration>) {
        self.inner.lock().recv_timeout = timeout;
    }

    pub(crate) fn begin_transaction(&self) {
        if self.transition(ConnectionState::InTransaction) {
            self.inner.lock().explicit_tx = true;
        }
    }

    pub(crate) fn end_transaction(&self) {
        if self.transition(ConnectionState::Ready) {
            self.inner.lock().explicit_tx = false;
        }
    }
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ConnectionContext")
            .field("address", &self.address)
            .field("state", &inner.state)
            .field("version", &inner.version)
            .field("connection_id", &inner.connection_id)
            .finish()
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Settings for opening one connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// `host:port` of the server, used for logs and the routing context
    pub address: String,
    pub user_agent: String,
    pub bolt_agent: BoltAgent,
    /// Routing context sent in HELLO; `None` for a direct connection
    pub routing_context: Option<HashMap<String, String>>,
    pub handshake_timeout: Duration,
    pub max_chunk_size: usize,
    pub max_message_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            address: "localhost:7687".to_string(),
            user_agent: CLIENT_USER_AGENT.to_string(),
            bolt_agent: default_bolt_agent(),
            routing_context: None,
            handshake_timeout: Duration::from_secs(30),
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ConnectionConfig {
    fn hello(&self, version: BoltVersion) -> HelloMessage {
        let mut hello = HelloMessage::new(&self.user_agent);
        if version.supports_bolt_agent() {
            hello = hello.with_bolt_agent(self.bolt_agent.clone());
        }
        if let Some(context) = &self.routing_context {
            let mut routing: HashMap<String, PackStreamValue> = context
                .iter()
                .map(|(k, v)| (k.clone(), PackStreamValue::from(v.as_str())))
                .collect();
            routing
                .entry("address".to_string())
                .or_insert_with(|| PackStreamValue::from(self.address.as_str()));
            hello = hello.with_routing(routing);
        }
        hello
    }
}

// ============================================================================
// ResponseFuture
// ============================================================================

/// Pending typed response to one request.
#[must_use = "a response future does nothing unless awaited"]
pub struct ResponseFuture<T> {
    request: &'static str,
    rx: oneshot::Receiver<DriverResult<T>>,
}

impl<T> Future for ResponseFuture<T> {
    type Output = DriverResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let request = self.request;
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result.unwrap_or_else(|_| {
                Err(DriverError::connection_terminated(format!(
                    "Connection closed before the response to {} arrived",
                    request
                )))
            })
        })
    }
}

impl<T> fmt::Debug for ResponseFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture").field("request", &self.request).finish()
    }
}

// ============================================================================
// BoltConnection
// ============================================================================

enum Command {
    Request {
        request: BoltRequest,
        handler: Option<Box<dyn ResponseHandler>>,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

/// Handle to an open Bolt connection.
///
/// Requests complete strictly in submission order. Dropping the handle
/// closes the connection once the queued requests are written.
pub struct BoltConnection {
    tx: mpsc::UnboundedSender<Command>,
    ctx: Arc<ConnectionContext>,
}

impl BoltConnection {
    /// Handshake over `stream`, then authenticate with pipelined HELLO and LOGON.
    pub async fn open<S>(mut stream: S, config: &ConnectionConfig, auth: AuthToken) -> DriverResult<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let ctx = Arc::new(ConnectionContext::new(config.address.clone()));
        ctx.transition(ConnectionState::Handshaking);

        let version = match negotiate(&mut stream, config.handshake_timeout).await {
            Ok(version) => version,
            Err(e) => {
                ctx.transition(ConnectionState::Defunct);
                let error = DriverError::from(e);
                warn!(address = %config.address, %error, "Bolt handshake failed");
                return Err(error);
            }
        };
        ctx.set_version(version);
        info!(address = %config.address, %version, "Negotiated Bolt protocol");
        ctx.transition(ConnectionState::Authenticating);

        let framed = Framed::new(
            stream,
            BoltMessageCodec::new(config.max_chunk_size, config.max_message_size),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_io(framed, rx, InboundDispatcher::new(Arc::clone(&ctx))));

        let connection = Self { tx, ctx };
        let hello = connection.submit::<HelloResponse>(BoltRequest::Hello(config.hello(version)));
        let logon = connection.logon(auth);

        let result = async {
            let hello = hello.await?;
            logon.await?;
            Ok(hello)
        }
        .await;
        match result {
            Ok(hello) => {
                debug!(
                    address = %config.address,
                    server = %hello.server_agent,
                    connection_id = %hello.connection_id,
                    "Connection authenticated"
                );
                Ok(connection)
            }
            Err(e) => {
                connection.close().await;
                Err(e)
            }
        }
    }

    pub fn context(&self) -> &Arc<ConnectionContext> {
        &self.ctx
    }

    pub fn address(&self) -> &str {
        self.ctx.address()
    }

    pub fn state(&self) -> ConnectionState {
        self.ctx.state()
    }

    pub fn is_open(&self) -> bool {
        self.ctx.state().is_open()
    }

    pub fn version(&self) -> Option<BoltVersion> {
        self.ctx.version()
    }

    pub fn server_agent(&self) -> Option<String> {
        self.ctx.server_agent()
    }

    /// Open an explicit transaction.
    pub fn begin(&self, metadata: HashMap<String, PackStreamValue>) -> ResponseFuture<BeginResponse> {
        self.submit(BoltRequest::Begin(BeginMessage::new(metadata)))
    }

    /// Run a query; in auto-commit mode this also opens the transaction.
    pub fn run(&self, message: RunMessage) -> ResponseFuture<RunResponse> {
        self.submit(BoltRequest::Run(message))
    }

    pub fn pull(&self, message: PullMessage) -> ResponseFuture<PullResponse> {
        let (tx, rx) = oneshot::channel();
        self.send(BoltRequest::Pull(message), Some(Box::new(PullHandler::new(tx))));
        ResponseFuture { request: "PULL", rx }
    }

    pub fn discard(&self, message: DiscardMessage) -> ResponseFuture<DiscardResponse> {
        self.submit(BoltRequest::Discard(message))
    }

    pub fn commit(&self) -> ResponseFuture<CommitResponse> {
        self.submit(BoltRequest::Commit)
    }

    pub fn rollback(&self) -> ResponseFuture<RollbackResponse> {
        self.submit(BoltRequest::Rollback)
    }

    /// Clear a failure or abandon the current transaction. A failed RESET
    /// leaves the connection defunct.
    pub fn reset(&self) -> ResponseFuture<ResetResponse> {
        self.submit(BoltRequest::Reset)
    }

    pub fn logon(&self, auth: AuthToken) -> ResponseFuture<LogonResponse> {
        self.submit(BoltRequest::Logon(LogonMessage::new(auth)))
    }

    pub fn logoff(&self) -> ResponseFuture<LogoffResponse> {
        self.submit(BoltRequest::Logoff)
    }

    /// Swap the credentials of an idle connection in place.
    pub async fn reauthenticate(&self, auth: AuthToken) -> DriverResult<()> {
        let logoff = self.logoff();
        let logon = self.logon(auth);
        logoff.await?;
        logon.await?;
        debug!(address = %self.ctx.address(), "Connection re-authenticated");
        Ok(())
    }

    /// Send GOODBYE, best effort, and close the socket.
    pub async fn close(&self) {
        let (done, closed) = oneshot::channel();
        if self.tx.send(Command::Close { done }).is_ok() {
            let _ = closed.await;
        }
        self.ctx.transition(ConnectionState::Closed);
    }

    fn submit<T: Summary>(&self, request: BoltRequest) -> ResponseFuture<T> {
        let (tx, rx) = oneshot::channel();
        self.send(request, Some(Box::new(SummaryHandler::<T>::new(tx))));
        ResponseFuture { request: T::REQUEST, rx }
    }

    fn send(&self, request: BoltRequest, handler: Option<Box<dyn ResponseHandler>>) {
        // A closed channel drops the handler, which resolves its future with
        // ConnectionTerminated.
        let _ = self.tx.send(Command::Request { request, handler });
    }
}

impl fmt::Debug for BoltConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoltConnection").field("ctx", &self.ctx).finish()
    }
}

// ============================================================================
// I/O task
// ============================================================================

async fn run_io<S>(
    mut framed: Framed<S, BoltMessageCodec>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    mut dispatcher: InboundDispatcher,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let ctx = Arc::clone(dispatcher.context());

    let outcome: DriverResult<Option<oneshot::Sender<()>>> = loop {
        let recv_timeout = if dispatcher.pending() > 0 { ctx.recv_timeout() } else { None };
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Request { request, handler }) => {
                    if let Err(e) = write_request(&mut framed, &mut dispatcher, request, handler).await {
                        break Err(e);
                    }
                }
                Some(Command::Close { done }) => break Ok(Some(done)),
                None => break Ok(None),
            },
            inbound = next_response(&mut framed, recv_timeout) => match inbound {
                Ok(Some(response)) => {
                    if let Err(e) = dispatcher.handle(response) {
                        break Err(e);
                    }
                }
                Ok(None) => {
                    break Err(DriverError::connection_terminated(
                        "Connection to the database terminated. The server closed the connection",
                    ))
                }
                Err(e) => break Err(e),
            },
        }
    };

    let done = match outcome {
        Ok(done) => {
            let healthy = ctx.state() != ConnectionState::Defunct;
            ctx.transition(ConnectionState::Closing);
            if healthy {
                debug!("C: GOODBYE");
                let _ = framed.send(BoltRequest::Goodbye).await;
            }
            let _ = framed.get_mut().shutdown().await;
            dispatcher.fail_all(DriverError::connection_terminated("Connection closed by the client"));
            ctx.transition(ConnectionState::Closed);
            info!(address = %ctx.address(), "Connection closed");
            done
        }
        Err(error) => {
            warn!(address = %ctx.address(), %error, "Connection failed");
            dispatcher.fail_all(error);
            let _ = framed.get_mut().shutdown().await;
            None
        }
    };

    rx.close();
    while let Ok(command) = rx.try_recv() {
        match command {
            Command::Request { handler: Some(handler), .. } => dispatcher.enqueue(handler),
            Command::Request { handler: None, .. } => {}
            Command::Close { done } => {
                let _ = done.send(());
            }
        }
    }
    if let Some(done) = done {
        let _ = done.send(());
    }
}

async fn write_request<S>(
    framed: &mut Framed<S, BoltMessageCodec>,
    dispatcher: &mut InboundDispatcher,
    request: BoltRequest,
    handler: Option<Box<dyn ResponseHandler>>,
) -> DriverResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if dispatcher.take_reset_needed() && !matches!(request, BoltRequest::Reset | BoltRequest::Goodbye) {
        debug!("C: RESET (clearing previous failure)");
        let (tx, _rx) = oneshot::channel();
        dispatcher.enqueue(Box::new(SummaryHandler::<ResetResponse>::new(tx)));
        framed.feed(BoltRequest::Reset).await?;
    }

    debug!("C: {}", request.name());
    if let Some(handler) = handler {
        dispatcher.enqueue(handler);
    }
    framed.send(request).await?;
    Ok(())
}

async fn next_response<S>(
    framed: &mut Framed<S, BoltMessageCodec>,
    recv_timeout: Option<Duration>,
) -> DriverResult<Option<BoltResponse>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let next = match recv_timeout {
        Some(limit) => match tokio::time::timeout(limit, framed.next()).await {
            Ok(next) => next,
            Err(_) => return Err(BoltError::Timeout.into()),
        },
        None => framed.next().await,
    };
    match next {
        Some(Ok(response)) => Ok(Some(response)),
        Some(Err(e)) => Err(e.into()),
        None => Ok(None),
    }
}
