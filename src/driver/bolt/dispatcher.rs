//! Inbound response dispatch.
//!
//! Responses arrive strictly in request order, so the dispatcher keeps one
//! queue of handlers and always feeds the head.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::connection::{ConnectionContext, ConnectionState};
use crate::bolt::packstream::PackStreamValue;
use crate::bolt::{BoltResponse, SuccessMessage};
use crate::driver::error::{DriverError, DriverResult};

/// Receiver of the responses to one request.
pub trait ResponseHandler: Send {
    /// Request name for diagnostics
    fn name(&self) -> &'static str;

    /// Terminal SUCCESS. An error here means the metadata made no sense and
    /// the connection cannot continue.
    fn on_success(self: Box<Self>, ctx: &ConnectionContext, success: SuccessMessage) -> DriverResult<()>;

    /// Terminal FAILURE, IGNORED, or loss of the connection.
    fn on_failure(self: Box<Self>, error: DriverError);

    fn on_record(&mut self, _fields: Vec<PackStreamValue>) -> DriverResult<()> {
        Err(DriverError::protocol_violation(format!(
            "Received RECORD in response to {}, which never streams records",
            self.name()
        )))
    }

    /// Whether a FAILURE for this request leaves the connection unusable
    /// regardless of its code.
    fn failure_is_fatal(&self) -> bool {
        false
    }
}

/// FIFO of pending handlers for one connection.
pub struct InboundDispatcher {
    ctx: Arc<ConnectionContext>,
    handlers: VecDeque<Box<dyn ResponseHandler>>,
    fatal: Option<DriverError>,
    reset_needed: bool,
}

impl InboundDispatcher {
    pub fn new(ctx: Arc<ConnectionContext>) -> Self {
        Self {
            ctx,
            handlers: VecDeque::new(),
            fatal: None,
            reset_needed: false,
        }
    }

    pub fn context(&self) -> &Arc<ConnectionContext> {
        &self.ctx
    }

    /// Queue the handler of a request that is about to be written.
    pub fn enqueue(&mut self, handler: Box<dyn ResponseHandler>) {
        match &self.fatal {
            Some(error) => handler.on_failure(terminated_by(error)),
            None => self.handlers.push_back(handler),
        }
    }

    /// Number of requests still waiting for their summary.
    pub fn pending(&self) -> usize {
        self.handlers.len()
    }

    pub fn fatal_error(&self) -> Option<&DriverError> {
        self.fatal.as_ref()
    }

    /// Whether the server is in its failed state and needs a RESET before
    /// new work. Clears the flag.
    pub fn take_reset_needed(&mut self) -> bool {
        std::mem::take(&mut self.reset_needed)
    }

    /// Route one response. An error means the connection must be torn down;
    /// the caller then fails the rest with [`fail_all`](Self::fail_all).
    pub fn handle(&mut self, response: BoltResponse) -> DriverResult<()> {
        match response {
            BoltResponse::Record(record) => {
                let Some(handler) = self.handlers.front_mut() else {
                    return Err(self.mark_fatal(DriverError::protocol_violation(
                        "Received RECORD with no request pending",
                    )));
                };
                trace!("S: RECORD {:?}", record.fields);
                if let Err(error) = handler.on_record(record.fields) {
                    warn!(request = handler.name(), %error, "Protocol violation while streaming records");
                    if let Some(handler) = self.handlers.pop_front() {
                        handler.on_failure(error.clone());
                    }
                    return Err(self.mark_fatal(error));
                }
                Ok(())
            }
            BoltResponse::Success(success) => {
                let handler = self.pop("SUCCESS")?;
                debug!("S: SUCCESS {:?}", success.metadata);
                let name = handler.name();
                handler.on_success(&self.ctx, success).map_err(|error| {
                    warn!(request = name, %error, "Invalid SUCCESS metadata");
                    self.mark_fatal(error)
                })
            }
            BoltResponse::Failure(failure) => {
                let handler = self.pop("FAILURE")?;
                let error = DriverError::from(failure);
                warn!(request = handler.name(), %error, "S: FAILURE");
                let fatal = error.is_fatal_for_connection() || handler.failure_is_fatal();
                handler.on_failure(error.clone());
                if fatal {
                    return Err(self.mark_fatal(error));
                }
                self.reset_needed = true;
                self.ctx.transition(ConnectionState::Failed);
                Ok(())
            }
            BoltResponse::Ignored => {
                let handler = self.pop("IGNORED")?;
                debug!(request = handler.name(), "S: IGNORED");
                handler.on_failure(DriverError::MessageIgnored);
                Ok(())
            }
        }
    }

    /// Fail every queued handler with `error`; later handlers fail on arrival.
    pub fn fail_all(&mut self, error: DriverError) {
        if !self.handlers.is_empty() {
            debug!(pending = self.handlers.len(), %error, "Failing pending requests");
        }
        if self.fatal.is_none() {
            self.fatal = Some(error.clone());
        }
        self.ctx.transition(ConnectionState::Defunct);
        while let Some(handler) = self.handlers.pop_front() {
            handler.on_failure(error.clone());
        }
    }

    fn pop(&mut self, kind: &str) -> DriverResult<Box<dyn ResponseHandler>> {
        match self.handlers.pop_front() {
            Some(handler) => Ok(handler),
            None => Err(self.mark_fatal(DriverError::protocol_violation(format!(
                "Received {} with no request pending",
                kind
            )))),
        }
    }

    fn mark_fatal(&mut self, error: DriverError) -> DriverError {
        if self.fatal.is_none() {
            self.fatal = Some(error.clone());
        }
        self.ctx.transition(ConnectionState::Defunct);
        error
    }
}

fn terminated_by(error: &DriverError) -> DriverError {
    match error {
        DriverError::ConnectionTerminated(_) => error.clone(),
        other => DriverError::connection_terminated(format!("Connection is no longer usable: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::message::{FailureMessage, RecordMessage};
    use crate::driver::bolt::handlers::{CommitResponse, PullHandler, PullResponse, SummaryHandler};
    use tokio::sync::oneshot;

    fn dispatcher() -> InboundDispatcher {
        let ctx = Arc::new(ConnectionContext::new("localhost:7687"));
        ctx.transition(ConnectionState::Ready);
        InboundDispatcher::new(ctx)
    }

    fn commit(d: &mut InboundDispatcher) -> oneshot::Receiver<DriverResult<CommitResponse>> {
        let (tx, rx) = oneshot::channel();
        d.enqueue(Box::new(SummaryHandler::<CommitResponse>::new(tx)));
        rx
    }

    fn pull(d: &mut InboundDispatcher) -> oneshot::Receiver<DriverResult<PullResponse>> {
        let (tx, rx) = oneshot::channel();
        d.enqueue(Box::new(PullHandler::new(tx)));
        rx
    }

    #[test]
    fn test_record_for_commit_is_fatal() {
        let mut d = dispatcher();
        let mut first = commit(&mut d);
        let mut second = commit(&mut d);

        let err = d
            .handle(BoltResponse::Record(RecordMessage::new(vec![PackStreamValue::Integer(1)])))
            .unwrap_err();
        assert!(matches!(err, DriverError::ProtocolViolation(_)));
        assert!(matches!(first.try_recv().unwrap(), Err(DriverError::ProtocolViolation(_))));

        d.fail_all(err);
        assert!(matches!(second.try_recv().unwrap(), Err(DriverError::ProtocolViolation(_))));
        assert_eq!(d.ctx.state(), ConnectionState::Defunct);

        let mut late = commit(&mut d);
        assert!(matches!(late.try_recv().unwrap(), Err(DriverError::ConnectionTerminated(_))));
    }

    #[test]
    fn test_records_then_summary() {
        let mut d = dispatcher();
        let mut rx = pull(&mut d);
        d.handle(BoltResponse::Record(RecordMessage::new(vec![PackStreamValue::Integer(1)])))
            .unwrap();
        d.handle(BoltResponse::Record(RecordMessage::new(vec![PackStreamValue::Integer(2)])))
            .unwrap();
        d.handle(BoltResponse::Success(SuccessMessage::default())).unwrap();

        let response = rx.try_recv().unwrap().unwrap();
        assert_eq!(response.records.len(), 2);
        assert!(!response.has_more);
        assert_eq!(d.pending(), 0);
    }

    #[test]
    fn test_non_fatal_failure_then_ignored() {
        let mut d = dispatcher();
        let mut first = commit(&mut d);
        let mut second = pull(&mut d);

        d.handle(BoltResponse::Failure(FailureMessage::new(
            "Neo.ClientError.Statement.SyntaxError",
            "bad",
        )))
        .unwrap();
        d.handle(BoltResponse::Ignored).unwrap();

        assert_eq!(
            first.try_recv().unwrap().unwrap_err().code(),
            Some("Neo.ClientError.Statement.SyntaxError")
        );
        assert!(matches!(second.try_recv().unwrap(), Err(DriverError::MessageIgnored)));
        assert_eq!(d.ctx.state(), ConnectionState::Failed);
        assert!(d.take_reset_needed());
        assert!(!d.take_reset_needed());
    }

    #[test]
    fn test_security_failure_is_fatal() {
        let mut d = dispatcher();
        let _rx = commit(&mut d);
        let err = d
            .handle(BoltResponse::Failure(FailureMessage::new(
                "Neo.ClientError.Security.Unauthorized",
                "nope",
            )))
            .unwrap_err();
        assert!(err.is_fatal_for_connection());
        assert!(d.fatal_error().is_some());
    }

    #[test]
    fn test_unsolicited_success() {
        let mut d = dispatcher();
        assert!(matches!(
            d.handle(BoltResponse::Success(SuccessMessage::default())),
            Err(DriverError::ProtocolViolation(_))
        ));
    }
}
