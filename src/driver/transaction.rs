//! Explicit transactions

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::bolt::BoltConnection;
use super::error::{DriverError, DriverResult};
use super::session::{collect_result, Bookmark, Query, QueryResult};
use super::types::Value;
use crate::bolt::message::PullMessage;
use crate::bolt::packstream::PackStreamValue;

// ============================================================================
// TransactionConfig
// ============================================================================

/// Timeout and metadata sent with BEGIN, or with an auto-commit RUN
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionConfig {
    /// Server-side timeout
    pub timeout: Option<Duration>,
    /// Attached to the transaction in the server's query log
    pub metadata: HashMap<String, Value>,
}

impl TransactionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// TransactionState
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
    /// A query or COMMIT failed; the server has discarded the transaction
    Failed,
}

impl TransactionState {
    pub fn is_terminated(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ============================================================================
// Transaction
// ============================================================================

/// Explicit transaction on a session's connection.
///
/// Dropping an active transaction rolls it back without waiting for the
/// server's answer.
pub struct Transaction {
    connection: Arc<BoltConnection>,
    state: TransactionState,
    fetch_size: i64,
    /// Session bookmarks, replaced on commit
    bookmarks: Arc<Mutex<Vec<Bookmark>>>,
    /// Cleared once this transaction no longer occupies the session
    open: Arc<AtomicBool>,
}

impl Transaction {
    pub(crate) async fn begin(
        connection: Arc<BoltConnection>,
        metadata: HashMap<String, PackStreamValue>,
        fetch_size: i64,
        bookmarks: Arc<Mutex<Vec<Bookmark>>>,
        open: Arc<AtomicBool>,
    ) -> DriverResult<Self> {
        connection.begin(metadata).await?;
        open.store(true, Ordering::Release);
        debug!(address = %connection.address(), "Transaction started");
        Ok(Self {
            connection,
            state: TransactionState::Active,
            fetch_size,
            bookmarks,
            open,
        })
    }

    /// Run a query and fetch all of its records.
    pub async fn run(&mut self, query: impl Into<Query>, params: Option<HashMap<String, Value>>) -> DriverResult<QueryResult> {
        self.ensure_active()?;

        let mut query = query.into();
        if let Some(params) = params {
            query = query.with_params(params);
        }
        let message = query.run_message(HashMap::new())?;

        let run = self.connection.run(message);
        let pull = self.connection.pull(PullMessage::with_n(self.fetch_size));
        match collect_result(&self.connection, query, run, pull, self.fetch_size).await {
            Ok(result) => Ok(result),
            Err(error) => {
                warn!(%error, "Query failed, transaction is no longer usable");
                self.finish(TransactionState::Failed);
                Err(error)
            }
        }
    }

    /// Commit, returning the bookmark of the committed transaction.
    pub async fn commit(mut self) -> DriverResult<Option<Bookmark>> {
        self.ensure_active()?;
        match self.connection.commit().await {
            Ok(response) => {
                self.finish(TransactionState::Committed);
                let bookmark = response.bookmark.map(Bookmark::new);
                if let Some(bookmark) = &bookmark {
                    *self.bookmarks.lock() = vec![bookmark.clone()];
                }
                debug!(bookmark = ?bookmark, "Transaction committed");
                Ok(bookmark)
            }
            Err(error) => {
                self.finish(TransactionState::Failed);
                Err(error)
            }
        }
    }

    /// Roll back. A failed transaction is already gone on the server, so
    /// rolling it back only releases the session.
    pub async fn rollback(mut self) -> DriverResult<()> {
        match self.state {
            TransactionState::Active => {
                let result = self.connection.rollback().await;
                self.finish(TransactionState::RolledBack);
                result.map(|_| debug!("Transaction rolled back"))
            }
            TransactionState::Failed => {
                self.finish(TransactionState::RolledBack);
                Ok(())
            }
            state => Err(DriverError::invalid_state(format!(
                "Cannot roll back a transaction that is {}",
                state
            ))),
        }
    }

    /// Roll back unless already committed or rolled back.
    pub async fn close(self) -> DriverResult<()> {
        match self.state {
            TransactionState::Active | TransactionState::Failed => self.rollback().await,
            _ => Ok(()),
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == TransactionState::Active
    }

    fn ensure_active(&self) -> DriverResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Failed => Err(DriverError::invalid_state(
                "Transaction has failed and can only be rolled back",
            )),
            state => Err(DriverError::invalid_state(format!("Transaction is already {}", state))),
        }
    }

    fn finish(&mut self, state: TransactionState) {
        self.state = state;
        self.open.store(false, Ordering::Release);
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("address", &self.connection.address())
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            debug!("Active transaction dropped, rolling back");
            let _ = self.connection.rollback();
        }
        self.open.store(false, Ordering::Release);
    }
}

// ============================================================================
// Tests
// ============================================================================
