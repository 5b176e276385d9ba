//! # bolt-client
//!
//! Client-side core of the Bolt protocol spoken by Neo4j compatible graph
//! databases.
//!
//! ## Features
//!
//! - **Bolt 5.x** - handshake, chunked framing and every request message
//! - **PackStream** - full value codec including temporal, spatial and vector types
//! - **Pipelining** - requests are written immediately, responses are routed to
//!   typed handlers in submission order
//! - **Re-authentication** - LOGOFF/LOGON on a live connection when credentials rotate
//! - **Managed transactions** - retry with exponential backoff on transient failures
//! - **Driver cache** - one driver per distinct set of settings, shared by refcount
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use bolt_client::{AuthToken, Driver, SessionConfig};
//! use bolt_client::params;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = Driver::new("bolt://localhost:7687", AuthToken::basic("neo4j", "password"))?;
//!
//!     let session = driver.session(
//!         SessionConfig::builder()
//!             .with_database("neo4j")
//!             .with_write_access()
//!             .build(),
//!     )?;
//!
//!     let result = session
//!         .run("CREATE (n:Person {name: $name}) RETURN n", Some(params! {"name" => "Alice"}))
//!         .await?;
//!     for record in result {
//!         println!("{}", record);
//!     }
//!
//!     session.close().await?;
//!     driver.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Transactions
//!
//! ```rust,no_run
//! # use bolt_client::{AuthToken, Driver, SessionConfig};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! # let driver = Driver::new("bolt://localhost:7687", AuthToken::basic("u", "p"))?;
//! # let session = driver.session(SessionConfig::default())?;
//! let mut tx = session.begin_transaction(None).await?;
//! tx.run("CREATE (n:Node {id: 1})", None).await?;
//! tx.run("CREATE (n:Node {id: 2})", None).await?;
//! let bookmark = tx.commit().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Managed transactions commit when the closure succeeds, roll back when it
//! fails, and are retried while the error is transient:
//!
//! ```rust,no_run
//! # use bolt_client::{AuthToken, Driver, SessionConfig};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! # let driver = Driver::new("bolt://localhost:7687", AuthToken::basic("u", "p"))?;
//! # let session = driver.session(SessionConfig::default())?;
//! let count = session
//!     .write_transaction(|tx| {
//!         Box::pin(async move {
//!             let result = tx.run("CREATE (n:Node) RETURN count(n) AS c", None).await?;
//!             result.single()?.get_int("c")
//!         })
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`driver`] - driver, sessions, transactions, authentication and the value model
//! - [`bolt`] - wire level: PackStream, message framing, handshake

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod bolt;
pub mod driver;

pub use driver::{
    AccessMode, AuthToken, Bookmark, BoltRecord, CachedSession, Driver, DriverCache, DriverCacheKey, DriverConfig,
    DriverConfigBuilder, DriverError, DriverResult, Query, QueryResult, ResultSummary, RetryPolicy, ServerAddress,
    ServerInfo, Session, SessionConfig, SessionConfigBuilder, Transaction, TransactionConfig, TrustStrategy, Value,
};

pub use bolt::{BoltError, BoltVersion, PackStreamValue};

/// Config alias for convenience
pub type Config = DriverConfig;
