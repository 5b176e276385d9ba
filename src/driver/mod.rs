//! Driver layer
//!
//! Everything above the wire format: the value model, connections and their
//! response dispatch, authentication, sessions and transactions.
//!
//! - [`types`], [`graph`], [`vector`] - values as seen by applications
//! - [`wire`] - conversion between values and PackStream
//! - [`bolt`] - connection I/O task, dispatcher and typed response handlers
//! - [`auth`] - authentication suppliers and their registry
//! - [`driver`] - configuration and the [`Driver`] handle
//! - [`session`], [`transaction`] - units of work
//! - [`cache`] - drivers shared between callers with equal settings
//!
//! # Example
//!
//! ```ignore
//! use bolt_client::driver::{AuthToken, Driver, SessionConfig};
//! use bolt_client::params;
//!
//! let driver = Driver::new("bolt://localhost:7687", AuthToken::basic("neo4j", "password"))?;
//! let session = driver.session(SessionConfig::builder().with_database("neo4j").build())?;
//!
//! let result = session.run("MATCH (n) RETURN n LIMIT 10", None).await?;
//! for record in result {
//!     println!("{}", record);
//! }
//!
//! let mut tx = session.begin_transaction(None).await?;
//! tx.run("CREATE (n:Person {name: $name})", Some(params! {"name" => "Alice"})).await?;
//! tx.commit().await?;
//!
//! session.close().await?;
//! driver.close();
//! ```

pub mod auth;
pub mod bolt;
pub mod cache;
#[allow(clippy::module_inception)]
pub mod driver;
pub mod error;
pub mod graph;
pub mod record;
pub mod session;
pub mod transaction;
pub mod types;
pub mod vector;
pub mod wire;

pub use crate::bolt::message::{AccessMode, AuthToken, Notification, QueryStats};
pub use auth::{
    Authentication, AuthenticationSupplier, AuthenticationSupplierFactory, AuthenticationSupplierRegistry,
    RefreshingSupplier, StaticSupplier,
};
pub use bolt::{BoltConnection, ConnectionConfig, ConnectionState};
pub use cache::{CachedSession, DriverCache, DriverCacheKey};
pub use driver::{
    Connector, Driver, DriverConfig, DriverConfigBuilder, ServerAddress, ServerInfo, StreamConnector, TcpConnector,
    TrustStrategy,
};
pub use error::{DriverError, DriverResult};
pub use graph::{Node, Path, Relationship, Segment, UnboundRelationship};
pub use record::BoltRecord;
pub use session::{
    Bookmark, Query, QueryResult, QueryType, ResultSummary, RetryPolicy, Session, SessionConfig,
    SessionConfigBuilder,
};
pub use transaction::{Transaction, TransactionConfig, TransactionState};
pub use types::{Duration, OffsetTime, Point, Value, ZonedDateTime};
pub use vector::Vector;

/// Build a parameter map for [`Session::run`] and [`Transaction::run`].
#[macro_export]
macro_rules! params {
    () => {
        std::collections::HashMap::<String, $crate::driver::Value>::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = std::collections::HashMap::<String, $crate::driver::Value>::new();
        $(
            map.insert($key.into(), $crate::driver::Value::from($value));
        )+
        map
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_macro() {
        let empty = crate::params!();
        assert!(empty.is_empty());

        let params = crate::params! {"name" => "Alice", "age" => 42i64};
        assert_eq!(params.get("name"), Some(&Value::from("Alice")));
        assert_eq!(params.get("age"), Some(&Value::Integer(42)));
    }
}
