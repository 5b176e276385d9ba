//! Bolt protocol metadata types.
//!
//! Transaction metadata sent with BEGIN and auto-commit RUN, and the summary
//! structures found in SUCCESS metadata.

use std::collections::HashMap;
use std::time::Duration;

use super::AccessMode;
use crate::bolt::packstream::PackStreamValue;

/// Kind of transaction, as reported to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransactionType {
    /// Regular transaction, nothing is sent
    #[default]
    Default,
    /// Implicit transaction with no client-side constraints (`tx_type: "IMPLICIT"`)
    Unconstrained,
}

/// Assembles the metadata map of BEGIN and auto-commit RUN.
///
/// Keys are only present when they carry information: an absent database,
/// empty bookmarks, write mode and the default transaction type all leave
/// their key out, so a plain request sends an empty map.
#[derive(Debug, Clone, Default)]
pub struct TransactionMetadataBuilder {
    database: Option<String>,
    bookmarks: Vec<String>,
    mode: AccessMode,
    tx_type: TransactionType,
    timeout: Option<Duration>,
    tx_metadata: HashMap<String, PackStreamValue>,
    impersonated_user: Option<String>,
}

impl TransactionMetadataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database(mut self, database: Option<&str>) -> Self {
        self.database = database.filter(|db| !db.is_empty()).map(str::to_string);
        self
    }

    pub fn bookmarks<I, S>(mut self, bookmarks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bookmarks = bookmarks.into_iter().map(Into::into).collect();
        self
    }

    pub fn mode(mut self, mode: AccessMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn tx_type(mut self, tx_type: TransactionType) -> Self {
        self.tx_type = tx_type;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn tx_metadata(mut self, metadata: HashMap<String, PackStreamValue>) -> Self {
        self.tx_metadata = metadata;
        self
    }

    pub fn impersonated_user(mut self, user: Option<&str>) -> Self {
        self.impersonated_user = user.map(str::to_string);
        self
    }

    pub fn build(self) -> HashMap<String, PackStreamValue> {
        let mut result = HashMap::new();
        if !self.bookmarks.is_empty() {
            result.insert("bookmarks".to_string(), PackStreamValue::from(self.bookmarks));
        }
        if let Some(timeout) = self.timeout {
            result.insert("tx_timeout".to_string(), PackStreamValue::Integer(timeout_millis(timeout)));
        }
        if !self.tx_metadata.is_empty() {
            result.insert("tx_metadata".to_string(), PackStreamValue::Map(self.tx_metadata));
        }
        if self.mode == AccessMode::Read {
            result.insert("mode".to_string(), PackStreamValue::from("r"));
        }
        if let Some(user) = self.impersonated_user {
            result.insert("imp_user".to_string(), PackStreamValue::String(user));
        }
        if self.tx_type == TransactionType::Unconstrained {
            result.insert("tx_type".to_string(), PackStreamValue::from("IMPLICIT"));
        }
        if let Some(db) = self.database {
            result.insert("db".to_string(), PackStreamValue::String(db));
        }
        result
    }
}

/// Whole milliseconds, rounding a sub-millisecond remainder up.
fn timeout_millis(timeout: Duration) -> i64 {
    let mut millis = timeout.as_millis();
    if timeout.subsec_nanos() % 1_000_000 != 0 {
        millis += 1;
    }
    i64::try_from(millis).unwrap_or(i64::MAX)
}

/// Query statistics returned in SUCCESS after PULL or DISCARD.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryStats {
    pub nodes_created: i64,
    pub nodes_deleted: i64,
    pub relationships_created: i64,
    pub relationships_deleted: i64,
    pub properties_set: i64,
    pub labels_added: i64,
    pub labels_removed: i64,
    pub indexes_added: i64,
    pub indexes_removed: i64,
    pub constraints_added: i64,
    pub constraints_removed: i64,
    pub system_updates: i64,
    pub contains_system_updates: bool,
    pub contains_updates: bool,
}

impl QueryStats {
    /// Check if there were any modifications.
    pub fn has_updates(&self) -> bool {
        self.contains_updates
            || [
                self.nodes_created,
                self.nodes_deleted,
                self.relationships_created,
                self.relationships_deleted,
                self.properties_set,
                self.labels_added,
                self.labels_removed,
                self.indexes_added,
                self.indexes_removed,
                self.constraints_added,
                self.constraints_removed,
            ]
            .iter()
            .any(|&n| n > 0)
    }

    /// Parse from the `stats` map. Missing counters are zero.
    pub fn from_map(map: &HashMap<String, PackStreamValue>) -> Self {
        let count = |key: &str| map.get(key).and_then(|v| v.as_int()).unwrap_or(0);
        let flag = |key: &str| map.get(key).and_then(|v| v.as_bool()).unwrap_or(false);
        Self {
            nodes_created: count("nodes-created"),
            nodes_deleted: count("nodes-deleted"),
            relationships_created: count("relationships-created"),
            relationships_deleted: count("relationships-deleted"),
            properties_set: count("properties-set"),
            labels_added: count("labels-added"),
            labels_removed: count("labels-removed"),
            indexes_added: count("indexes-added"),
            indexes_removed: count("indexes-removed"),
            constraints_added: count("constraints-added"),
            constraints_removed: count("constraints-removed"),
            system_updates: count("system-updates"),
            contains_system_updates: flag("contains-system-updates"),
            contains_updates: flag("contains-updates"),
        }
    }
}

/// Notification returned in SUCCESS metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub code: String,
    pub title: String,
    pub description: String,
    pub severity: String,
    /// (line, column, offset) in the query text
    pub position: Option<(i64, i64, i64)>,
}

impl Notification {
    /// Parse from PackStream map. Entries without a code are dropped.
    pub fn from_map(map: &HashMap<String, PackStreamValue>) -> Option<Self> {
        let text = |key: &str| {
            map.get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let code = map.get("code").and_then(|v| v.as_str())?.to_string();
        let position = map.get("position").and_then(|v| v.as_map()).and_then(|pos| {
            let line = pos.get("line").and_then(|v| v.as_int())?;
            let column = pos.get("column").and_then(|v| v.as_int())?;
            let offset = pos.get("offset").and_then(|v| v.as_int()).unwrap_or(0);
            Some((line, column, offset))
        });
        Some(Self {
            code,
            title: text("title"),
            description: text("description"),
            severity: text("severity"),
            position,
        })
    }

    /// Parse the `notifications` list of a SUCCESS message.
    pub fn list_from(value: Option<&PackStreamValue>) -> Vec<Self> {
        value
            .and_then(|v| v.as_list())
            .map(|list| {
                list.iter()
                    .filter_map(|item| item.as_map().and_then(Self::from_map))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_metadata_by_default() {
        assert!(TransactionMetadataBuilder::new().build().is_empty());
        assert!(TransactionMetadataBuilder::new()
            .database(Some(""))
            .bookmarks(Vec::<String>::new())
            .mode(AccessMode::Write)
            .build()
            .is_empty());
    }

    #[test]
    fn test_metadata_keys() {
        let mut tx_metadata = HashMap::new();
        tx_metadata.insert("app".to_string(), PackStreamValue::from("test"));

        let map = TransactionMetadataBuilder::new()
            .database(Some("movies"))
            .bookmarks(["bm1", "bm2"])
            .mode(AccessMode::Read)
            .tx_type(TransactionType::Unconstrained)
            .timeout(Some(Duration::from_millis(1500)))
            .tx_metadata(tx_metadata)
            .impersonated_user(Some("alice"))
            .build();

        assert_eq!(map.get("db").and_then(|v| v.as_str()), Some("movies"));
        assert_eq!(map.get("mode").and_then(|v| v.as_str()), Some("r"));
        assert_eq!(map.get("tx_type").and_then(|v| v.as_str()), Some("IMPLICIT"));
        assert_eq!(map.get("tx_timeout").and_then(|v| v.as_int()), Some(1500));
        assert_eq!(map.get("imp_user").and_then(|v| v.as_str()), Some("alice"));
        assert_eq!(map.get("bookmarks").and_then(|v| v.as_list()).map(|l| l.len()), Some(2));
        assert!(map.get("tx_metadata").and_then(|v| v.as_map()).is_some());
    }

    #[test]
    fn test_only_database() {
        let map = TransactionMetadataBuilder::new().database(Some("neo4j")).build();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("db"));
    }

    #[test]
    fn test_timeout_rounds_up() {
        assert_eq!(timeout_millis(Duration::from_micros(1500)), 2);
        assert_eq!(timeout_millis(Duration::from_secs(2)), 2000);
    }

    #[test]
    fn test_query_stats_from_map() {
        let mut map = HashMap::new();
        map.insert("nodes-created".to_string(), PackStreamValue::Integer(2));
        map.insert("contains-updates".to_string(), PackStreamValue::Boolean(true));
        let stats = QueryStats::from_map(&map);
        assert_eq!(stats.nodes_created, 2);
        assert_eq!(stats.relationships_created, 0);
        assert!(stats.has_updates());
        assert!(!QueryStats::default().has_updates());
    }

    #[test]
    fn test_notifications_from_list() {
        let mut n = HashMap::new();
        n.insert("code".to_string(), PackStreamValue::from("Neo.ClientNotification.Statement.CartesianProduct"));
        n.insert("severity".to_string(), PackStreamValue::from("WARNING"));
        let list = PackStreamValue::List(vec![PackStreamValue::Map(n), PackStreamValue::Map(HashMap::new())]);

        let parsed = Notification::list_from(Some(&list));
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].severity, "WARNING");
        assert!(Notification::list_from(None).is_empty());
    }
}
