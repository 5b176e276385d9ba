//! Record - one row of a query result

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::error::{DriverError, DriverResult};
use super::graph::{Node, Path, Relationship};
use super::types::Value;

// ============================================================================
// BoltRecord
// ============================================================================

/// Query result record.
///
/// Every record of one result shares the same key list.
#[derive(Debug, Clone, PartialEq)]
pub struct BoltRecord {
    keys: Arc<[String]>,
    values: Vec<Value>,
}

impl BoltRecord {
    /// Pair `values` with `keys`; both must have the same length.
    pub fn new(keys: Arc<[String]>, values: Vec<Value>) -> DriverResult<Self> {
        if keys.len() != values.len() {
            return Err(DriverError::protocol_violation(format!(
                "Record has {} values for {} keys",
                values.len(),
                keys.len()
            )));
        }
        Ok(Self { keys, values })
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Position of `key`, if present.
    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.keys.iter().position(|k| k == key)
    }

    /// Value for `key`.
    pub fn get(&self, key: &str) -> DriverResult<&Value> {
        self.index_of(key)
            .map(|i| &self.values[i])
            .ok_or_else(|| {
                DriverError::NoSuchElement(format!(
                    "Unknown key: {}, available keys: [{}]",
                    key,
                    self.keys.join(", ")
                ))
            })
    }

    pub fn get_by_index(&self, index: usize) -> DriverResult<&Value> {
        self.values.get(index).ok_or_else(|| {
            DriverError::NoSuchElement(format!(
                "Index {} out of bounds for record of size {}",
                index,
                self.values.len()
            ))
        })
    }

    /// Value for `key` converted to `T`.
    pub fn get_as<T>(&self, key: &str) -> DriverResult<T>
    where
        T: TryFrom<Value, Error = DriverError>,
    {
        T::try_from(self.get(key)?.clone())
    }

    pub fn get_bool(&self, key: &str) -> DriverResult<bool> {
        self.get_as::<bool>(key)
    }

    pub fn get_int(&self, key: &str) -> DriverResult<i64> {
        self.get_as::<i64>(key)
    }

    pub fn get_float(&self, key: &str) -> DriverResult<f64> {
        self.get_as::<f64>(key)
    }

    pub fn get_string(&self, key: &str) -> DriverResult<String> {
        self.get_as::<String>(key)
    }

    pub fn get_node(&self, key: &str) -> DriverResult<Node> {
        self.get_as::<Node>(key)
    }

    pub fn get_relationship(&self, key: &str) -> DriverResult<Relationship> {
        self.get_as::<Relationship>(key)
    }

    pub fn get_path(&self, key: &str) -> DriverResult<Path> {
        self.get_as::<Path>(key)
    }

    /// Like [`get_as`](Self::get_as), mapping null to `None`. The key must exist.
    pub fn get_optional<T>(&self, key: &str) -> DriverResult<Option<T>>
    where
        T: TryFrom<Value, Error = DriverError>,
    {
        match self.get(key)? {
            Value::Null => Ok(None),
            v => T::try_from(v.clone()).map(Some),
        }
    }

    pub fn to_map(&self) -> HashMap<String, Value> {
        self.keys
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index_of(key).is_some()
    }
}

impl fmt::Display for BoltRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self
            .keys
            .iter()
            .zip(self.values.iter())
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect();
        write!(f, "Record<{{{}}}>", pairs.join(", "))
    }
}

impl<'a> IntoIterator for &'a BoltRecord {
    type Item = (&'a String, &'a Value);
    type IntoIter = std::iter::Zip<std::slice::Iter<'a, String>, std::slice::Iter<'a, Value>>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter().zip(self.values.iter())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_record() -> BoltRecord {
        let keys: Arc<[String]> = vec!["name".into(), "age".into(), "active".into()].into();
        let values = vec![
            Value::String("Alice".into()),
            Value::Integer(30),
            Value::Boolean(true),
        ];
        BoltRecord::new(keys, values).unwrap()
    }

    #[test]
    fn test_record_creation() {
        let record = create_test_record();
        assert_eq!(record.len(), 3);
        assert_eq!(record.keys(), &["name", "age", "active"]);

        let keys: Arc<[String]> = vec!["a".into()].into();
        assert!(BoltRecord::new(keys, vec![]).is_err());
    }

    #[test]
    fn test_record_get() {
        let record = create_test_record();
        assert_eq!(record.get("name").unwrap(), &Value::String("Alice".into()));
        assert_eq!(record.get_by_index(1).unwrap(), &Value::Integer(30));

        match record.get("unknown") {
            Err(DriverError::NoSuchElement(msg)) => assert!(msg.contains("name, age, active")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(record.get_by_index(3), Err(DriverError::NoSuchElement(_))));
    }

    #[test]
    fn test_record_get_typed() {
        let record = create_test_record();
        assert_eq!(record.get_string("name").unwrap(), "Alice");
        assert_eq!(record.get_int("age").unwrap(), 30);
        assert!(record.get_bool("active").unwrap());
        assert_eq!(record.get_float("age").unwrap(), 30.0);

        assert!(matches!(record.get_int("name"), Err(DriverError::TypeConversion(_))));
    }

    #[test]
    fn test_record_get_optional() {
        let keys: Arc<[String]> = vec!["value".into(), "null_value".into()].into();
        let record = BoltRecord::new(keys, vec![Value::Integer(42), Value::Null]).unwrap();

        assert_eq!(record.get_optional::<i64>("value").unwrap(), Some(42));
        assert_eq!(record.get_optional::<i64>("null_value").unwrap(), None);
        assert!(record.get_optional::<i64>("unknown").is_err());
    }

    #[test]
    fn test_record_to_map_and_iter() {
        let record = create_test_record();
        let map = record.to_map();
        assert_eq!(map.len(), 3);
        assert_eq!(map.get("age"), Some(&Value::Integer(30)));

        let pairs: Vec<_> = (&record).into_iter().collect();
        assert_eq!(pairs[0].0, "name");
        assert_eq!(record.to_string(), "Record<{name: \"Alice\", age: 30, active: true}>");
    }
}
