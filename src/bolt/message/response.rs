//! Bolt protocol response messages.
//!
//! Response messages are sent from the server to the client. Decoding checks
//! both the signature and the field count of every message.

use std::collections::HashMap;

use super::tag;
use crate::bolt::packstream::{check_struct_size, PackStreamDecoder, PackStreamError, PackStreamValue};

/// All Bolt response messages.
#[derive(Debug, Clone, PartialEq)]
pub enum BoltResponse {
    /// SUCCESS - Operation completed successfully
    Success(SuccessMessage),
    /// RECORD - Query result record
    Record(RecordMessage),
    /// FAILURE - Operation failed
    Failure(FailureMessage),
    /// IGNORED - Message was ignored (connection in FAILED state)
    Ignored,
}

impl BoltResponse {
    /// Get the message signature.
    pub fn signature(&self) -> u8 {
        match self {
            BoltResponse::Success(_) => tag::SUCCESS,
            BoltResponse::Record(_) => tag::RECORD,
            BoltResponse::Failure(_) => tag::FAILURE,
            BoltResponse::Ignored => tag::IGNORED,
        }
    }

    /// Get message name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            BoltResponse::Success(_) => "SUCCESS",
            BoltResponse::Record(_) => "RECORD",
            BoltResponse::Failure(_) => "FAILURE",
            BoltResponse::Ignored => "IGNORED",
        }
    }

    /// Whether this response ends the exchange of the current request.
    pub fn is_summary(&self) -> bool {
        !matches!(self, BoltResponse::Record(_))
    }

    /// Decode one response message.
    pub fn unpack(dec: &mut PackStreamDecoder<'_>) -> Result<Self, PackStreamError> {
        let (size, signature) = dec.read_struct_header()?;
        match signature {
            tag::SUCCESS => {
                check_struct_size("SUCCESS", 1, size)?;
                Ok(BoltResponse::Success(SuccessMessage::new(dec.read_map()?)))
            }
            tag::RECORD => {
                check_struct_size("RECORD", 1, size)?;
                let len = dec.read_list_header()?;
                let mut fields = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    fields.push(dec.decode()?);
                }
                Ok(BoltResponse::Record(RecordMessage::new(fields)))
            }
            tag::IGNORED => {
                check_struct_size("IGNORED", 0, size)?;
                Ok(BoltResponse::Ignored)
            }
            tag::FAILURE => {
                check_struct_size("FAILURE", 1, size)?;
                Ok(BoltResponse::Failure(FailureMessage::from_map(&dec.read_map()?)))
            }
            other => Err(PackStreamError::InvalidStructure(format!(
                "Unknown response message type: 0x{:02X}",
                other
            ))),
        }
    }
}

/// SUCCESS message - Operation completed successfully.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuccessMessage {
    /// Response metadata
    pub metadata: HashMap<String, PackStreamValue>,
}

impl SuccessMessage {
    pub fn new(metadata: HashMap<String, PackStreamValue>) -> Self {
        Self { metadata }
    }

    /// Get metadata entry.
    pub fn get(&self, key: &str) -> Option<&PackStreamValue> {
        self.metadata.get(key)
    }

    /// Server agent string from HELLO.
    pub fn server(&self) -> Option<&str> {
        self.get("server").and_then(|v| v.as_str())
    }

    /// Connection id from HELLO.
    pub fn connection_id(&self) -> Option<&str> {
        self.get("connection_id").and_then(|v| v.as_str())
    }

    /// Milliseconds until the first record was available (RUN).
    pub fn result_available_after(&self) -> Option<i64> {
        self.get("t_first").and_then(|v| v.as_int())
    }

    /// Milliseconds until the result was consumed (PULL/DISCARD).
    pub fn result_consumed_after(&self) -> Option<i64> {
        self.get("t_last").and_then(|v| v.as_int())
    }

    /// Field names from RUN.
    pub fn fields(&self) -> Option<Vec<String>> {
        self.get("fields").and_then(|v| v.as_list()).map(|list| {
            list.iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
    }

    /// Query statistics from PULL/DISCARD.
    pub fn stats(&self) -> Option<&HashMap<String, PackStreamValue>> {
        self.get("stats").and_then(|v| v.as_map())
    }

    /// Whether more records are available.
    pub fn has_more(&self) -> bool {
        self.get("has_more").and_then(|v| v.as_bool()).unwrap_or(false)
    }

    /// Bookmark from COMMIT or the last auto-commit PULL.
    pub fn bookmark(&self) -> Option<&str> {
        self.get("bookmark").and_then(|v| v.as_str())
    }

    /// Database the query ran against.
    pub fn db(&self) -> Option<&str> {
        self.get("db").and_then(|v| v.as_str())
    }

    /// Query id assigned to a RUN inside an explicit transaction.
    pub fn qid(&self) -> Option<i64> {
        self.get("qid").and_then(|v| v.as_int())
    }

    /// Query type ("r", "w", "rw", "s").
    pub fn query_type(&self) -> Option<&str> {
        self.get("type").and_then(|v| v.as_str())
    }
}

/// RECORD message - Query result record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordMessage {
    /// Field values
    pub fields: Vec<PackStreamValue>,
}

impl RecordMessage {
    pub fn new(fields: Vec<PackStreamValue>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// FAILURE message - Operation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureMessage {
    /// Neo4j status code
    pub code: String,
    /// Error message
    pub message: String,
}

impl FailureMessage {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    /// Build from the metadata map, tolerating missing entries.
    pub fn from_map(map: &HashMap<String, PackStreamValue>) -> Self {
        let text = |key: &str, default: &str| {
            map.get(key)
                .and_then(|v| v.as_str())
                .unwrap_or(default)
                .to_string()
        };
        Self {
            code: text("code", "Neo.DatabaseError.General.UnknownError"),
            message: text("message", "Unknown failure"),
        }
    }

    /// Classification part of the code, e.g. `ClientError`.
    pub fn classification(&self) -> &str {
        self.code.split('.').nth(1).unwrap_or("Unknown")
    }

    /// Category part of the code, e.g. `Security`.
    pub fn category(&self) -> &str {
        self.code.split('.').nth(2).unwrap_or("Unknown")
    }

    pub fn is_client_error(&self) -> bool {
        self.classification() == "ClientError"
    }

    pub fn is_transient(&self) -> bool {
        self.classification() == "TransientError"
    }

    pub fn is_database_error(&self) -> bool {
        self.classification() == "DatabaseError"
    }
}

impl std::fmt::Display for FailureMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unpack(bytes: &[u8]) -> Result<BoltResponse, PackStreamError> {
        BoltResponse::unpack(&mut PackStreamDecoder::new(bytes))
    }

    #[test]
    fn test_unpack_success() {
        // SUCCESS {"has_more": true}
        let mut bytes = vec![0xB1, 0x70, 0xA1, 0x88];
        bytes.extend_from_slice(b"has_more");
        bytes.push(0xC3);
        match unpack(&bytes).unwrap() {
            BoltResponse::Success(s) => assert!(s.has_more()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unpack_record() {
        let bytes = [0xB1, 0x71, 0x92, 0x01, 0x81, b'a'];
        let response = unpack(&bytes).unwrap();
        assert!(!response.is_summary());
        match response {
            BoltResponse::Record(r) => {
                assert_eq!(r.len(), 2);
                assert_eq!(r.fields[0], PackStreamValue::Integer(1));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unpack_ignored_and_failure() {
        assert_eq!(unpack(&[0xB0, 0x7E]).unwrap(), BoltResponse::Ignored);

        let mut bytes = vec![0xB1, 0x7F, 0xA2, 0x84];
        bytes.extend_from_slice(b"code");
        bytes.push(0x8A);
        bytes.extend_from_slice(b"Neo.X.Y.Z");
        bytes.push(b'!');
        bytes.push(0x87);
        bytes.extend_from_slice(b"message");
        bytes.push(0x82);
        bytes.extend_from_slice(b"no");
        match unpack(&bytes).unwrap() {
            BoltResponse::Failure(f) => {
                assert_eq!(f.code, "Neo.X.Y.Z!");
                assert_eq!(f.message, "no");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unpack_rejects_wrong_arity() {
        assert!(matches!(
            unpack(&[0xB1, 0x7E, 0xC0]),
            Err(PackStreamError::InvalidStructure(_))
        ));
        assert!(matches!(
            unpack(&[0xB2, 0x70, 0xA0, 0xA0]),
            Err(PackStreamError::InvalidStructure(_))
        ));
    }

    #[test]
    fn test_unpack_rejects_unknown_signature() {
        let err = unpack(&[0xB0, 0x55]).unwrap_err();
        assert!(err.to_string().contains("0x55"));
    }

    #[test]
    fn test_success_accessors() {
        let mut metadata = HashMap::new();
        metadata.insert(
            "fields".to_string(),
            PackStreamValue::List(vec!["name".into(), "age".into()]),
        );
        metadata.insert("qid".to_string(), PackStreamValue::Integer(2));
        metadata.insert("bookmark".to_string(), PackStreamValue::from("bm:1"));
        let msg = SuccessMessage::new(metadata);
        assert_eq!(msg.fields().unwrap(), vec!["name", "age"]);
        assert_eq!(msg.qid(), Some(2));
        assert_eq!(msg.bookmark(), Some("bm:1"));
        assert!(!msg.has_more());
    }

    #[test]
    fn test_failure_classification() {
        let msg = FailureMessage::new("Neo.TransientError.Transaction.DeadlockDetected", "deadlock");
        assert!(msg.is_transient());
        assert_eq!(msg.category(), "Transaction");
        assert!(FailureMessage::new("Neo.ClientError.Security.Unauthorized", "").is_client_error());
        assert!(FailureMessage::new("Neo.DatabaseError.General.UnknownError", "").is_database_error());
        assert_eq!(format!("{}", msg), "Neo.TransientError.Transaction.DeadlockDetected: deadlock");
    }

    #[test]
    fn test_failure_from_partial_map() {
        let msg = FailureMessage::from_map(&HashMap::new());
        assert!(msg.is_database_error());
    }
}
