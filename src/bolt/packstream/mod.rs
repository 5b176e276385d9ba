//! PackStream serialization format.
//!
//! PackStream is the binary format Bolt uses to encode values on the wire.
//!
//! # Supported Types
//!
//! - **Null**: Single byte marker
//! - **Boolean**: True/False markers
//! - **Integer**: Variable-length encoding, smallest width wins
//! - **Float**: 64-bit IEEE 754
//! - **String**: UTF-8 encoded, variable length prefix
//! - **Bytes**: Raw bytes, variable length prefix
//! - **List**: Heterogeneous collections
//! - **Map**: String keys to arbitrary values
//! - **Structure**: Signature byte plus fields
//!
//! Structures are kept untyped at this level. Graph, temporal, spatial and vector
//! values are interpreted by [`crate::driver::wire`].

pub mod decoder;
pub mod encoder;
pub mod marker;
pub mod types;

pub use decoder::{check_struct_size, decode, PackStreamDecoder, MAX_NESTING_DEPTH};
pub use encoder::{encode, PackOutput, PackStreamEncoder};
pub use marker::signature;
pub use types::{PackStreamStructure, PackStreamValue};

use std::fmt;

/// PackStream errors.
#[derive(Debug, Clone, PartialEq)]
pub enum PackStreamError {
    /// Unexpected end of input
    UnexpectedEof,
    /// Unknown marker byte
    UnknownMarker(u8),
    /// A known marker of the wrong family for a typed read
    UnexpectedMarker {
        /// Family that was expected
        expected: &'static str,
        /// Marker that was found
        marker: u8,
    },
    /// Invalid UTF-8 in string
    InvalidUtf8(String),
    /// Invalid map key (must be string)
    InvalidMapKey,
    /// Value too large to encode
    ValueTooLarge(&'static str, usize),
    /// Invalid structure format
    InvalidStructure(String),
    /// Lists, maps and structs nested deeper than the limit
    NestingTooDeep(usize),
}

impl fmt::Display for PackStreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackStreamError::UnexpectedEof => write!(f, "Unexpected end of PackStream data"),
            PackStreamError::UnknownMarker(m) => write!(f, "Unknown PackStream marker: 0x{:02X}", m),
            PackStreamError::UnexpectedMarker { expected, marker } => {
                write!(f, "Expected {} but found marker 0x{:02X}", expected, marker)
            }
            PackStreamError::InvalidUtf8(e) => write!(f, "Invalid UTF-8 in string: {}", e),
            PackStreamError::InvalidMapKey => write!(f, "Map keys must be strings"),
            PackStreamError::ValueTooLarge(t, s) => write!(f, "{} too large: {} bytes", t, s),
            PackStreamError::InvalidStructure(msg) => write!(f, "Invalid structure: {}", msg),
            PackStreamError::NestingTooDeep(max) => write!(f, "Values nested deeper than {} levels", max),
        }
    }
}

impl std::error::Error for PackStreamError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn roundtrip(value: PackStreamValue) {
        let bytes = encode(&value).unwrap();
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn test_roundtrip_scalars() {
        roundtrip(PackStreamValue::Null);
        roundtrip(PackStreamValue::Boolean(true));
        roundtrip(PackStreamValue::Boolean(false));
        for v in [0i64, -1, 127, -16, -17, 128, -128, -129, 32768, i64::MAX, i64::MIN] {
            roundtrip(PackStreamValue::Integer(v));
        }
        for v in [0.0f64, -1.25, std::f64::consts::PI, f64::MAX] {
            roundtrip(PackStreamValue::Float(v));
        }
    }

    #[test]
    fn test_roundtrip_sized_values() {
        for s in ["", "hello", "ünïcödé"] {
            roundtrip(PackStreamValue::String(s.to_string()));
        }
        roundtrip(PackStreamValue::String("y".repeat(70000)));
        roundtrip(PackStreamValue::Bytes(vec![]));
        roundtrip(PackStreamValue::Bytes(vec![7u8; 300]));
    }

    #[test]
    fn test_roundtrip_nested() {
        let mut inner = HashMap::new();
        inner.insert(
            "items".to_string(),
            PackStreamValue::List(vec![PackStreamValue::Integer(1), PackStreamValue::Null]),
        );
        inner.insert("name".to_string(), PackStreamValue::String("x".into()));

        let value = PackStreamValue::List(vec![
            PackStreamValue::Map(inner.clone()),
            PackStreamValue::Map(inner),
            PackStreamValue::List((0..20).map(PackStreamValue::Integer).collect()),
        ]);
        roundtrip(value);
    }

    #[test]
    fn test_roundtrip_structure() {
        let s = PackStreamStructure::new(
            signature::NODE,
            vec![
                PackStreamValue::Integer(1),
                PackStreamValue::List(vec![PackStreamValue::String("Person".into())]),
                PackStreamValue::Map(HashMap::new()),
                PackStreamValue::String("4:abc:1".into()),
            ],
        );
        roundtrip(PackStreamValue::Structure(s));
    }

    #[test]
    fn test_error_display() {
        let err = PackStreamError::UnexpectedMarker { expected: "map", marker: 0x93 };
        assert_eq!(err.to_string(), "Expected map but found marker 0x93");
    }
}
