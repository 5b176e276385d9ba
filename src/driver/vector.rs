//! Homogeneous numeric vectors.
//!
//! On the wire a vector is a `V` struct holding the element type marker and
//! the elements as one big-endian byte string.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{DriverError, DriverResult};
use crate::bolt::packstream::marker;

/// Inclusive bounds on the number of elements.
pub const MIN_DIMENSIONS: usize = 1;
pub const MAX_DIMENSIONS: usize = 4096;

/// Vector element storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Vector {
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

macro_rules! decode_elements {
    ($payload:expr, $ty:ty, $variant:ident) => {{
        const WIDTH: usize = std::mem::size_of::<$ty>();
        let values = $payload
            .chunks_exact(WIDTH)
            .map(|chunk| {
                let mut raw = [0u8; WIDTH];
                raw.copy_from_slice(chunk);
                <$ty>::from_be_bytes(raw)
            })
            .collect();
        Vector::$variant(values)
    }};
}

impl Vector {
    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            Vector::Int8(v) => v.len(),
            Vector::Int16(v) => v.len(),
            Vector::Int32(v) => v.len(),
            Vector::Int64(v) => v.len(),
            Vector::Float32(v) => v.len(),
            Vector::Float64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Packstream marker naming the element type.
    pub fn type_marker(&self) -> u8 {
        match self {
            Vector::Int8(_) => marker::INT_8,
            Vector::Int16(_) => marker::INT_16,
            Vector::Int32(_) => marker::INT_32,
            Vector::Int64(_) => marker::INT_64,
            Vector::Float32(_) => marker::FLOAT_32,
            Vector::Float64(_) => marker::FLOAT_64,
        }
    }

    /// Byte width of one element
    pub fn element_width(&self) -> usize {
        element_width(self.type_marker()).unwrap_or(1)
    }

    /// Check the dimension bounds.
    pub fn validate(&self) -> DriverResult<()> {
        let len = self.len();
        if !(MIN_DIMENSIONS..=MAX_DIMENSIONS).contains(&len) {
            return Err(DriverError::type_conversion(format!(
                "Vector size must be between {} and {}, got {}",
                MIN_DIMENSIONS, MAX_DIMENSIONS, len
            )));
        }
        Ok(())
    }

    /// Big-endian payload
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len() * self.element_width());
        match self {
            Vector::Int8(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_be_bytes())),
            Vector::Int16(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_be_bytes())),
            Vector::Int32(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_be_bytes())),
            Vector::Int64(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_be_bytes())),
            Vector::Float32(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_be_bytes())),
            Vector::Float64(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_be_bytes())),
        }
        out
    }

    /// Rebuild a vector from its type marker and payload.
    pub fn from_bytes(type_marker: u8, payload: &[u8]) -> DriverResult<Self> {
        let width = element_width(type_marker).ok_or_else(|| {
            DriverError::protocol_violation(format!("Unknown vector element type 0x{:02X}", type_marker))
        })?;
        if payload.len() % width != 0 {
            return Err(DriverError::protocol_violation(format!(
                "Vector payload of {} bytes is not a multiple of the element width {}",
                payload.len(),
                width
            )));
        }

        let vector = match type_marker {
            marker::INT_8 => decode_elements!(payload, i8, Int8),
            marker::INT_16 => decode_elements!(payload, i16, Int16),
            marker::INT_32 => decode_elements!(payload, i32, Int32),
            marker::INT_64 => decode_elements!(payload, i64, Int64),
            marker::FLOAT_32 => decode_elements!(payload, f32, Float32),
            _ => decode_elements!(payload, f64, Float64),
        };
        vector
            .validate()
            .map_err(|e| DriverError::protocol_violation(e.to_string()))?;
        Ok(vector)
    }
}

fn element_width(type_marker: u8) -> Option<usize> {
    match type_marker {
        marker::INT_8 => Some(1),
        marker::INT_16 => Some(2),
        marker::INT_32 | marker::FLOAT_32 => Some(4),
        marker::INT_64 | marker::FLOAT_64 => Some(8),
        _ => None,
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Vector::Int8(_) => "INTEGER8",
            Vector::Int16(_) => "INTEGER16",
            Vector::Int32(_) => "INTEGER32",
            Vector::Int64(_) => "INTEGER",
            Vector::Float32(_) => "FLOAT32",
            Vector::Float64(_) => "FLOAT",
        };
        write!(f, "vector<{}>[{}]", kind, self.len())
    }
}
