//! PackStream decoder.

use bytes::Buf;
use std::collections::HashMap;

use super::marker::*;
use super::types::{PackStreamStructure, PackStreamValue};
use super::PackStreamError;

/// Deepest list, map or struct nesting accepted from the wire
pub const MAX_NESTING_DEPTH: usize = 512;

/// PackStream decoder over a complete message buffer.
///
/// Besides whole-value decoding, the decoder exposes the primitives needed for
/// shape-checked reading: [`peek_byte`](Self::peek_byte) to dispatch on the next
/// marker, and [`expect_struct`](Self::expect_struct) to verify a struct's
/// signature and field count before its fields are read.
pub struct PackStreamDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> PackStreamDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0, depth: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Inspect the next marker byte without consuming it.
    pub fn peek_byte(&self) -> Result<u8, PackStreamError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(PackStreamError::UnexpectedEof)
    }

    /// Read a struct header, returning `(field_count, signature)`.
    pub fn read_struct_header(&mut self) -> Result<(usize, u8), PackStreamError> {
        let marker = self.read_u8()?;
        let size = match marker {
            0xB0..=0xBF => tiny_size(marker),
            STRUCT_8 => self.read_u8()? as usize,
            STRUCT_16 => self.read_u16()? as usize,
            other => return Err(PackStreamError::UnexpectedMarker { expected: "struct", marker: other }),
        };
        let signature = self.read_u8()?;
        Ok((size, signature))
    }

    /// Read a struct header and verify it matches the expected shape.
    pub fn expect_struct(&mut self, name: &str, signature: u8, size: usize) -> Result<(), PackStreamError> {
        let (actual_size, actual_signature) = self.read_struct_header()?;
        if actual_signature != signature {
            return Err(PackStreamError::InvalidStructure(format!(
                "Invalid message received, expected {} structure with signature 0x{:02X} but got 0x{:02X}",
                name, signature, actual_signature
            )));
        }
        check_struct_size(name, size, actual_size)
    }

    /// Decode the next value.
    pub fn decode(&mut self) -> Result<PackStreamValue, PackStreamError> {
        let marker = self.peek_byte()?;
        match classify(marker) {
            MarkerKind::Null => {
                self.pos += 1;
                Ok(PackStreamValue::Null)
            }
            MarkerKind::Boolean => self.read_bool().map(PackStreamValue::Boolean),
            MarkerKind::Integer => self.read_int().map(PackStreamValue::Integer),
            MarkerKind::Float => self.read_float().map(PackStreamValue::Float),
            MarkerKind::Bytes => self.read_byte_array().map(PackStreamValue::Bytes),
            MarkerKind::String => self.read_string().map(PackStreamValue::String),
            MarkerKind::List => {
                let len = self.read_list_header()?;
                self.enter()?;
                let mut items = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    items.push(self.decode()?);
                }
                self.depth -= 1;
                Ok(PackStreamValue::List(items))
            }
            MarkerKind::Map => {
                let len = self.read_map_header()?;
                self.enter()?;
                let mut map = HashMap::with_capacity(len.min(1024));
                for _ in 0..len {
                    let key = match self.decode()? {
                        PackStreamValue::String(s) => s,
                        _ => return Err(PackStreamError::InvalidMapKey),
                    };
                    let value = self.decode()?;
                    map.insert(key, value);
                }
                self.depth -= 1;
                Ok(PackStreamValue::Map(map))
            }
            MarkerKind::Struct => {
                let (size, signature) = self.read_struct_header()?;
                self.enter()?;
                let mut fields = Vec::with_capacity(size.min(64));
                for _ in 0..size {
                    fields.push(self.decode()?);
                }
                self.depth -= 1;
                Ok(PackStreamValue::Structure(PackStreamStructure::new(signature, fields)))
            }
            MarkerKind::Unknown => Err(PackStreamError::UnknownMarker(marker)),
        }
    }

    fn enter(&mut self) -> Result<(), PackStreamError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(PackStreamError::NestingTooDeep(MAX_NESTING_DEPTH));
        }
        self.depth += 1;
        Ok(())
    }

    pub fn read_bool(&mut self) -> Result<bool, PackStreamError> {
        match self.read_u8()? {
            TRUE => Ok(true),
            FALSE => Ok(false),
            other => Err(PackStreamError::UnexpectedMarker { expected: "boolean", marker: other }),
        }
    }

    pub fn read_int(&mut self) -> Result<i64, PackStreamError> {
        let marker = self.read_u8()?;
        match marker {
            0x00..=0x7F | 0xF0..=0xFF => Ok(marker as i8 as i64),
            INT_8 => Ok(self.read_u8()? as i8 as i64),
            INT_16 => Ok(self.read_i16()? as i64),
            INT_32 => Ok(self.read_i32()? as i64),
            INT_64 => self.read_i64(),
            other => Err(PackStreamError::UnexpectedMarker { expected: "integer", marker: other }),
        }
    }

    pub fn read_float(&mut self) -> Result<f64, PackStreamError> {
        match self.read_u8()? {
            FLOAT_64 => self.read_f64(),
            other => Err(PackStreamError::UnexpectedMarker { expected: "float", marker: other }),
        }
    }

    pub fn read_byte_array(&mut self) -> Result<Vec<u8>, PackStreamError> {
        let len = match self.read_u8()? {
            BYTES_8 => self.read_u8()? as usize,
            BYTES_16 => self.read_u16()? as usize,
            BYTES_32 => self.read_u32()? as usize,
            other => return Err(PackStreamError::UnexpectedMarker { expected: "bytes", marker: other }),
        };
        Ok(self.read_slice(len)?.to_vec())
    }

    pub fn read_string(&mut self) -> Result<String, PackStreamError> {
        let marker = self.read_u8()?;
        let len = match marker {
            0x80..=0x8F => tiny_size(marker),
            STRING_8 => self.read_u8()? as usize,
            STRING_16 => self.read_u16()? as usize,
            STRING_32 => self.read_u32()? as usize,
            other => return Err(PackStreamError::UnexpectedMarker { expected: "string", marker: other }),
        };
        let bytes = self.read_slice(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|e| PackStreamError::InvalidUtf8(e.to_string()))
    }

    pub fn read_list_header(&mut self) -> Result<usize, PackStreamError> {
        let marker = self.read_u8()?;
        match marker {
            0x90..=0x9F => Ok(tiny_size(marker)),
            LIST_8 => Ok(self.read_u8()? as usize),
            LIST_16 => Ok(self.read_u16()? as usize),
            LIST_32 => Ok(self.read_u32()? as usize),
            other => Err(PackStreamError::UnexpectedMarker { expected: "list", marker: other }),
        }
    }

    pub fn read_map_header(&mut self) -> Result<usize, PackStreamError> {
        let marker = self.read_u8()?;
        match marker {
            0xA0..=0xAF => Ok(tiny_size(marker)),
            MAP_8 => Ok(self.read_u8()? as usize),
            MAP_16 => Ok(self.read_u16()? as usize),
            MAP_32 => Ok(self.read_u32()? as usize),
            other => Err(PackStreamError::UnexpectedMarker { expected: "map", marker: other }),
        }
    }

    /// Read a map whose values are decoded generically.
    pub fn read_map(&mut self) -> Result<HashMap<String, PackStreamValue>, PackStreamError> {
        let len = self.read_map_header()?;
        let mut map = HashMap::with_capacity(len.min(1024));
        for _ in 0..len {
            let key = self.read_string()?;
            let value = self.decode()?;
            map.insert(key, value);
        }
        Ok(map)
    }

    // Low-level reads

    fn read_u8(&mut self) -> Result<u8, PackStreamError> {
        let value = self.peek_byte()?;
        self.pos += 1;
        Ok(value)
    }

    fn read_u16(&mut self) -> Result<u16, PackStreamError> {
        Ok(self.read_slice(2)?.get_u16())
    }

    fn read_i16(&mut self) -> Result<i16, PackStreamError> {
        Ok(self.read_slice(2)?.get_i16())
    }

    fn read_u32(&mut self) -> Result<u32, PackStreamError> {
        Ok(self.read_slice(4)?.get_u32())
    }

    fn read_i32(&mut self) -> Result<i32, PackStreamError> {
        Ok(self.read_slice(4)?.get_i32())
    }

    fn read_i64(&mut self) -> Result<i64, PackStreamError> {
        Ok(self.read_slice(8)?.get_i64())
    }

    fn read_f64(&mut self) -> Result<f64, PackStreamError> {
        Ok(self.read_slice(8)?.get_f64())
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8], PackStreamError> {
        if self.remaining() < len {
            return Err(PackStreamError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }
}

/// Verify a struct's field count against the expected arity.
pub fn check_struct_size(name: &str, expected: usize, actual: usize) -> Result<(), PackStreamError> {
    if expected != actual {
        return Err(PackStreamError::InvalidStructure(format!(
            "Invalid message received, serialized {} structures should have {} fields, received {} structure has {} fields",
            name, expected, name, actual
        )));
    }
    Ok(())
}

/// Decode a single value from bytes. Trailing bytes are an error.
pub fn decode(data: &[u8]) -> Result<PackStreamValue, PackStreamError> {
    let mut decoder = PackStreamDecoder::new(data);
    let value = decoder.decode()?;
    if !decoder.is_empty() {
        return Err(PackStreamError::InvalidStructure(format!(
            "{} trailing bytes after value",
            decoder.remaining()
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nesting_limit() {
        let mut data = vec![0x91; 200_000];
        data.push(0xC0);
        assert_eq!(decode(&data), Err(PackStreamError::NestingTooDeep(MAX_NESTING_DEPTH)));

        let mut data = vec![0x91; MAX_NESTING_DEPTH - 1];
        data.extend_from_slice(&[0xA1, 0x81, b'k', 0xC0]);
        assert!(decode(&data).is_ok());

        let mut data = vec![0xB1, 0x4E].repeat(MAX_NESTING_DEPTH + 1);
        data.push(0xC0);
        assert!(matches!(decode(&data), Err(PackStreamError::NestingTooDeep(_))));
    }

    #[test]
    fn test_decode_primitives() {
        assert_eq!(decode(&[0xC0]).unwrap(), PackStreamValue::Null);
        assert_eq!(decode(&[0xC3]).unwrap(), PackStreamValue::Boolean(true));
        assert_eq!(decode(&[0xF0]).unwrap(), PackStreamValue::Integer(-16));
        assert_eq!(decode(&[0xC8, 0x80]).unwrap(), PackStreamValue::Integer(-128));
        assert_eq!(decode(&[0xC9, 0x03, 0xE8]).unwrap(), PackStreamValue::Integer(1000));
        assert_eq!(
            decode(&[0xCA, 0x00, 0x01, 0x86, 0xA0]).unwrap(),
            PackStreamValue::Integer(100000)
        );
        assert_eq!(
            decode(&[0xC1, 0x3F, 0xF8, 0, 0, 0, 0, 0, 0]).unwrap(),
            PackStreamValue::Float(1.5)
        );
    }

    #[test]
    fn test_decode_string_and_bytes() {
        assert_eq!(
            decode(&[0x85, b'h', b'e', b'l', b'l', b'o']).unwrap(),
            PackStreamValue::String("hello".into())
        );
        assert_eq!(
            decode(&[0xCC, 0x02, 0xAA, 0xBB]).unwrap(),
            PackStreamValue::Bytes(vec![0xAA, 0xBB])
        );
    }

    #[test]
    fn test_peek_does_not_consume() {
        let data = [0x93, 0x01, 0x02, 0x03];
        let mut dec = PackStreamDecoder::new(&data);
        assert_eq!(dec.peek_byte().unwrap(), 0x93);
        assert_eq!(dec.position(), 0);
        assert_eq!(dec.read_list_header().unwrap(), 3);
        assert_eq!(dec.read_int().unwrap(), 1);
    }

    #[test]
    fn test_struct_header() {
        let data = [0xB3, 0x10, 0x80, 0xA0, 0xA0];
        let mut dec = PackStreamDecoder::new(&data);
        assert_eq!(dec.read_struct_header().unwrap(), (3, 0x10));
    }

    #[test]
    fn test_expect_struct_rejects_wrong_size() {
        let data = [0xB2, b'D', 0x01, 0x02];
        let mut dec = PackStreamDecoder::new(&data);
        let err = dec.expect_struct("Date", b'D', 1).unwrap_err();
        assert!(err.to_string().contains("should have 1 fields"));
    }

    #[test]
    fn test_expect_struct_rejects_wrong_signature() {
        let data = [0xB1, b'T', 0x01];
        let mut dec = PackStreamDecoder::new(&data);
        assert!(matches!(
            dec.expect_struct("Date", b'D', 1),
            Err(PackStreamError::InvalidStructure(_))
        ));
    }

    #[test]
    fn test_unexpected_eof() {
        assert!(matches!(decode(&[0xC9, 0x01]), Err(PackStreamError::UnexpectedEof)));
        assert!(matches!(decode(&[0x85, b'a']), Err(PackStreamError::UnexpectedEof)));
        assert!(matches!(
            PackStreamDecoder::new(&[]).peek_byte(),
            Err(PackStreamError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_invalid_map_key() {
        assert!(matches!(decode(&[0xA1, 0x01, 0x02]), Err(PackStreamError::InvalidMapKey)));
    }

    #[test]
    fn test_unknown_marker() {
        assert!(matches!(decode(&[0xE0]), Err(PackStreamError::UnknownMarker(0xE0))));
    }

    #[test]
    fn test_wrong_typed_read() {
        let mut dec = PackStreamDecoder::new(&[0x81, b'x']);
        assert!(matches!(
            dec.read_int(),
            Err(PackStreamError::UnexpectedMarker { expected: "integer", marker: 0x81 })
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        assert!(decode(&[0x01, 0x02]).is_err());
    }
}
