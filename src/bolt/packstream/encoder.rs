//! PackStream encoder.
//!
//! The encoder writes canonical encodings into any [`PackOutput`] sink. A plain
//! [`BytesMut`] is a sink, and so is the chunk-aware output used for framing
//! (see [`crate::bolt::codec::ChunkedOutput`]), which lets messages be packed
//! straight into chunks without a second copy.

use bytes::{BufMut, BytesMut};
use std::collections::HashMap;

use super::marker::*;
use super::types::{PackStreamStructure, PackStreamValue};
use super::PackStreamError;

/// Byte sink for packstream output.
///
/// Multi-byte primitives are written with a single call so that chunked sinks
/// never split them; only [`PackOutput::write_bytes`] may be split.
pub trait PackOutput {
    fn write_u8(&mut self, value: u8);
    fn write_u16(&mut self, value: u16);
    fn write_u32(&mut self, value: u32);
    fn write_i64(&mut self, value: i64);
    fn write_f64(&mut self, value: f64);
    fn write_bytes(&mut self, data: &[u8]);

    fn write_i8(&mut self, value: i8) {
        self.write_u8(value as u8);
    }

    fn write_i16(&mut self, value: i16) {
        self.write_u16(value as u16);
    }

    fn write_i32(&mut self, value: i32) {
        self.write_u32(value as u32);
    }
}

impl PackOutput for BytesMut {
    fn write_u8(&mut self, value: u8) {
        self.put_u8(value);
    }

    fn write_u16(&mut self, value: u16) {
        self.put_u16(value);
    }

    fn write_u32(&mut self, value: u32) {
        self.put_u32(value);
    }

    fn write_i64(&mut self, value: i64) {
        self.put_i64(value);
    }

    fn write_f64(&mut self, value: f64) {
        self.put_f64(value);
    }

    fn write_bytes(&mut self, data: &[u8]) {
        self.put_slice(data);
    }
}

/// PackStream encoder writing into a borrowed sink.
pub struct PackStreamEncoder<'a, O: PackOutput> {
    out: &'a mut O,
}

impl<'a, O: PackOutput> PackStreamEncoder<'a, O> {
    /// Create an encoder over the given sink.
    pub fn new(out: &'a mut O) -> Self {
        Self { out }
    }

    /// Encode any value.
    pub fn encode(&mut self, value: &PackStreamValue) -> Result<(), PackStreamError> {
        match value {
            PackStreamValue::Null => {
                self.encode_null();
                Ok(())
            }
            PackStreamValue::Boolean(b) => {
                self.encode_bool(*b);
                Ok(())
            }
            PackStreamValue::Integer(i) => {
                self.encode_int(*i);
                Ok(())
            }
            PackStreamValue::Float(f) => {
                self.encode_float(*f);
                Ok(())
            }
            PackStreamValue::Bytes(b) => self.encode_bytes(b),
            PackStreamValue::String(s) => self.encode_string(s),
            PackStreamValue::List(l) => self.encode_list(l),
            PackStreamValue::Map(m) => self.encode_map(m),
            PackStreamValue::Structure(s) => self.encode_structure(s),
        }
    }

    pub fn encode_null(&mut self) {
        self.out.write_u8(NULL);
    }

    pub fn encode_bool(&mut self, value: bool) {
        self.out.write_u8(if value { TRUE } else { FALSE });
    }

    /// Encode an integer using the smallest representation.
    pub fn encode_int(&mut self, value: i64) {
        if is_tiny_int(value) {
            self.out.write_u8(value as u8);
        } else if let Ok(v) = i8::try_from(value) {
            self.out.write_u8(INT_8);
            self.out.write_i8(v);
        } else if let Ok(v) = i16::try_from(value) {
            self.out.write_u8(INT_16);
            self.out.write_i16(v);
        } else if let Ok(v) = i32::try_from(value) {
            self.out.write_u8(INT_32);
            self.out.write_i32(v);
        } else {
            self.out.write_u8(INT_64);
            self.out.write_i64(value);
        }
    }

    pub fn encode_float(&mut self, value: f64) {
        self.out.write_u8(FLOAT_64);
        self.out.write_f64(value);
    }

    pub fn encode_bytes(&mut self, value: &[u8]) -> Result<(), PackStreamError> {
        let len = value.len();
        if len <= u8::MAX as usize {
            self.out.write_u8(BYTES_8);
            self.out.write_u8(len as u8);
        } else if len <= u16::MAX as usize {
            self.out.write_u8(BYTES_16);
            self.out.write_u16(len as u16);
        } else if len <= i32::MAX as usize {
            self.out.write_u8(BYTES_32);
            self.out.write_u32(len as u32);
        } else {
            return Err(PackStreamError::ValueTooLarge("bytes", len));
        }
        self.out.write_bytes(value);
        Ok(())
    }

    pub fn encode_string(&mut self, value: &str) -> Result<(), PackStreamError> {
        let bytes = value.as_bytes();
        self.encode_sized_header(
            bytes.len(),
            "string",
            TINY_STRING_BASE,
            [STRING_8, STRING_16, STRING_32],
        )?;
        self.out.write_bytes(bytes);
        Ok(())
    }

    pub fn encode_list_header(&mut self, len: usize) -> Result<(), PackStreamError> {
        self.encode_sized_header(len, "list", TINY_LIST_BASE, [LIST_8, LIST_16, LIST_32])
    }

    pub fn encode_list(&mut self, values: &[PackStreamValue]) -> Result<(), PackStreamError> {
        self.encode_list_header(values.len())?;
        for value in values {
            self.encode(value)?;
        }
        Ok(())
    }

    pub fn encode_map_header(&mut self, len: usize) -> Result<(), PackStreamError> {
        self.encode_sized_header(len, "map", TINY_MAP_BASE, [MAP_8, MAP_16, MAP_32])
    }

    pub fn encode_map(
        &mut self,
        map: &HashMap<String, PackStreamValue>,
    ) -> Result<(), PackStreamError> {
        self.encode_map_header(map.len())?;
        for (key, value) in map {
            self.encode_string(key)?;
            self.encode(value)?;
        }
        Ok(())
    }

    /// Write a struct header: field count folded into the marker, then the
    /// signature byte.
    pub fn encode_struct_header(&mut self, size: usize, signature: u8) -> Result<(), PackStreamError> {
        if size <= TINY_MAX_SIZE {
            self.out.write_u8(TINY_STRUCT_BASE | size as u8);
        } else if size <= u8::MAX as usize {
            self.out.write_u8(STRUCT_8);
            self.out.write_u8(size as u8);
        } else if size <= u16::MAX as usize {
            self.out.write_u8(STRUCT_16);
            self.out.write_u16(size as u16);
        } else {
            return Err(PackStreamError::ValueTooLarge("struct", size));
        }
        self.out.write_u8(signature);
        Ok(())
    }

    pub fn encode_structure(&mut self, s: &PackStreamStructure) -> Result<(), PackStreamError> {
        self.encode_struct_header(s.fields.len(), s.signature)?;
        for field in &s.fields {
            self.encode(field)?;
        }
        Ok(())
    }

    fn encode_sized_header(
        &mut self,
        len: usize,
        what: &'static str,
        tiny_base: u8,
        markers: [u8; 3],
    ) -> Result<(), PackStreamError> {
        if len <= TINY_MAX_SIZE {
            self.out.write_u8(tiny_base | len as u8);
        } else if len <= u8::MAX as usize {
            self.out.write_u8(markers[0]);
            self.out.write_u8(len as u8);
        } else if len <= u16::MAX as usize {
            self.out.write_u8(markers[1]);
            self.out.write_u16(len as u16);
        } else if len <= i32::MAX as usize {
            self.out.write_u8(markers[2]);
            self.out.write_u32(len as u32);
        } else {
            return Err(PackStreamError::ValueTooLarge(what, len));
        }
        Ok(())
    }
}

/// Encode a single value into a fresh buffer.
pub fn encode(value: &PackStreamValue) -> Result<BytesMut, PackStreamError> {
    let mut buf = BytesMut::with_capacity(256);
    PackStreamEncoder::new(&mut buf).encode(value)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed(f: impl FnOnce(&mut PackStreamEncoder<'_, BytesMut>)) -> Vec<u8> {
        let mut buf = BytesMut::new();
        f(&mut PackStreamEncoder::new(&mut buf));
        buf.to_vec()
    }

    #[test]
    fn test_encode_null_and_bool() {
        let bytes = packed(|e| {
            e.encode_null();
            e.encode_bool(true);
            e.encode_bool(false);
        });
        assert_eq!(bytes, vec![0xC0, 0xC3, 0xC2]);
    }

    #[test]
    fn test_encode_tiny_int() {
        let bytes = packed(|e| {
            e.encode_int(0);
            e.encode_int(127);
            e.encode_int(-16);
            e.encode_int(-1);
        });
        assert_eq!(bytes, vec![0x00, 0x7F, 0xF0, 0xFF]);
    }

    #[test]
    fn test_encode_int_widths() {
        assert_eq!(packed(|e| e.encode_int(-17)), vec![0xC8, 0xEF]);
        assert_eq!(packed(|e| e.encode_int(-128)), vec![0xC8, 0x80]);
        assert_eq!(packed(|e| e.encode_int(128)), vec![0xC9, 0x00, 0x80]);
        assert_eq!(packed(|e| e.encode_int(1000)), vec![0xC9, 0x03, 0xE8]);
        assert_eq!(packed(|e| e.encode_int(100000)), vec![0xCA, 0x00, 0x01, 0x86, 0xA0]);

        let big = packed(|e| e.encode_int(i64::MAX));
        assert_eq!(big[0], 0xCB);
        assert_eq!(big.len(), 9);
    }

    #[test]
    fn test_encode_float() {
        let bytes = packed(|e| e.encode_float(1.5));
        assert_eq!(bytes, vec![0xC1, 0x3F, 0xF8, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_encode_strings() {
        assert_eq!(packed(|e| e.encode_string("").unwrap()), vec![0x80]);

        let hello = packed(|e| e.encode_string("hello").unwrap());
        assert_eq!(hello[0], 0x85);
        assert_eq!(&hello[1..], b"hello");

        let s = "a".repeat(20);
        let long = packed(|e| e.encode_string(&s).unwrap());
        assert_eq!(&long[..2], &[0xD0, 20]);

        let s = "b".repeat(300);
        let longer = packed(|e| e.encode_string(&s).unwrap());
        assert_eq!(&longer[..3], &[0xD1, 0x01, 0x2C]);
    }

    #[test]
    fn test_encode_bytes() {
        assert_eq!(packed(|e| e.encode_bytes(&[1, 2, 3]).unwrap()), vec![0xCC, 0x03, 1, 2, 3]);
    }

    #[test]
    fn test_encode_collections() {
        let list = vec![
            PackStreamValue::Integer(1),
            PackStreamValue::Integer(2),
            PackStreamValue::Integer(3),
        ];
        assert_eq!(packed(|e| e.encode_list(&list).unwrap()), vec![0x93, 1, 2, 3]);
        assert_eq!(packed(|e| e.encode_list(&[]).unwrap()), vec![0x90]);
        assert_eq!(packed(|e| e.encode_map(&HashMap::new()).unwrap()), vec![0xA0]);

        let mut map = HashMap::new();
        map.insert("a".to_string(), PackStreamValue::Integer(1));
        assert_eq!(packed(|e| e.encode_map(&map).unwrap()), vec![0xA1, 0x81, b'a', 0x01]);
    }

    #[test]
    fn test_encode_struct_header() {
        assert_eq!(packed(|e| e.encode_struct_header(3, 0x10).unwrap()), vec![0xB3, 0x10]);
        assert_eq!(packed(|e| e.encode_struct_header(0, 0x0F).unwrap()), vec![0xB0, 0x0F]);
    }

    #[test]
    fn test_encode_structure() {
        let s = PackStreamStructure::new(b'N', vec![PackStreamValue::Integer(1)]);
        assert_eq!(packed(|e| e.encode_structure(&s).unwrap()), vec![0xB1, b'N', 0x01]);
    }
}
