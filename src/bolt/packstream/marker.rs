//! PackStream marker bytes and struct signatures.
//!
//! Every packstream value starts with a marker byte. Small values (tiny ints,
//! short strings, lists, maps and structs) fold their size into the marker.

/// Null marker
pub const NULL: u8 = 0xC0;

/// Boolean markers
pub const FALSE: u8 = 0xC2;
pub const TRUE: u8 = 0xC3;

/// 64-bit IEEE 754 float marker
pub const FLOAT_64: u8 = 0xC1;

/// 32-bit float marker. Never emitted for plain values; only used as a
/// vector element type tag.
pub const FLOAT_32: u8 = 0xC6;

/// Integer markers. Tiny integers (-16..=127) are encoded in the marker itself.
pub const TINY_INT_MIN: u8 = 0xF0;
pub const TINY_INT_MAX: u8 = 0x7F;
pub const INT_8: u8 = 0xC8;
pub const INT_16: u8 = 0xC9;
pub const INT_32: u8 = 0xCA;
pub const INT_64: u8 = 0xCB;

/// Byte array markers
pub const BYTES_8: u8 = 0xCC;
pub const BYTES_16: u8 = 0xCD;
pub const BYTES_32: u8 = 0xCE;

/// String markers (0x80..=0x8F for up to 15 bytes)
pub const TINY_STRING_BASE: u8 = 0x80;
pub const STRING_8: u8 = 0xD0;
pub const STRING_16: u8 = 0xD1;
pub const STRING_32: u8 = 0xD2;

/// List markers (0x90..=0x9F for up to 15 items)
pub const TINY_LIST_BASE: u8 = 0x90;
pub const LIST_8: u8 = 0xD4;
pub const LIST_16: u8 = 0xD5;
pub const LIST_32: u8 = 0xD6;

/// Map markers (0xA0..=0xAF for up to 15 entries)
pub const TINY_MAP_BASE: u8 = 0xA0;
pub const MAP_8: u8 = 0xD8;
pub const MAP_16: u8 = 0xD9;
pub const MAP_32: u8 = 0xDA;

/// Struct markers (0xB0..=0xBF for up to 15 fields)
pub const TINY_STRUCT_BASE: u8 = 0xB0;
pub const STRUCT_8: u8 = 0xDC;
pub const STRUCT_16: u8 = 0xDD;

/// Largest size that fits into a tiny marker.
pub const TINY_MAX_SIZE: usize = 15;

/// Struct signatures of graph, temporal, spatial and vector values.
pub mod signature {
    pub const NODE: u8 = b'N';
    pub const RELATIONSHIP: u8 = b'R';
    pub const UNBOUND_RELATIONSHIP: u8 = b'r';
    pub const PATH: u8 = b'P';

    pub const DATE: u8 = b'D';
    pub const TIME: u8 = b'T';
    pub const LOCAL_TIME: u8 = b't';
    pub const LOCAL_DATE_TIME: u8 = b'd';
    pub const DATE_TIME_WITH_OFFSET: u8 = b'I';
    pub const DATE_TIME_WITH_ZONE_ID: u8 = b'i';
    pub const LEGACY_DATE_TIME_WITH_OFFSET: u8 = b'F';
    pub const LEGACY_DATE_TIME_WITH_ZONE_ID: u8 = b'f';
    pub const DURATION: u8 = b'E';

    pub const POINT_2D: u8 = b'X';
    pub const POINT_3D: u8 = b'Y';

    pub const VECTOR: u8 = b'V';
}

/// Marker families, as classified by [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Null,
    Boolean,
    Integer,
    Float,
    Bytes,
    String,
    List,
    Map,
    Struct,
    Unknown,
}

/// Classify a marker byte into its family.
pub fn classify(marker: u8) -> MarkerKind {
    match marker {
        0x00..=0x7F | 0xF0..=0xFF => MarkerKind::Integer,
        0x80..=0x8F => MarkerKind::String,
        0x90..=0x9F => MarkerKind::List,
        0xA0..=0xAF => MarkerKind::Map,
        0xB0..=0xBF => MarkerKind::Struct,
        NULL => MarkerKind::Null,
        FLOAT_64 => MarkerKind::Float,
        FALSE | TRUE => MarkerKind::Boolean,
        INT_8 | INT_16 | INT_32 | INT_64 => MarkerKind::Integer,
        BYTES_8 | BYTES_16 | BYTES_32 => MarkerKind::Bytes,
        STRING_8 | STRING_16 | STRING_32 => MarkerKind::String,
        LIST_8 | LIST_16 | LIST_32 => MarkerKind::List,
        MAP_8 | MAP_16 | MAP_32 => MarkerKind::Map,
        STRUCT_8 | STRUCT_16 => MarkerKind::Struct,
        _ => MarkerKind::Unknown,
    }
}

/// Check whether an integer fits into a single tiny-int byte.
#[inline]
pub fn is_tiny_int(value: i64) -> bool {
    (-16..=127).contains(&value)
}

/// Size folded into a tiny marker (low nibble).
#[inline]
pub fn tiny_size(marker: u8) -> usize {
    (marker & 0x0F) as usize
}
