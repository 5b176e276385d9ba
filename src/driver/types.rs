//! Driver Types
//!
//! The value model handed to and returned from queries.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{DriverError, DriverResult};
use super::graph::{Node, Path, Relationship};
use super::vector::Vector;

/// Largest integer magnitude an `f64` represents exactly.
pub const MAX_SAFE_FLOAT_INT: i64 = 1 << 53;

// ============================================================================
// Value
// ============================================================================

/// A single value of the graph type system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null
    Null,
    /// Boolean
    Boolean(bool),
    /// Integer (i64)
    Integer(i64),
    /// Float (f64)
    Float(f64),
    /// String
    String(String),
    /// Bytes
    Bytes(Vec<u8>),
    /// List
    List(Vec<Value>),
    /// Map
    Map(HashMap<String, Value>),
    /// Node
    Node(Node),
    /// Relationship
    Relationship(Relationship),
    /// Path
    Path(Path),
    /// Point (2D/3D)
    Point(Point),
    /// Date
    Date(NaiveDate),
    /// Time with a UTC offset
    Time(OffsetTime),
    /// LocalTime
    LocalTime(NaiveTime),
    /// LocalDateTime
    LocalDateTime(NaiveDateTime),
    /// DateTime with a fixed offset
    DateTime(DateTime<FixedOffset>),
    /// DateTime with a named zone
    DateTimeZoned(ZonedDateTime),
    /// Duration
    Duration(Duration),
    /// Vector
    Vector(Vector),
}

impl Value {
    /// Null check
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Strict integer access; floats are not coerced.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Strict float access; integers are not coerced.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Value::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_relationship(&self) -> Option<&Relationship> {
        match self {
            Value::Relationship(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Value::Path(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&Vector> {
        match self {
            Value::Vector(v) => Some(v),
            _ => None,
        }
    }

    /// Integer view of the value.
    ///
    /// A float converts only when it is finite, integral and inside the
    /// `i64` range; anything else fails with [`DriverError::LossyCoercion`].
    pub fn to_i64(&self) -> DriverResult<i64> {
        match self {
            Value::Integer(i) => Ok(*i),
            Value::Float(f) => float_to_i64(*f),
            other => Err(other.mismatch("INTEGER")),
        }
    }

    /// Float view of the value. Integers beyond 2^53 do not convert.
    pub fn to_f64(&self) -> DriverResult<f64> {
        match self {
            Value::Float(f) => Ok(*f),
            Value::Integer(i) => int_to_f64(*i),
            other => Err(other.mismatch("FLOAT")),
        }
    }

    pub fn to_i32(&self) -> DriverResult<i32> {
        narrow(self.to_i64()?, "INTEGER (32 bit)")
    }

    pub fn to_i16(&self) -> DriverResult<i16> {
        narrow(self.to_i64()?, "INTEGER (16 bit)")
    }

    pub fn to_i8(&self) -> DriverResult<i8> {
        narrow(self.to_i64()?, "INTEGER (8 bit)")
    }

    /// Type name used in conversion diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Boolean(_) => "BOOLEAN",
            Value::Integer(_) => "INTEGER",
            Value::Float(_) => "FLOAT",
            Value::String(_) => "STRING",
            Value::Bytes(_) => "BYTES",
            Value::List(_) => "LIST",
            Value::Map(_) => "MAP",
            Value::Node(_) => "NODE",
            Value::Relationship(_) => "RELATIONSHIP",
            Value::Path(_) => "PATH",
            Value::Point(_) => "POINT",
            Value::Date(_) => "DATE",
            Value::Time(_) => "TIME",
            Value::LocalTime(_) => "LOCAL_TIME",
            Value::LocalDateTime(_) => "LOCAL_DATE_TIME",
            Value::DateTime(_) | Value::DateTimeZoned(_) => "DATE_TIME",
            Value::Duration(_) => "DURATION",
            Value::Vector(_) => "VECTOR",
        }
    }

    fn mismatch(&self, target: &str) -> DriverError {
        DriverError::type_conversion(format!("Cannot convert {} to {}", self.type_name(), target))
    }
}

fn float_to_i64(f: f64) -> DriverResult<i64> {
    // -2^63 is exact as f64; 2^63 is the first value out of range.
    const LOWER: f64 = -9_223_372_036_854_775_808.0;
    const UPPER: f64 = 9_223_372_036_854_775_808.0;
    if f.is_finite() && f.fract() == 0.0 && f >= LOWER && f < UPPER {
        Ok(f as i64)
    } else {
        Err(DriverError::lossy(format!("FLOAT {}", f), "INTEGER"))
    }
}

fn int_to_f64(i: i64) -> DriverResult<f64> {
    if i.unsigned_abs() <= MAX_SAFE_FLOAT_INT as u64 {
        Ok(i as f64)
    } else {
        Err(DriverError::lossy(format!("INTEGER {}", i), "FLOAT"))
    }
}

fn narrow<T: TryFrom<i64>>(i: i64, target: &str) -> DriverResult<T> {
    T::try_from(i).map_err(|_| DriverError::lossy(format!("INTEGER {}", i), target))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::List(l) => write!(f, "[{} items]", l.len()),
            Value::Map(m) => write!(f, "{{{} entries}}", m.len()),
            Value::Node(n) => write!(f, "{}", n),
            Value::Relationship(r) => write!(f, "{}", r),
            Value::Path(p) => write!(f, "{}", p),
            Value::Point(p) => write!(f, "{}", p),
            Value::Date(d) => write!(f, "{}", d),
            Value::Time(t) => write!(f, "{}", t),
            Value::LocalTime(t) => write!(f, "{}", t),
            Value::LocalDateTime(dt) => write!(f, "{}", dt),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::DateTimeZoned(dt) => write!(f, "{}", dt),
            Value::Duration(d) => write!(f, "{}", d),
            Value::Vector(v) => write!(f, "{}", v),
        }
    }
}

// From implementations
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(v: HashMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Value::LocalTime(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::LocalDateTime(v)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::DateTime(v)
    }
}

impl From<Point> for Value {
    fn from(v: Point) -> Self {
        Value::Point(v)
    }
}

impl From<Duration> for Value {
    fn from(v: Duration) -> Self {
        Value::Duration(v)
    }
}

impl From<Vector> for Value {
    fn from(v: Vector) -> Self {
        Value::Vector(v)
    }
}

// ============================================================================
// Point
// ============================================================================

/// Spatial point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// SRID (Spatial Reference ID)
    pub srid: i32,
    pub x: f64,
    pub y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
}

impl Point {
    pub fn new_2d(srid: i32, x: f64, y: f64) -> Self {
        Self { srid, x, y, z: None }
    }

    pub fn new_3d(srid: i32, x: f64, y: f64, z: f64) -> Self {
        Self { srid, x, y, z: Some(z) }
    }

    /// WGS84 2D point (longitude, latitude)
    pub fn wgs84_2d(longitude: f64, latitude: f64) -> Self {
        Self::new_2d(4326, longitude, latitude)
    }

    /// WGS84 3D point (longitude, latitude, height)
    pub fn wgs84_3d(longitude: f64, latitude: f64, height: f64) -> Self {
        Self::new_3d(4979, longitude, latitude, height)
    }

    pub fn cartesian_2d(x: f64, y: f64) -> Self {
        Self::new_2d(7203, x, y)
    }

    pub fn cartesian_3d(x: f64, y: f64, z: f64) -> Self {
        Self::new_3d(9157, x, y, z)
    }

    pub fn is_3d(&self) -> bool {
        self.z.is_some()
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.z {
            Some(z) => write!(f, "point({{srid:{}, x:{}, y:{}, z:{}}})", self.srid, self.x, self.y, z),
            None => write!(f, "point({{srid:{}, x:{}, y:{}}})", self.srid, self.x, self.y),
        }
    }
}

// ============================================================================
// Temporal values
// ============================================================================

/// Time of day with a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetTime {
    pub time: NaiveTime,
    /// Offset east of UTC in seconds
    pub offset_seconds: i32,
}

impl OffsetTime {
    pub fn new(time: NaiveTime, offset_seconds: i32) -> Self {
        Self { time, offset_seconds }
    }

    /// The offset as a chrono value, if it is in range (±24h).
    pub fn offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.offset_seconds)
    }
}

impl fmt::Display for OffsetTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset() {
            Some(offset) => write!(f, "{}{}", self.time, offset),
            None => write!(f, "{}{:+}s", self.time, self.offset_seconds),
        }
    }
}

/// Instant bound to a named time zone.
///
/// The zone is carried by name only; local wall-clock time needs a zone
/// database, which the caller is expected to supply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZonedDateTime {
    pub utc: DateTime<Utc>,
    pub zone_id: String,
}

impl ZonedDateTime {
    pub fn new(utc: DateTime<Utc>, zone_id: impl Into<String>) -> Self {
        Self {
            utc,
            zone_id: zone_id.into(),
        }
    }
}

impl fmt::Display for ZonedDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.utc.to_rfc3339(), self.zone_id)
    }
}

// ============================================================================
// Duration
// ============================================================================

/// Temporal amount in months, days, seconds and nanoseconds.
///
/// The components are kept separate because a month or a day has no fixed
/// length in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Duration {
    pub months: i64,
    pub days: i64,
    pub seconds: i64,
    pub nanoseconds: i32,
}

impl Duration {
    pub fn new(months: i64, days: i64, seconds: i64, nanoseconds: i32) -> Self {
        Self {
            months,
            days,
            seconds,
            nanoseconds,
        }
    }

    pub fn from_seconds(seconds: i64) -> Self {
        Self::new(0, 0, seconds, 0)
    }

    pub fn from_days(days: i64) -> Self {
        Self::new(0, days, 0, 0)
    }

    pub fn from_months(months: i64) -> Self {
        Self::new(months, 0, 0, 0)
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}M{}DT{}", self.months, self.days, self.seconds)?;
        if self.nanoseconds != 0 {
            write!(f, ".{:09}", self.nanoseconds.unsigned_abs())?;
        }
        write!(f, "S")
    }
}

// ============================================================================
// TryFrom implementations
// ============================================================================

macro_rules! try_from_value {
    ($target:ty, $name:literal, $variant:ident) => {
        impl TryFrom<Value> for $target {
            type Error = DriverError;

            fn try_from(value: Value) -> Result<Self, Self::Error> {
                match value {
                    Value::$variant(v) => Ok(v),
                    other => Err(other.mismatch($name)),
                }
            }
        }
    };
}

try_from_value!(bool, "BOOLEAN", Boolean);
try_from_value!(String, "STRING", String);
try_from_value!(Vec<u8>, "BYTES", Bytes);
try_from_value!(Vec<Value>, "LIST", List);
try_from_value!(HashMap<String, Value>, "MAP", Map);
try_from_value!(Node, "NODE", Node);
try_from_value!(Relationship, "RELATIONSHIP", Relationship);
try_from_value!(Path, "PATH", Path);
try_from_value!(Point, "POINT", Point);
try_from_value!(NaiveDate, "DATE", Date);
try_from_value!(OffsetTime, "TIME", Time);
try_from_value!(NaiveTime, "LOCAL_TIME", LocalTime);
try_from_value!(NaiveDateTime, "LOCAL_DATE_TIME", LocalDateTime);
try_from_value!(DateTime<FixedOffset>, "DATE_TIME", DateTime);
try_from_value!(ZonedDateTime, "DATE_TIME", DateTimeZoned);
try_from_value!(Duration, "DURATION", Duration);
try_from_value!(Vector, "VECTOR", Vector);

impl TryFrom<Value> for i64 {
    type Error = DriverError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.to_i64()
    }
}

impl TryFrom<Value> for i32 {
    type Error = DriverError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.to_i32()
    }
}

impl TryFrom<Value> for i16 {
    type Error = DriverError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.to_i16()
    }
}

impl TryFrom<Value> for i8 {
    type Error = DriverError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.to_i8()
    }
}

impl TryFrom<Value> for f64 {
    type Error = DriverError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.to_f64()
    }
}

// ============================================================================
// Tests
// ============================================================================
