//! Conversion between driver values and packstream values.
//!
//! Packing turns query parameters into packstream values. Unpacking gives
//! meaning to the structures the server returns: graph entities, temporal
//! and spatial values, vectors.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Timelike, Utc};

use super::error::{DriverError, DriverResult};
use super::graph::{Node, Path, Relationship, UnboundRelationship, NO_LEGACY_ID};
use super::types::{Duration, OffsetTime, Point, Value, ZonedDateTime};
use super::vector::Vector;
use crate::bolt::packstream::{signature, PackStreamStructure, PackStreamValue};

/// Days from 0001-01-01 to 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;
const NANOS_PER_SECOND: i64 = 1_000_000_000;

// ============================================================================
// Packing
// ============================================================================

/// Pack a parameter value.
///
/// Graph entities are server-side values and cannot be sent back.
pub fn pack(value: Value) -> DriverResult<PackStreamValue> {
    Ok(match value {
        Value::Null => PackStreamValue::Null,
        Value::Boolean(b) => PackStreamValue::Boolean(b),
        Value::Integer(i) => PackStreamValue::Integer(i),
        Value::Float(f) => PackStreamValue::Float(f),
        Value::String(s) => PackStreamValue::String(s),
        Value::Bytes(b) => PackStreamValue::Bytes(b),
        Value::List(l) => PackStreamValue::List(l.into_iter().map(pack).collect::<DriverResult<_>>()?),
        Value::Map(m) => PackStreamValue::Map(pack_map(m)?),
        Value::Node(_) | Value::Relationship(_) | Value::Path(_) => {
            return Err(DriverError::type_conversion(format!(
                "{} values cannot be used as query parameters",
                value.type_name()
            )))
        }
        Value::Point(p) => pack_point(p),
        Value::Date(d) => structure(signature::DATE, vec![int(epoch_days(d))]),
        Value::Time(t) => structure(
            signature::TIME,
            vec![int(nanos_of_day(t.time)), int(t.offset_seconds as i64)],
        ),
        Value::LocalTime(t) => structure(signature::LOCAL_TIME, vec![int(nanos_of_day(t))]),
        Value::LocalDateTime(dt) => {
            let utc = dt.and_utc();
            structure(
                signature::LOCAL_DATE_TIME,
                vec![int(utc.timestamp()), int(utc.timestamp_subsec_nanos() as i64)],
            )
        }
        Value::DateTime(dt) => structure(
            signature::DATE_TIME_WITH_OFFSET,
            vec![
                int(dt.timestamp()),
                int(dt.timestamp_subsec_nanos() as i64),
                int(dt.offset().local_minus_utc() as i64),
            ],
        ),
        Value::DateTimeZoned(dt) => structure(
            signature::DATE_TIME_WITH_ZONE_ID,
            vec![
                int(dt.utc.timestamp()),
                int(dt.utc.timestamp_subsec_nanos() as i64),
                PackStreamValue::String(dt.zone_id),
            ],
        ),
        Value::Duration(d) => structure(
            signature::DURATION,
            vec![int(d.months), int(d.days), int(d.seconds), int(d.nanoseconds as i64)],
        ),
        Value::Vector(v) => {
            v.validate()?;
            structure(
                signature::VECTOR,
                vec![
                    PackStreamValue::Bytes(vec![v.type_marker()]),
                    PackStreamValue::Bytes(v.to_bytes()),
                ],
            )
        }
    })
}

/// Pack a parameter map.
pub fn pack_map(map: HashMap<String, Value>) -> DriverResult<HashMap<String, PackStreamValue>> {
    map.into_iter().map(|(k, v)| Ok((k, pack(v)?))).collect()
}

fn pack_point(p: Point) -> PackStreamValue {
    match p.z {
        Some(z) => structure(
            signature::POINT_3D,
            vec![
                int(p.srid as i64),
                PackStreamValue::Float(p.x),
                PackStreamValue::Float(p.y),
                PackStreamValue::Float(z),
            ],
        ),
        None => structure(
            signature::POINT_2D,
            vec![int(p.srid as i64), PackStreamValue::Float(p.x), PackStreamValue::Float(p.y)],
        ),
    }
}

fn structure(signature: u8, fields: Vec<PackStreamValue>) -> PackStreamValue {
    PackStreamValue::Structure(PackStreamStructure::new(signature, fields))
}

fn int(i: i64) -> PackStreamValue {
    PackStreamValue::Integer(i)
}

fn epoch_days(date: NaiveDate) -> i64 {
    date.num_days_from_ce() as i64 - UNIX_EPOCH_DAYS_FROM_CE
}

fn nanos_of_day(time: NaiveTime) -> i64 {
    time.num_seconds_from_midnight() as i64 * NANOS_PER_SECOND + time.nanosecond() as i64
}

// ============================================================================
// Unpacking
// ============================================================================

/// Unpack a value received from the server.
pub fn unpack(value: PackStreamValue) -> DriverResult<Value> {
    Ok(match value {
        PackStreamValue::Null => Value::Null,
        PackStreamValue::Boolean(b) => Value::Boolean(b),
        PackStreamValue::Integer(i) => Value::Integer(i),
        PackStreamValue::Float(f) => Value::Float(f),
        PackStreamValue::String(s) => Value::String(s),
        PackStreamValue::Bytes(b) => Value::Bytes(b),
        PackStreamValue::List(l) => Value::List(unpack_list(l)?),
        PackStreamValue::Map(m) => Value::Map(unpack_map(m)?),
        PackStreamValue::Structure(s) => unpack_structure(s)?,
    })
}

/// Unpack every element of a list, e.g. the fields of a RECORD.
pub fn unpack_list(list: Vec<PackStreamValue>) -> DriverResult<Vec<Value>> {
    list.into_iter().map(unpack).collect()
}

pub fn unpack_map(map: HashMap<String, PackStreamValue>) -> DriverResult<HashMap<String, Value>> {
    map.into_iter().map(|(k, v)| Ok((k, unpack(v)?))).collect()
}

fn unpack_structure(s: PackStreamStructure) -> DriverResult<Value> {
    let sig = s.signature;
    let mut fields = Fields::new(s, expected_size(sig)?)?;

    Ok(match sig {
        signature::NODE => Value::Node(fields.node()?),
        signature::RELATIONSHIP => Value::Relationship(fields.relationship()?),
        signature::UNBOUND_RELATIONSHIP => {
            return Err(DriverError::protocol_violation(
                "Unbound relationship outside of a path",
            ))
        }
        signature::PATH => Value::Path(fields.path()?),
        signature::DATE => {
            let days = fields.int("days")?;
            let date = days
                .checked_add(UNIX_EPOCH_DAYS_FROM_CE)
                .and_then(|d| i32::try_from(d).ok())
                .and_then(NaiveDate::from_num_days_from_ce_opt)
                .ok_or_else(|| out_of_range("Date", days))?;
            Value::Date(date)
        }
        signature::TIME => {
            let time = time_of_day(fields.int("nanoseconds")?)?;
            let offset = offset_seconds(fields.int("tz_offset_seconds")?)?;
            Value::Time(OffsetTime::new(time, offset))
        }
        signature::LOCAL_TIME => Value::LocalTime(time_of_day(fields.int("nanoseconds")?)?),
        signature::LOCAL_DATE_TIME => {
            let utc = instant(fields.int("seconds")?, fields.int("nanoseconds")?)?;
            Value::LocalDateTime(utc.naive_utc())
        }
        signature::DATE_TIME_WITH_OFFSET => {
            let utc = instant(fields.int("seconds")?, fields.int("nanoseconds")?)?;
            let offset = fixed_offset(fields.int("tz_offset_seconds")?)?;
            Value::DateTime(utc.with_timezone(&offset))
        }
        signature::DATE_TIME_WITH_ZONE_ID => {
            let utc = instant(fields.int("seconds")?, fields.int("nanoseconds")?)?;
            let zone_id = fields.string("tz_id")?;
            Value::DateTimeZoned(ZonedDateTime::new(utc, zone_id))
        }
        signature::LEGACY_DATE_TIME_WITH_OFFSET => {
            let local_seconds = fields.int("seconds")?;
            let nanos = fields.int("nanoseconds")?;
            let offset_raw = fields.int("tz_offset_seconds")?;
            let offset = fixed_offset(offset_raw)?;
            let utc_seconds = local_seconds
                .checked_sub(offset_raw)
                .ok_or_else(|| out_of_range("Epoch second", local_seconds))?;
            let utc = instant(utc_seconds, nanos)?;
            Value::DateTime(utc.with_timezone(&offset))
        }
        signature::LEGACY_DATE_TIME_WITH_ZONE_ID => {
            return Err(DriverError::protocol_violation(
                "Legacy zoned date-time values are not supported; negotiate UTC date-times",
            ))
        }
        signature::DURATION => {
            let months = fields.int("months")?;
            let days = fields.int("days")?;
            let seconds = fields.int("seconds")?;
            let nanos = fields.int("nanoseconds")?;
            let nanos = i32::try_from(nanos).map_err(|_| out_of_range("Duration nanoseconds", nanos))?;
            Value::Duration(Duration::new(months, days, seconds, nanos))
        }
        signature::POINT_2D => {
            let srid = fields.srid()?;
            Value::Point(Point::new_2d(srid, fields.float("x")?, fields.float("y")?))
        }
        signature::POINT_3D => {
            let srid = fields.srid()?;
            let (x, y, z) = (fields.float("x")?, fields.float("y")?, fields.float("z")?);
            Value::Point(Point::new_3d(srid, x, y, z))
        }
        signature::VECTOR => {
            let type_marker = fields.bytes("type")?;
            let payload = fields.bytes("data")?;
            let [element_type] = type_marker[..] else {
                return Err(DriverError::protocol_violation(format!(
                    "Vector type marker must be a single byte, got {}",
                    type_marker.len()
                )));
            };
            Value::Vector(Vector::from_bytes(element_type, &payload)?)
        }
        _ => unreachable_signature(sig)?,
    })
}

fn expected_size(sig: u8) -> DriverResult<usize> {
    match sig {
        signature::NODE | signature::UNBOUND_RELATIONSHIP => Ok(4),
        signature::RELATIONSHIP => Ok(8),
        signature::PATH
        | signature::DATE_TIME_WITH_OFFSET
        | signature::DATE_TIME_WITH_ZONE_ID
        | signature::LEGACY_DATE_TIME_WITH_OFFSET
        | signature::LEGACY_DATE_TIME_WITH_ZONE_ID
        | signature::POINT_2D => Ok(3),
        signature::DATE | signature::LOCAL_TIME => Ok(1),
        signature::TIME | signature::LOCAL_DATE_TIME | signature::VECTOR => Ok(2),
        signature::DURATION | signature::POINT_3D => Ok(4),
        other => unreachable_signature(other),
    }
}

fn unreachable_signature<T>(sig: u8) -> DriverResult<T> {
    Err(DriverError::protocol_violation(format!(
        "Unknown structure signature 0x{:02X}",
        sig
    )))
}

fn out_of_range(what: &str, raw: i64) -> DriverError {
    DriverError::protocol_violation(format!("{} value {} is out of range", what, raw))
}

fn time_of_day(nanos: i64) -> DriverResult<NaiveTime> {
    let secs = u32::try_from(nanos.div_euclid(NANOS_PER_SECOND)).ok();
    let frac = nanos.rem_euclid(NANOS_PER_SECOND) as u32;
    secs.and_then(|s| NaiveTime::from_num_seconds_from_midnight_opt(s, frac))
        .ok_or_else(|| out_of_range("Time of day", nanos))
}

fn instant(seconds: i64, nanos: i64) -> DriverResult<DateTime<Utc>> {
    let whole = seconds.checked_add(nanos.div_euclid(NANOS_PER_SECOND));
    let frac = nanos.rem_euclid(NANOS_PER_SECOND) as u32;
    whole
        .and_then(|s| DateTime::from_timestamp(s, frac))
        .ok_or_else(|| out_of_range("Epoch second", seconds))
}

fn offset_seconds(raw: i64) -> DriverResult<i32> {
    fixed_offset(raw).map(|o| o.local_minus_utc())
}

fn fixed_offset(raw: i64) -> DriverResult<FixedOffset> {
    i32::try_from(raw)
        .ok()
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| out_of_range("UTC offset", raw))
}

/// Positional fields of a structure whose arity has been checked.
struct Fields {
    name: u8,
    iter: std::vec::IntoIter<PackStreamValue>,
}

impl Fields {
    fn new(s: PackStreamStructure, expected: usize) -> DriverResult<Self> {
        if s.fields.len() != expected {
            return Err(DriverError::protocol_violation(format!(
                "Invalid message received, serialized {} structures should have {} fields, received {} fields",
                char::from(s.signature),
                expected,
                s.fields.len()
            )));
        }
        Ok(Self {
            name: s.signature,
            iter: s.fields.into_iter(),
        })
    }

    fn next(&mut self, field: &str) -> DriverResult<PackStreamValue> {
        self.iter.next().ok_or_else(|| {
            DriverError::protocol_violation(format!(
                "Missing field '{}' in structure '{}'",
                field,
                char::from(self.name)
            ))
        })
    }

    fn wrong_kind(&self, field: &str, expected: &str, got: &PackStreamValue) -> DriverError {
        DriverError::protocol_violation(format!(
            "Field '{}' of structure '{}' should be {}, got {}",
            field,
            char::from(self.name),
            expected,
            got.type_name()
        ))
    }

    fn int(&mut self, field: &str) -> DriverResult<i64> {
        match self.next(field)? {
            PackStreamValue::Integer(i) => Ok(i),
            other => Err(self.wrong_kind(field, "an integer", &other)),
        }
    }

    /// Legacy ids may be null on servers that no longer expose them.
    fn legacy_id(&mut self, field: &str) -> DriverResult<i64> {
        match self.next(field)? {
            PackStreamValue::Integer(i) => Ok(i),
            PackStreamValue::Null => Ok(NO_LEGACY_ID),
            other => Err(self.wrong_kind(field, "an integer", &other)),
        }
    }

    fn float(&mut self, field: &str) -> DriverResult<f64> {
        match self.next(field)? {
            PackStreamValue::Float(f) => Ok(f),
            other => Err(self.wrong_kind(field, "a float", &other)),
        }
    }

    fn string(&mut self, field: &str) -> DriverResult<String> {
        match self.next(field)? {
            PackStreamValue::String(s) => Ok(s),
            other => Err(self.wrong_kind(field, "a string", &other)),
        }
    }

    /// Element id, falling back to the legacy id when absent.
    fn element_id(&mut self, field: &str, legacy: i64) -> DriverResult<String> {
        match self.next(field)? {
            PackStreamValue::String(s) => Ok(s),
            PackStreamValue::Null => Ok(legacy.to_string()),
            other => Err(self.wrong_kind(field, "a string", &other)),
        }
    }

    fn bytes(&mut self, field: &str) -> DriverResult<Vec<u8>> {
        match self.next(field)? {
            PackStreamValue::Bytes(b) => Ok(b),
            other => Err(self.wrong_kind(field, "bytes", &other)),
        }
    }

    fn list(&mut self, field: &str) -> DriverResult<Vec<PackStreamValue>> {
        match self.next(field)? {
            PackStreamValue::List(l) => Ok(l),
            other => Err(self.wrong_kind(field, "a list", &other)),
        }
    }

    fn properties(&mut self) -> DriverResult<HashMap<String, Value>> {
        match self.next("properties")? {
            PackStreamValue::Map(m) => unpack_map(m),
            other => Err(self.wrong_kind("properties", "a map", &other)),
        }
    }

    fn srid(&mut self) -> DriverResult<i32> {
        let raw = self.int("srid")?;
        i32::try_from(raw).map_err(|_| out_of_range("SRID", raw))
    }

    fn node(&mut self) -> DriverResult<Node> {
        let id = self.legacy_id("id")?;
        let labels = self
            .list("labels")?
            .into_iter()
            .map(|l| {
                l.into_string()
                    .ok_or_else(|| DriverError::protocol_violation("Node labels must be strings"))
            })
            .collect::<DriverResult<Vec<_>>>()?;
        let properties = self.properties()?;
        let element_id = self.element_id("element_id", id)?;
        Ok(Node::new(id, element_id, labels, properties))
    }

    fn relationship(&mut self) -> DriverResult<Relationship> {
        let id = self.legacy_id("id")?;
        let start_node_id = self.legacy_id("start_node_id")?;
        let end_node_id = self.legacy_id("end_node_id")?;
        let rel_type = self.string("type")?;
        let properties = self.properties()?;
        Ok(Relationship {
            id,
            element_id: self.element_id("element_id", id)?,
            start_node_id,
            start_node_element_id: self.element_id("start_node_element_id", start_node_id)?,
            end_node_id,
            end_node_element_id: self.element_id("end_node_element_id", end_node_id)?,
            rel_type,
            properties,
        })
    }

    fn unbound_relationship(&mut self) -> DriverResult<UnboundRelationship> {
        let id = self.legacy_id("id")?;
        let rel_type = self.string("type")?;
        let properties = self.properties()?;
        Ok(UnboundRelationship {
            id,
            element_id: self.element_id("element_id", id)?,
            rel_type,
            properties,
        })
    }

    fn path(&mut self) -> DriverResult<Path> {
        let nodes = self
            .list("nodes")?
            .into_iter()
            .map(|v| expect_struct(v, signature::NODE)?.node())
            .collect::<DriverResult<Vec<_>>>()?;
        let rels = self
            .list("relationships")?
            .into_iter()
            .map(|v| expect_struct(v, signature::UNBOUND_RELATIONSHIP)?.unbound_relationship())
            .collect::<DriverResult<Vec<_>>>()?;
        let indices = self
            .list("indices")?
            .into_iter()
            .map(|v| {
                v.as_int()
                    .ok_or_else(|| DriverError::protocol_violation("Path indices must be integers"))
            })
            .collect::<DriverResult<Vec<_>>>()?;
        build_path(nodes, rels, &indices)
    }
}

fn expect_struct(value: PackStreamValue, sig: u8) -> DriverResult<Fields> {
    match value {
        PackStreamValue::Structure(s) if s.signature == sig => Fields::new(s, expected_size(sig)?),
        other => Err(DriverError::protocol_violation(format!(
            "Expected structure '{}' inside path, got {}",
            char::from(sig),
            other.type_name()
        ))),
    }
}

/// Walk a wire path.
///
/// `indices` alternates relationship and node references. A positive
/// relationship index runs forward from the previous node, a negative one
/// backward; both are 1-based. Node indices are 0-based.
pub fn build_path(
    nodes: Vec<Node>,
    rels: Vec<UnboundRelationship>,
    indices: &[i64],
) -> DriverResult<Path> {
    if indices.len() % 2 != 0 {
        return Err(DriverError::protocol_violation(format!(
            "Path index sequence must have even length, got {}",
            indices.len()
        )));
    }
    let first = nodes
        .first()
        .cloned()
        .ok_or_else(|| DriverError::protocol_violation("Path without nodes"))?;

    let mut walk = Vec::with_capacity(indices.len() / 2 + 1);
    let mut hops = Vec::with_capacity(indices.len() / 2);
    walk.push(first);

    for step in indices.chunks_exact(2) {
        let (r, n) = (step[0], step[1]);
        let next = usize::try_from(n)
            .ok()
            .and_then(|i| nodes.get(i))
            .ok_or_else(|| DriverError::protocol_violation(format!("Path node index {} is out of range", n)))?;
        let unbound = usize::try_from(r.unsigned_abs())
            .ok()
            .filter(|_| r != 0)
            .and_then(|i| rels.get(i - 1))
            .ok_or_else(|| {
                DriverError::protocol_violation(format!("Path relationship index {} is out of range", r))
            })?;

        let prev = &walk[walk.len() - 1];
        let rel = if r > 0 {
            unbound.bind(prev, next)
        } else {
            unbound.bind(next, prev)
        };
        hops.push(rel);
        walk.push(next.clone());
    }

    Path::new(walk, hops)
}
