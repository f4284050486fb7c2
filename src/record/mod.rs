//! # Result Normalization
//!
//! Converts the raw value trees a wire driver hands back into the closed
//! [`Value`] model: a total mapping with loud failure on anything unknown.
//!
//! The output is fully materialized. A [`RecordSet`] is a stable snapshot
//! bounded by the result size; callers can iterate it as many times as they
//! like.

use crate::driver::{RawRecord, RawStream, RawValue};
use crate::model::{
    IsoDuration, Node, NodeId, Path, PropertyMap, RelId, Relationship, Value,
};
use crate::{Error, Result};

// ============================================================================
// PackStream structure tags
// ============================================================================

const TAG_NODE: u8 = b'N';
const TAG_RELATIONSHIP: u8 = b'R';
const TAG_UNBOUND_RELATIONSHIP: u8 = b'r';
const TAG_PATH: u8 = b'P';
const TAG_DATE: u8 = b'D';
const TAG_TIME: u8 = b'T';
const TAG_LOCAL_TIME: u8 = b't';
const TAG_DATE_TIME: u8 = b'I';
const TAG_LOCAL_DATE_TIME: u8 = b'd';
const TAG_DURATION: u8 = b'E';
const TAG_POINT_2D: u8 = b'X';
const TAG_POINT_3D: u8 = b'Y';

/// Days between 0001-01-01 (chrono's day 1 of the common era) and the Unix
/// epoch, which Bolt dates count from.
const EPOCH_CE_DAYS: i64 = 719_163;

const NANOS_PER_SEC: i64 = 1_000_000_000;

// ============================================================================
// Record
// ============================================================================

/// One normalized result row: named fields in the order the server
/// returned them.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    /// Untyped field access.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Get a typed value from the record.
    pub fn get<T: FromValue>(&self, key: &str) -> Result<T> {
        let value = self
            .value(key)
            .ok_or_else(|| Error::InvalidArgument(format!("no such field `{key}`")))?;
        T::from_value(value).map_err(|e| match e {
            Error::InvalidArgument(msg) => {
                Error::InvalidArgument(format!("field `{key}`: {msg}"))
            }
            other => other,
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<Vec<(String, Value)>> for Record {
    fn from(fields: Vec<(String, Value)>) -> Self {
        Self { fields }
    }
}

// ============================================================================
// RecordSet
// ============================================================================

/// A finite, fully materialized query result. Restartable: `iter()` starts
/// from the top every time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordSet {
    pub columns: Vec<String>,
    pub records: Vec<Record>,
}

impl RecordSet {
    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first(&self) -> Option<&Record> {
        self.records.first()
    }
}

impl IntoIterator for RecordSet {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a RecordSet {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl std::ops::Index<usize> for RecordSet {
    type Output = Record;

    fn index(&self, index: usize) -> &Record {
        &self.records[index]
    }
}

// ============================================================================
// Normalization
// ============================================================================

/// Materialize a raw stream into named, normalized records.
///
/// Deterministic: normalizing the same raw stream twice yields structurally
/// equal results.
pub fn normalize(stream: RawStream) -> Result<RecordSet> {
    let columns = stream.columns;
    let mut records = Vec::with_capacity(stream.records.len());
    for raw in stream.records {
        records.push(normalize_record(&columns, raw)?);
    }
    Ok(RecordSet { columns, records })
}

fn normalize_record(columns: &[String], raw: RawRecord) -> Result<Record> {
    if raw.fields.len() != columns.len() {
        return Err(Error::InvalidArgument(format!(
            "record has {} fields but the result declares {} columns",
            raw.fields.len(),
            columns.len()
        )));
    }
    let mut fields = Vec::with_capacity(columns.len());
    for (name, value) in columns.iter().zip(raw.fields) {
        fields.push((name.clone(), normalize_value(value)?));
    }
    Ok(Record { fields })
}

/// Map one raw value to its [`Value`] equivalent.
///
/// Integers stay `i64` end to end; they are never routed through floating
/// point, so values beyond the 53-bit double-safe range survive bit-exact.
/// Unknown structure tags fail with [`Error::UnsupportedValueType`].
pub fn normalize_value(raw: RawValue) -> Result<Value> {
    Ok(match raw {
        RawValue::Null => Value::Null,
        RawValue::Bool(b) => Value::Bool(b),
        RawValue::Int(i) => Value::Int(i),
        RawValue::Float(f) => Value::Float(f),
        RawValue::String(s) => Value::String(s),
        RawValue::Bytes(b) => Value::Bytes(b),
        RawValue::List(items) => Value::List(
            items
                .into_iter()
                .map(normalize_value)
                .collect::<Result<Vec<_>>>()?,
        ),
        RawValue::Map(pairs) => Value::Map(normalize_map(pairs)?),
        RawValue::Structure { tag, fields } => normalize_structure(tag, fields)?,
    })
}

fn normalize_map(pairs: Vec<(String, RawValue)>) -> Result<PropertyMap> {
    let mut map = PropertyMap::with_capacity(pairs.len());
    for (key, value) in pairs {
        map.insert(key, normalize_value(value)?);
    }
    Ok(map)
}

fn normalize_structure(tag: u8, fields: Vec<RawValue>) -> Result<Value> {
    match tag {
        TAG_NODE => Ok(Value::Node(Box::new(normalize_node(fields)?))),
        TAG_RELATIONSHIP => {
            Ok(Value::Relationship(Box::new(normalize_relationship(fields)?)))
        }
        TAG_PATH => Ok(Value::Path(Box::new(normalize_path(fields)?))),
        TAG_DATE => normalize_date(fields),
        TAG_TIME | TAG_LOCAL_TIME => normalize_time(tag, fields),
        TAG_DATE_TIME => normalize_date_time(fields),
        TAG_LOCAL_DATE_TIME => normalize_local_date_time(fields),
        TAG_DURATION => normalize_duration(fields),
        TAG_POINT_2D | TAG_POINT_3D => normalize_point(tag, fields),
        // An unbound relationship only makes sense inside a path.
        other => Err(Error::UnsupportedValueType { tag: other }),
    }
}

// ============================================================================
// Structure decoders
// ============================================================================

fn malformed(what: &str) -> Error {
    Error::InvalidArgument(format!("malformed {what} structure"))
}

fn take_int(value: RawValue, what: &str) -> Result<i64> {
    match value {
        RawValue::Int(i) => Ok(i),
        _ => Err(malformed(what)),
    }
}

fn take_float(value: RawValue, what: &str) -> Result<f64> {
    match value {
        RawValue::Float(f) => Ok(f),
        _ => Err(malformed(what)),
    }
}

fn take_string(value: RawValue, what: &str) -> Result<String> {
    match value {
        RawValue::String(s) => Ok(s),
        _ => Err(malformed(what)),
    }
}

fn take_list(value: RawValue, what: &str) -> Result<Vec<RawValue>> {
    match value {
        RawValue::List(items) => Ok(items),
        _ => Err(malformed(what)),
    }
}

fn take_map(value: RawValue, what: &str) -> Result<Vec<(String, RawValue)>> {
    match value {
        RawValue::Map(pairs) => Ok(pairs),
        _ => Err(malformed(what)),
    }
}

/// `[id, labels, properties]` with an optional trailing element id.
fn normalize_node(fields: Vec<RawValue>) -> Result<Node> {
    if fields.len() != 3 && fields.len() != 4 {
        return Err(malformed("NODE"));
    }
    let mut fields = fields.into_iter();
    let id = take_int(fields.next().ok_or_else(|| malformed("NODE"))?, "NODE")?;
    let labels = take_list(fields.next().ok_or_else(|| malformed("NODE"))?, "NODE")?
        .into_iter()
        .map(|l| take_string(l, "NODE"))
        .collect::<Result<Vec<_>>>()?;
    let properties =
        normalize_map(take_map(fields.next().ok_or_else(|| malformed("NODE"))?, "NODE")?)?;
    let element_id = fields
        .next()
        .map(|v| take_string(v, "NODE"))
        .transpose()?;
    Ok(Node {
        id: NodeId(id),
        element_id,
        labels,
        properties,
    })
}

/// `[id, start, end, type, properties]` with optional trailing element ids.
fn normalize_relationship(fields: Vec<RawValue>) -> Result<Relationship> {
    if fields.len() != 5 && fields.len() != 8 {
        return Err(malformed("RELATIONSHIP"));
    }
    let mut fields = fields.into_iter();
    let mut next = |what| fields.next().ok_or_else(|| malformed(what));
    let id = take_int(next("RELATIONSHIP")?, "RELATIONSHIP")?;
    let start = take_int(next("RELATIONSHIP")?, "RELATIONSHIP")?;
    let end = take_int(next("RELATIONSHIP")?, "RELATIONSHIP")?;
    let rel_type = take_string(next("RELATIONSHIP")?, "RELATIONSHIP")?;
    let properties = normalize_map(take_map(next("RELATIONSHIP")?, "RELATIONSHIP")?)?;
    let element_id = fields
        .next()
        .map(|v| take_string(v, "RELATIONSHIP"))
        .transpose()?;
    Ok(Relationship {
        id: RelId(id),
        element_id,
        start: NodeId(start),
        end: NodeId(end),
        rel_type,
        properties,
    })
}

/// An unbound relationship as found inside paths: `[id, type, properties]`
/// with an optional trailing element id.
struct UnboundRel {
    id: RelId,
    element_id: Option<String>,
    rel_type: String,
    properties: PropertyMap,
}

fn normalize_unbound(value: RawValue) -> Result<UnboundRel> {
    let RawValue::Structure { tag: TAG_UNBOUND_RELATIONSHIP, fields } = value else {
        return Err(malformed("PATH"));
    };
    if fields.len() != 3 && fields.len() != 4 {
        return Err(malformed("PATH"));
    }
    let mut fields = fields.into_iter();
    let mut next = |what| fields.next().ok_or_else(|| malformed(what));
    let id = take_int(next("PATH")?, "PATH")?;
    let rel_type = take_string(next("PATH")?, "PATH")?;
    let properties = normalize_map(take_map(next("PATH")?, "PATH")?)?;
    let element_id = fields.next().map(|v| take_string(v, "PATH")).transpose()?;
    Ok(UnboundRel {
        id: RelId(id),
        element_id,
        rel_type,
        properties,
    })
}

/// `[nodes, unbound relationships, sequence]`. The sequence alternates
/// (relationship index, node index) pairs; relationship indices are
/// one-based with a negative sign meaning the relationship points against
/// the direction of travel.
fn normalize_path(fields: Vec<RawValue>) -> Result<Path> {
    if fields.len() != 3 {
        return Err(malformed("PATH"));
    }
    let mut fields = fields.into_iter();
    let mut next = |what| fields.next().ok_or_else(|| malformed(what));
    let nodes = take_list(next("PATH")?, "PATH")?
        .into_iter()
        .map(|v| match v {
            RawValue::Structure { tag: TAG_NODE, fields } => normalize_node(fields),
            _ => Err(malformed("PATH")),
        })
        .collect::<Result<Vec<_>>>()?;
    let rels = take_list(next("PATH")?, "PATH")?
        .into_iter()
        .map(normalize_unbound)
        .collect::<Result<Vec<_>>>()?;
    let sequence = take_list(next("PATH")?, "PATH")?
        .into_iter()
        .map(|v| take_int(v, "PATH"))
        .collect::<Result<Vec<_>>>()?;

    let first = nodes.first().ok_or_else(|| malformed("PATH"))?;
    let mut path = Path::single(first.clone());
    let mut last_id = first.id;
    for pair in sequence.chunks(2) {
        let [rel_index, node_index] = pair else {
            return Err(malformed("PATH"));
        };
        let node = usize::try_from(*node_index)
            .ok()
            .and_then(|i| nodes.get(i))
            .ok_or_else(|| malformed("PATH"))?;
        let rel = usize::try_from(rel_index.unsigned_abs())
            .ok()
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| rels.get(i))
            .ok_or_else(|| malformed("PATH"))?;
        let (start, end) = if *rel_index >= 0 {
            (last_id, node.id)
        } else {
            (node.id, last_id)
        };
        path.append(
            Relationship {
                id: rel.id,
                element_id: rel.element_id.clone(),
                start,
                end,
                rel_type: rel.rel_type.clone(),
                properties: rel.properties.clone(),
            },
            node.clone(),
        );
        last_id = node.id;
    }
    Ok(path)
}

// ============================================================================
// Temporal and spatial decoders
// ============================================================================

/// `[days since epoch]`
fn normalize_date(fields: Vec<RawValue>) -> Result<Value> {
    let [days] = <[RawValue; 1]>::try_from(fields).map_err(|_| malformed("DATE"))?;
    let days = take_int(days, "DATE")?;
    let ce_days = days
        .checked_add(EPOCH_CE_DAYS)
        .and_then(|d| i32::try_from(d).ok())
        .ok_or_else(|| malformed("DATE"))?;
    let date = chrono::NaiveDate::from_num_days_from_ce_opt(ce_days)
        .ok_or_else(|| malformed("DATE"))?;
    Ok(Value::Date(date))
}

/// `[nanoseconds since midnight]`, with a trailing offset for zoned times.
/// The offset only matters for cross-zone comparison, which this layer does
/// not do, so both forms normalize to a plain time of day.
fn normalize_time(tag: u8, fields: Vec<RawValue>) -> Result<Value> {
    let expected = if tag == TAG_TIME { 2 } else { 1 };
    if fields.len() != expected {
        return Err(malformed("TIME"));
    }
    let mut fields = fields.into_iter();
    let nanos = take_int(fields.next().ok_or_else(|| malformed("TIME"))?, "TIME")?;
    if !(0..24 * 3600 * NANOS_PER_SEC).contains(&nanos) {
        return Err(malformed("TIME"));
    }
    let time = chrono::NaiveTime::from_num_seconds_from_midnight_opt(
        (nanos / NANOS_PER_SEC) as u32,
        (nanos % NANOS_PER_SEC) as u32,
    )
    .ok_or_else(|| malformed("TIME"))?;
    Ok(Value::Time(time))
}

/// `[seconds since epoch (UTC), nanoseconds, offset seconds]`. The instant
/// is already UTC; the offset is presentation detail and is dropped.
fn normalize_date_time(fields: Vec<RawValue>) -> Result<Value> {
    let [secs, nanos, _offset] =
        <[RawValue; 3]>::try_from(fields).map_err(|_| malformed("DATETIME"))?;
    let secs = take_int(secs, "DATETIME")?;
    let nanos = take_int(nanos, "DATETIME")?;
    let nanos = u32::try_from(nanos).map_err(|_| malformed("DATETIME"))?;
    let instant = chrono::DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| malformed("DATETIME"))?;
    Ok(Value::DateTime(instant))
}

/// `[seconds since epoch, nanoseconds]`, no zone.
fn normalize_local_date_time(fields: Vec<RawValue>) -> Result<Value> {
    let [secs, nanos] =
        <[RawValue; 2]>::try_from(fields).map_err(|_| malformed("LOCAL_DATETIME"))?;
    let secs = take_int(secs, "LOCAL_DATETIME")?;
    let nanos = take_int(nanos, "LOCAL_DATETIME")?;
    let nanos = u32::try_from(nanos).map_err(|_| malformed("LOCAL_DATETIME"))?;
    let instant = chrono::DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| malformed("LOCAL_DATETIME"))?;
    Ok(Value::LocalDateTime(instant.naive_utc()))
}

/// `[months, days, seconds, nanoseconds]`
fn normalize_duration(fields: Vec<RawValue>) -> Result<Value> {
    let [months, days, seconds, nanos] =
        <[RawValue; 4]>::try_from(fields).map_err(|_| malformed("DURATION"))?;
    Ok(Value::Duration(IsoDuration {
        months: take_int(months, "DURATION")?,
        days: take_int(days, "DURATION")?,
        seconds: take_int(seconds, "DURATION")?,
        nanoseconds: i32::try_from(take_int(nanos, "DURATION")?)
            .map_err(|_| malformed("DURATION"))?,
    }))
}

/// `[srid, x, y]` or `[srid, x, y, z]`
fn normalize_point(tag: u8, fields: Vec<RawValue>) -> Result<Value> {
    let expected = if tag == TAG_POINT_2D { 3 } else { 4 };
    if fields.len() != expected {
        return Err(malformed("POINT"));
    }
    let mut fields = fields.into_iter();
    let mut next = |what| fields.next().ok_or_else(|| malformed(what));
    let srid = i32::try_from(take_int(next("POINT")?, "POINT")?)
        .map_err(|_| malformed("POINT"))?;
    let x = take_float(next("POINT")?, "POINT")?;
    let y = take_float(next("POINT")?, "POINT")?;
    if tag == TAG_POINT_2D {
        Ok(Value::Point2D { srid, x, y })
    } else {
        let z = take_float(next("POINT")?, "POINT")?;
        Ok(Value::Point3D { srid, x, y, z })
    }
}

// ============================================================================
// FromValue: typed extraction out of records
// ============================================================================

/// Convert from [`Value`] to concrete types.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

fn type_error<T>(expected: &str, got: &Value) -> Result<T> {
    Err(Error::InvalidArgument(format!(
        "expected {expected}, got {}",
        got.type_name()
    )))
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Int(i) => Ok(*i),
            other => type_error("INTEGER", other),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_float()
            .ok_or(())
            .or_else(|_| type_error("FLOAT", value))
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            other => type_error("BOOLEAN", other),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(s.clone()),
            other => type_error("STRING", other),
        }
    }
}

impl FromValue for Node {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Node(n) => Ok(*n.clone()),
            other => type_error("NODE", other),
        }
    }
}

impl FromValue for Relationship {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Relationship(r) => Ok(*r.clone()),
            other => type_error("RELATIONSHIP", other),
        }
    }
}

impl FromValue for Path {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Path(p) => Ok(*p.clone()),
            other => type_error("PATH", other),
        }
    }
}

impl FromValue for PropertyMap {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Map(m) => Ok(m.clone()),
            other => type_error("MAP", other),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::List(items) => items.iter().map(T::from_value).collect(),
            other => type_error("LIST", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_structure() -> RawValue {
        RawValue::Structure {
            tag: TAG_NODE,
            fields: vec![
                RawValue::Int(7),
                RawValue::List(vec![RawValue::String("Person".into())]),
                RawValue::Map(vec![
                    ("name".into(), RawValue::String("Ada".into())),
                    ("age".into(), RawValue::Int(3)),
                ]),
                RawValue::String("4:abc:7".into()),
            ],
        }
    }

    #[test]
    fn test_normalize_scalars() {
        assert_eq!(normalize_value(RawValue::Null).unwrap(), Value::Null);
        assert_eq!(normalize_value(RawValue::Int(42)).unwrap(), Value::Int(42));
        assert_eq!(
            normalize_value(RawValue::String("hi".into())).unwrap(),
            Value::String("hi".into())
        );
    }

    #[test]
    fn test_normalize_node() {
        let value = normalize_value(node_structure()).unwrap();
        let Value::Node(node) = value else {
            panic!("expected a node");
        };
        assert_eq!(node.id, NodeId(7));
        assert_eq!(node.element_id.as_deref(), Some("4:abc:7"));
        assert!(node.has_label("Person"));
        assert_eq!(node.get("name"), Some(&Value::String("Ada".into())));
        // property order arrives as sent
        let keys: Vec<&str> = node.properties.keys().collect();
        assert_eq!(keys, vec!["name", "age"]);
    }

    #[test]
    fn test_normalize_relationship() {
        let raw = RawValue::Structure {
            tag: TAG_RELATIONSHIP,
            fields: vec![
                RawValue::Int(1),
                RawValue::Int(7),
                RawValue::Int(9),
                RawValue::String("KNOWS".into()),
                RawValue::Map(vec![("since".into(), RawValue::Int(2020))]),
            ],
        };
        let Value::Relationship(rel) = normalize_value(raw).unwrap() else {
            panic!("expected a relationship");
        };
        assert_eq!(rel.id, RelId(1));
        assert_eq!(rel.start, NodeId(7));
        assert_eq!(rel.end, NodeId(9));
        assert_eq!(rel.rel_type, "KNOWS");
    }

    #[test]
    fn test_normalize_path_reverses_negative_indices() {
        let node = |id: i64| RawValue::Structure {
            tag: TAG_NODE,
            fields: vec![
                RawValue::Int(id),
                RawValue::List(vec![]),
                RawValue::Map(vec![]),
            ],
        };
        let unbound = RawValue::Structure {
            tag: TAG_UNBOUND_RELATIONSHIP,
            fields: vec![
                RawValue::Int(5),
                RawValue::String("KNOWS".into()),
                RawValue::Map(vec![]),
            ],
        };
        // node 1 <-[KNOWS]- node 2: traversal against the edge direction
        let raw = RawValue::Structure {
            tag: TAG_PATH,
            fields: vec![
                RawValue::List(vec![node(1), node(2)]),
                RawValue::List(vec![unbound]),
                RawValue::List(vec![RawValue::Int(-1), RawValue::Int(1)]),
            ],
        };
        let Value::Path(path) = normalize_value(raw).unwrap() else {
            panic!("expected a path");
        };
        assert_eq!(path.len(), 1);
        assert_eq!(path.start().id, NodeId(1));
        assert_eq!(path.end().id, NodeId(2));
        let rel = &path.relationships[0];
        assert_eq!(rel.start, NodeId(2));
        assert_eq!(rel.end, NodeId(1));
    }

    #[test]
    fn test_normalize_temporals() {
        let date = RawValue::Structure {
            tag: TAG_DATE,
            fields: vec![RawValue::Int(0)],
        };
        assert_eq!(
            normalize_value(date).unwrap(),
            Value::Date(chrono::NaiveDate::from_ymd_opt(1970, 1, 1).unwrap())
        );

        let duration = RawValue::Structure {
            tag: TAG_DURATION,
            fields: vec![
                RawValue::Int(1),
                RawValue::Int(2),
                RawValue::Int(3),
                RawValue::Int(4),
            ],
        };
        assert_eq!(
            normalize_value(duration).unwrap(),
            Value::Duration(IsoDuration { months: 1, days: 2, seconds: 3, nanoseconds: 4 })
        );
    }

    #[test]
    fn test_unknown_tag_fails_loudly() {
        let raw = RawValue::Structure { tag: 0x7A, fields: vec![] };
        match normalize_value(raw) {
            Err(Error::UnsupportedValueType { tag }) => assert_eq!(tag, 0x7A),
            other => panic!("expected UnsupportedValueType, got {other:?}"),
        }
    }

    #[test]
    fn test_large_integers_survive_exactly() {
        // First integer a double-backed representation corrupts.
        let beyond_double = (1i64 << 53) + 1;
        for candidate in [beyond_double, i64::MAX, i64::MIN] {
            let normalized = normalize_value(RawValue::Int(candidate)).unwrap();
            assert_eq!(normalized, Value::Int(candidate));
        }
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let stream = RawStream::new(["n", "x"])
            .with_row(vec![node_structure(), RawValue::Int(1)])
            .with_row(vec![RawValue::Null, RawValue::Int((1 << 53) + 1)]);
        let first = normalize(stream.clone()).unwrap();
        let second = normalize(stream).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_arity_mismatch_is_rejected() {
        let stream = RawStream::new(["a", "b"]).with_row(vec![RawValue::Int(1)]);
        assert!(matches!(normalize(stream), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_typed_extraction() {
        let stream = RawStream::new(["x"]).with_row(vec![RawValue::Int(1)]);
        let records = normalize(stream).unwrap();
        let x: i64 = records[0].get("x").unwrap();
        assert_eq!(x, 1);
        assert!(records[0].get::<String>("x").is_err());
        assert!(records[0].get::<i64>("missing").is_err());
    }
}
