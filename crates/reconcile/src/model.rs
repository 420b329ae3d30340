use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::FetchError;

/// Wire field holding the composite ID (`"{sequence}-{partition}"`).
pub const ID_FIELD: &str = "service_request_id";

/// Wire field holding the timestamp used for output ordering.
pub const OBSERVED_AT_FIELD: &str = "requested_datetime";

// ---------------------------------------------------------------------------
// Composite ID
// ---------------------------------------------------------------------------

/// Composite record key: partition-local sequence number plus partition
/// (the issuing year for GeoReport registries).
///
/// Ordered by partition first, then sequence, so a sorted store iterates
/// each partition's ID space contiguously.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordId {
    sequence: u32,
    partition: String,
}

impl RecordId {
    pub fn new(sequence: u32, partition: impl Into<String>) -> Self {
        Self { sequence, partition: partition.into() }
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }
}

impl Ord for RecordId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.partition
            .cmp(&other.partition)
            .then(self.sequence.cmp(&other.sequence))
    }
}

impl PartialOrd for RecordId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.sequence, self.partition)
    }
}

impl FromStr for RecordId {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = |why: &str| FetchError::MalformedResponse(format!("invalid record id {s:?}: {why}"));

        let (seq, partition) = s.trim().split_once('-').ok_or_else(|| bad("expected SEQUENCE-PARTITION"))?;
        let sequence: u32 = seq.parse().map_err(|_| bad("sequence is not a number"))?;
        if sequence == 0 {
            return Err(bad("sequence numbers start at 1"));
        }
        if partition.is_empty() || partition.chars().any(char::is_whitespace) {
            return Err(bad("empty or malformed partition"));
        }
        Ok(Self::new(sequence, partition))
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// One registry entry. The payload is kept verbatim; only the ID and the
/// ordering timestamp are interpreted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct Record {
    id: RecordId,
    fields: Map<String, Value>,
}

impl Record {
    /// Build a minimal record carrying only its ID and optional timestamp.
    pub fn new(id: RecordId, observed_at: Option<&str>) -> Self {
        let mut fields = Map::new();
        fields.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        if let Some(ts) = observed_at {
            fields.insert(OBSERVED_AT_FIELD.to_string(), Value::String(ts.to_string()));
        }
        Self { id, fields }
    }

    /// Parse a raw registry object.
    pub fn from_value(value: Value) -> Result<Self, FetchError> {
        match value {
            Value::Object(fields) => Self::from_fields(fields),
            other => Err(FetchError::MalformedResponse(format!(
                "expected record object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn from_fields(fields: Map<String, Value>) -> Result<Self, FetchError> {
        let id = match fields.get(ID_FIELD) {
            Some(Value::String(s)) => s.parse()?,
            Some(other) => {
                return Err(FetchError::MalformedResponse(format!(
                    "{ID_FIELD} is {}, expected string",
                    json_kind(other)
                )))
            }
            None => return Err(FetchError::MalformedResponse(format!("record missing {ID_FIELD}"))),
        };
        Ok(Self { id, fields })
    }

    /// Attach or replace an opaque payload field.
    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        if key != ID_FIELD {
            self.fields.insert(key.to_string(), value);
        }
        self
    }

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    /// Raw ordering timestamp; `None` when absent, null or blank.
    pub fn observed_at(&self) -> Option<&str> {
        self.fields
            .get(OBSERVED_AT_FIELD)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Ordering key for the timestamp. See [`ObservedAt`].
    pub fn observed_key(&self) -> ObservedAt<'_> {
        match self.observed_at() {
            None => ObservedAt::Missing,
            Some(raw) => parse_observed(raw).map_or(ObservedAt::Raw(raw), ObservedAt::Time),
        }
    }

    /// Timestamp as a UTC wall-clock time, when it parses.
    pub fn observed_time(&self) -> Option<NaiveDateTime> {
        match self.observed_key() {
            ObservedAt::Time(t) => Some(t),
            _ => None,
        }
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl TryFrom<Map<String, Value>> for Record {
    type Error = FetchError;

    fn try_from(fields: Map<String, Value>) -> Result<Self, Self::Error> {
        Self::from_fields(fields)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

/// How a record's timestamp takes part in output ordering.
///
/// Variants are declared from lowest to highest: parsed times rank above
/// unparseable strings, which rank above records with no timestamp at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ObservedAt<'a> {
    Missing,
    /// Present but in no known format; compared as a plain string.
    Raw(&'a str),
    /// Instant in UTC. Values without an offset are taken as UTC.
    Time(NaiveDateTime),
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

fn parse_observed(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.naive_utc());
    }
    for format in NAIVE_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(t);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Newest first; records without a timestamp go last; ties by ID.
pub fn cmp_newest_first(a: &Record, b: &Record) -> Ordering {
    b.observed_key()
        .cmp(&a.observed_key())
        .then_with(|| a.id.cmp(&b.id))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Object(_) => "an object",
        Value::Array(_) => "an array",
        Value::String(_) => "a string",
        Value::Number(_) => "a number",
        Value::Bool(_) => "a boolean",
        Value::Null => "null",
    }
}

// ---------------------------------------------------------------------------
// Pages
// ---------------------------------------------------------------------------

/// One page of a date-range query.
///
/// `item_count` is the raw array length as returned by the registry. It can
/// exceed `records.len()` when unusable items were dropped, and it is what
/// decides whether another page exists.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<Record>,
    pub item_count: usize,
}

impl Page {
    pub fn from_records(records: Vec<Record>) -> Self {
        let item_count = records.len();
        Self { records, item_count }
    }
}
