//! Structured message values
//!
//! A [`Message`] is a typed record: a type identifier plus named
//! [`FieldValue`]s. Data sources hand these to the hub, and the publish path
//! builds them from plain JSON trees.

use std::collections::BTreeMap;

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// A point in time split into whole seconds and nanoseconds
///
/// The split form is convention-free: the schema decides whether it is
/// exposed as `sec`/`nanosec` or `secs`/`nsecs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Time {
    pub sec: i64,
    pub nanosec: u32,
}

impl Time {
    pub fn new(sec: i64, nanosec: u32) -> Self {
        Self::normalized(sec, nanosec as i64)
    }

    /// Build a time from parts that may overflow the nanosecond range
    pub fn normalized(sec: i64, nanosec: i64) -> Self {
        let total = sec as i128 * NANOS_PER_SEC + nanosec as i128;
        let sec = total.div_euclid(NANOS_PER_SEC);
        let nanosec = total.rem_euclid(NANOS_PER_SEC);
        Self {
            sec: sec.clamp(i64::MIN as i128, i64::MAX as i128) as i64,
            nanosec: nanosec as u32,
        }
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self {
            sec: now.timestamp(),
            nanosec: now.timestamp_subsec_nanos(),
        }
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        if !secs.is_finite() {
            return Self::default();
        }
        let whole = secs.floor();
        let nanos = ((secs - whole) * 1e9).round() as i64;
        Self::normalized(whole as i64, nanos)
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.sec as f64 + self.nanosec as f64 / 1e9
    }
}

/// A single field value of a structured message
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    /// Opaque byte payload (images, point clouds)
    Bytes(Vec<u8>),
    Time(Time),
    Message(Message),
    Array(Vec<FieldValue>),
    /// Plain value kept as-is because its type could not be determined
    Raw(serde_json::Value),
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::UInt(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<Time> for FieldValue {
    fn from(v: Time) -> Self {
        FieldValue::Time(v)
    }
}

impl From<Message> for FieldValue {
    fn from(v: Message) -> Self {
        FieldValue::Message(v)
    }
}

impl From<Vec<FieldValue>> for FieldValue {
    fn from(v: Vec<FieldValue>) -> Self {
        FieldValue::Array(v)
    }
}

/// A typed, structured message
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    type_id: String,
    fields: BTreeMap<String, FieldValue>,
}

impl Message {
    pub fn new(type_id: impl Into<String>) -> Self {
        Self {
            type_id: type_id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field assignment
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut FieldValue> {
        self.fields.get_mut(name)
    }

    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
