//! Tree Conversion
//!
//! Converts structured [`Message`]s to plain JSON trees for the wire, and
//! plain trees back into structured messages for the publish path.
//!
//! Encoding is driven by the value variants. Decoding is driven by the target
//! schema: unknown input fields are ignored and malformed primitives are
//! dropped, leaving the field at its default.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{Map, Number, Value};

use super::schema::{ElementKind, FieldKind, PrimitiveType, Schema, SchemaResolver};
use super::value::{FieldValue, Message, Time};
use super::CodecError;

const SEC_KEYS: [&str; 2] = ["sec", "secs"];
const NSEC_KEYS: [&str; 4] = ["nanosec", "nsecs", "nsec", "nanosecs"];

// ============================================
// ENCODE
// ============================================

/// Encode a structured message into a plain JSON object
pub fn encode(message: &Message) -> Map<String, Value> {
    message
        .fields()
        .iter()
        .map(|(name, value)| (name.clone(), encode_value(value)))
        .collect()
}

/// Encode a single field value
pub fn encode_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Bool(b) => Value::Bool(*b),
        FieldValue::Int(i) => Value::from(*i),
        FieldValue::UInt(u) => Value::from(*u),
        FieldValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        FieldValue::String(s) => Value::String(s.clone()),
        FieldValue::Bytes(bytes) => Value::String(BASE64.encode(bytes)),
        FieldValue::Time(t) => encode_time(*t),
        FieldValue::Message(m) => match time_like(m) {
            Some(t) => encode_time(t),
            None => Value::Object(encode(m)),
        },
        FieldValue::Array(items) => Value::Array(items.iter().map(encode_value).collect()),
        FieldValue::Raw(v) => v.clone(),
    }
}

fn encode_time(t: Time) -> Value {
    let mut map = Map::new();
    map.insert("sec".to_string(), Value::from(t.sec));
    map.insert("nanosec".to_string(), Value::from(t.nanosec));
    Value::Object(map)
}

/// A nested message holding exactly a seconds and a nanoseconds field
fn time_like(message: &Message) -> Option<Time> {
    if message.len() != 2 {
        return None;
    }
    let sec = SEC_KEYS.iter().find_map(|k| message.get(k)).and_then(as_i64)?;
    let nsec = NSEC_KEYS.iter().find_map(|k| message.get(k)).and_then(as_i64)?;
    Some(Time::normalized(sec, nsec))
}

fn as_i64(value: &FieldValue) -> Option<i64> {
    match value {
        FieldValue::Int(i) => Some(*i),
        FieldValue::UInt(u) => i64::try_from(*u).ok(),
        _ => None,
    }
}

// ============================================
// DECODE
// ============================================

/// Decode a plain JSON tree into a message of the given type
pub fn decode<R>(resolver: &R, type_id: &str, tree: &Value) -> Result<Message, CodecError>
where
    R: SchemaResolver + ?Sized,
{
    let schema = resolver
        .resolve(type_id)
        .ok_or_else(|| CodecError::UnknownType(type_id.to_string()))?;
    let object = tree
        .as_object()
        .ok_or_else(|| CodecError::NotAnObject(type_id.to_string()))?;
    Ok(decode_object(resolver, &schema, object))
}

/// Construct a message with every schema field at its zero value
pub fn default_message<R>(resolver: &R, schema: &Schema) -> Message
where
    R: SchemaResolver + ?Sized,
{
    let mut message = Message::new(schema.type_id.clone());
    for field in &schema.fields {
        message.set(field.name.clone(), default_value(resolver, &field.kind));
    }
    message
}

fn default_value<R>(resolver: &R, kind: &FieldKind) -> FieldValue
where
    R: SchemaResolver + ?Sized,
{
    match kind {
        FieldKind::Primitive(p) => p.default_value(),
        FieldKind::Timestamp(_) => FieldValue::Time(Time::default()),
        FieldKind::Nested(type_id) => match resolver.resolve(type_id) {
            Some(schema) => FieldValue::Message(default_message(resolver, &schema)),
            None => FieldValue::Message(Message::new(type_id.clone())),
        },
        FieldKind::Array(_) => FieldValue::Array(Vec::new()),
    }
}

fn decode_object<R>(resolver: &R, schema: &Schema, object: &Map<String, Value>) -> Message
where
    R: SchemaResolver + ?Sized,
{
    let mut message = default_message(resolver, schema);
    for (name, value) in object {
        let Some(field) = schema.get(name) else {
            continue;
        };
        if let Some(decoded) = decode_field(resolver, &field.kind, value) {
            message.set(name.clone(), decoded);
        }
    }
    message
}

fn decode_field<R>(resolver: &R, kind: &FieldKind, value: &Value) -> Option<FieldValue>
where
    R: SchemaResolver + ?Sized,
{
    match kind {
        FieldKind::Primitive(p) => coerce_primitive(*p, value),
        FieldKind::Timestamp(_) => Some(FieldValue::Time(decode_time(value))),
        FieldKind::Nested(type_id) => match resolver.resolve(type_id) {
            Some(schema) => {
                if let Some(conv) = schema.time_convention() {
                    let t = decode_time(value);
                    let (s, ns) = conv.field_names();
                    let nested = Message::new(schema.type_id.clone())
                        .with(s, time_part(&schema, s, t.sec))
                        .with(ns, time_part(&schema, ns, i64::from(t.nanosec)));
                    return Some(FieldValue::Message(nested));
                }
                let empty = Map::new();
                let object = value.as_object().unwrap_or(&empty);
                Some(FieldValue::Message(decode_object(resolver, &schema, object)))
            }
            None => Some(FieldValue::Raw(value.clone())),
        },
        FieldKind::Array(element) => {
            let items = value.as_array()?;
            Some(decode_array(resolver, element, items, value))
        }
    }
}

/// One half of a timestamp, typed as the schema declares that field
fn time_part(schema: &Schema, name: &str, value: i64) -> FieldValue {
    match schema.get(name).map(|f| &f.kind) {
        Some(FieldKind::Primitive(p)) => {
            coerce_primitive(*p, &Value::from(value)).unwrap_or_else(|| p.default_value())
        }
        _ => FieldValue::Int(value),
    }
}

fn decode_array<R>(resolver: &R, element: &ElementKind, items: &[Value], raw: &Value) -> FieldValue
where
    R: SchemaResolver + ?Sized,
{
    match element {
        ElementKind::Primitive(p) => {
            let decoded: Option<Vec<FieldValue>> =
                items.iter().map(|v| coerce_primitive(*p, v)).collect();
            match decoded {
                Some(values) => FieldValue::Array(values),
                None => FieldValue::Raw(raw.clone()),
            }
        }
        ElementKind::Nested(type_id) => match resolver.resolve(type_id) {
            Some(schema) => {
                let kind = FieldKind::Nested(schema.type_id.clone());
                let values = items
                    .iter()
                    .filter_map(|v| decode_field(resolver, &kind, v))
                    .collect();
                FieldValue::Array(values)
            }
            None => FieldValue::Raw(raw.clone()),
        },
        ElementKind::Unknown => FieldValue::Raw(raw.clone()),
    }
}

/// Read a timestamp from any of the accepted shapes
///
/// Objects may use `sec`/`secs` and `nanosec`/`nsecs`/`nsec`; a bare number
/// is taken as seconds. Anything else yields the zero time.
pub fn decode_time(value: &Value) -> Time {
    match value {
        Value::Object(map) => {
            let sec = SEC_KEYS
                .iter()
                .find_map(|k| map.get(*k))
                .and_then(json_i64)
                .unwrap_or(0);
            let nsec = NSEC_KEYS
                .iter()
                .find_map(|k| map.get(*k))
                .and_then(json_i64)
                .unwrap_or(0);
            Time::normalized(sec, nsec)
        }
        Value::Number(n) => n.as_f64().map(Time::from_secs_f64).unwrap_or_default(),
        _ => Time::default(),
    }
}

fn json_i64(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

/// Convert a plain value to a primitive field, None if it does not fit
fn coerce_primitive(p: PrimitiveType, value: &Value) -> Option<FieldValue> {
    match p {
        PrimitiveType::Bool => value.as_bool().map(FieldValue::Bool),
        PrimitiveType::Int8 => signed(value, i8::MIN as i64, i8::MAX as i64),
        PrimitiveType::Int16 => signed(value, i16::MIN as i64, i16::MAX as i64),
        PrimitiveType::Int32 => signed(value, i32::MIN as i64, i32::MAX as i64),
        PrimitiveType::Int64 => signed(value, i64::MIN, i64::MAX),
        PrimitiveType::UInt8 => unsigned(value, u8::MAX as u64),
        PrimitiveType::UInt16 => unsigned(value, u16::MAX as u64),
        PrimitiveType::UInt32 => unsigned(value, u32::MAX as u64),
        PrimitiveType::UInt64 => unsigned(value, u64::MAX),
        PrimitiveType::Float32 => value
            .as_f64()
            .map(|f| FieldValue::Float(f as f32 as f64)),
        PrimitiveType::Float64 => value.as_f64().map(FieldValue::Float),
        PrimitiveType::String => value.as_str().map(|s| FieldValue::String(s.to_string())),
        PrimitiveType::Bytes => match value {
            Value::String(s) => BASE64.decode(s).ok().map(FieldValue::Bytes),
            Value::Array(items) => items
                .iter()
                .map(|v| v.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<Vec<u8>>>()
                .map(FieldValue::Bytes),
            _ => None,
        },
    }
}

fn signed(value: &Value, min: i64, max: i64) -> Option<FieldValue> {
    json_i64(value)
        .filter(|i| (min..=max).contains(i))
        .map(FieldValue::Int)
}

fn unsigned(value: &Value, max: u64) -> Option<FieldValue> {
    value
        .as_u64()
        .or_else(|| json_i64(value).and_then(|i| u64::try_from(i).ok()))
        .filter(|u| *u <= max)
        .map(FieldValue::UInt)
}

// ============================================
// HEADER STAMPING
// ============================================

/// Set `header.stamp` to the given time if the schema has one
///
/// Handles a stamp declared as a timestamp field as well as one declared as a
/// nested seconds/nanoseconds message under either naming convention.
/// Returns whether a stamp was written.
pub fn stamp_header<R>(resolver: &R, schema: &Schema, message: &mut Message, now: Time) -> bool
where
    R: SchemaResolver + ?Sized,
{
    let Some(FieldKind::Nested(header_type)) = schema.get("header").map(|f| &f.kind) else {
        return false;
    };
    let Some(header_schema) = resolver.resolve(header_type) else {
        return false;
    };
    let Some(stamp_field) = header_schema.get("stamp") else {
        return false;
    };

    let stamp = match &stamp_field.kind {
        FieldKind::Timestamp(_) => FieldValue::Time(now),
        FieldKind::Nested(stamp_type) => {
            let Some(stamp_schema) = resolver.resolve(stamp_type) else {
                return false;
            };
            let mut stamp = default_message(resolver, &stamp_schema);
            for key in SEC_KEYS {
                if stamp_schema.get(key).is_some() {
                    stamp.set(key, time_part(&stamp_schema, key, now.sec));
                }
            }
            for key in NSEC_KEYS {
                if stamp_schema.get(key).is_some() {
                    stamp.set(key, time_part(&stamp_schema, key, i64::from(now.nanosec)));
                }
            }
            FieldValue::Message(stamp)
        }
        _ => return false,
    };

    match message.get_mut("header") {
        Some(FieldValue::Message(header)) => {
            header.set("stamp", stamp);
        }
        _ => {
            let mut header = default_message(resolver, &header_schema);
            header.set("stamp", stamp);
            message.set("header", header);
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::schema::SchemaRegistry;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::with_common_types();
        registry
            .define(
                "test_msgs/msg/Waypoints",
                &[
                    ("header", "std_msgs/Header"),
                    ("name", "string"),
                    ("count", "uint32"),
                    ("speed", "float64"),
                    ("active", "bool"),
                    ("poses", "geometry_msgs/Pose[]"),
                    ("weights", "float64[]"),
                    ("blob", "uint8[]"),
                    ("legacy_stamp", "time"),
                ],
            )
            .unwrap();
        registry
    }

    fn point(x: f64, y: f64, z: f64) -> Message {
        Message::new("geometry_msgs/msg/Point")
            .with("x", x)
            .with("y", y)
            .with("z", z)
    }

    fn pose(x: f64) -> Message {
        Message::new("geometry_msgs/msg/Pose")
            .with("position", point(x, 2.0, 3.0))
            .with(
                "orientation",
                Message::new("geometry_msgs/msg/Quaternion")
                    .with("x", 0.0)
                    .with("y", 0.0)
                    .with("z", 0.0)
                    .with("w", 1.0),
            )
    }

    fn waypoints() -> Message {
        Message::new("test_msgs/msg/Waypoints")
            .with(
                "header",
                Message::new("std_msgs/msg/Header")
                    .with("stamp", Time::new(100, 5))
                    .with("frame_id", "map"),
            )
            .with("name", "route")
            .with("count", 2u64)
            .with("speed", 1.5)
            .with("active", true)
            .with(
                "poses",
                vec![FieldValue::Message(pose(1.0)), FieldValue::Message(pose(4.0))],
            )
            .with("weights", vec![FieldValue::Float(0.25), FieldValue::Float(0.75)])
            .with("blob", FieldValue::Bytes(vec![0, 1, 254, 255]))
            .with("legacy_stamp", Time::new(7, 9))
    }

    #[test]
    fn test_round_trip_nested_and_arrays() {
        let registry = registry();
        let original = waypoints();
        let tree = Value::Object(encode(&original));
        let decoded = decode(&registry, "test_msgs/Waypoints", &tree).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_encode_shapes() {
        let tree = encode(&waypoints());
        assert_eq!(tree["header"]["stamp"], json!({"sec": 100, "nanosec": 5}));
        assert_eq!(tree["blob"], json!("AAH+/w=="));
        assert_eq!(tree["poses"][1]["position"]["x"], json!(4.0));
        assert_eq!(tree["weights"], json!([0.25, 0.75]));
    }

    #[test]
    fn test_encode_collapses_time_like_messages() {
        let ros1 = Message::new("std_msgs/msg/Header").with(
            "stamp",
            Message::new("rospy/Time")
                .with("secs", 3i64)
                .with("nsecs", 1_500_000_000i64),
        );
        let ros2 = Message::new("std_msgs/msg/Header").with(
            "stamp",
            Message::new("builtin_interfaces/msg/Time")
                .with("sec", 4i64)
                .with("nanosec", 500_000_000u64),
        );
        assert_eq!(encode(&ros1)["stamp"], encode(&ros2)["stamp"]);
    }

    #[test]
    fn test_encode_non_finite_float_is_null() {
        let msg = Message::new("std_msgs/msg/Float64").with("data", f64::NAN);
        assert_eq!(encode(&msg)["data"], Value::Null);
    }

    #[test]
    fn test_decode_accepts_both_time_conventions() {
        let registry = registry();
        let a = decode(
            &registry,
            "test_msgs/msg/Waypoints",
            &json!({"legacy_stamp": {"secs": 7, "nsecs": 9}}),
        )
        .unwrap();
        let b = decode(
            &registry,
            "test_msgs/msg/Waypoints",
            &json!({"legacy_stamp": {"sec": 7, "nanosec": 9}}),
        )
        .unwrap();
        assert_eq!(a.get("legacy_stamp"), Some(&FieldValue::Time(Time::new(7, 9))));
        assert_eq!(a, b);
    }

    #[test]
    fn test_decode_drops_malformed_and_unknown_fields() {
        let registry = registry();
        let decoded = decode(
            &registry,
            "test_msgs/msg/Waypoints",
            &json!({"count": "many", "speed": 2.0, "bogus": 1, "active": 3}),
        )
        .unwrap();
        assert_eq!(decoded.get("count"), Some(&FieldValue::UInt(0)));
        assert_eq!(decoded.get("speed"), Some(&FieldValue::Float(2.0)));
        assert_eq!(decoded.get("active"), Some(&FieldValue::Bool(false)));
        assert!(decoded.get("bogus").is_none());
    }

    #[test]
    fn test_decode_out_of_range_integer_is_dropped() {
        let registry = registry();
        let big: u64 = 1 << 40;
        let decoded = decode(&registry, "std_msgs/Int32", &json!({ "data": big })).unwrap();
        assert_eq!(decoded.get("data"), Some(&FieldValue::Int(0)));
    }

    #[test]
    fn test_decode_unknown_element_type_passes_raw() {
        let mut registry = SchemaRegistry::new();
        registry
            .define(
                "test_msgs/msg/Loose",
                &[("items", "[]"), ("others", "missing_msgs/Thing[]")],
            )
            .unwrap();
        let tree = json!({"items": [1, "two", {"three": 3}], "others": [{"a": 1}]});
        let decoded = decode(&registry, "test_msgs/Loose", &tree).unwrap();
        assert_eq!(decoded.get("items"), Some(&FieldValue::Raw(tree["items"].clone())));
        assert_eq!(decoded.get("others"), Some(&FieldValue::Raw(tree["others"].clone())));
    }

    #[test]
    fn test_decode_unknown_type_fails() {
        let registry = registry();
        let result = decode(&registry, "custom/msg/Nope", &json!({}));
        assert!(matches!(result, Err(CodecError::UnknownType(_))));
        let result = decode(&registry, "std_msgs/String", &json!([1, 2]));
        assert!(matches!(result, Err(CodecError::NotAnObject(_))));
    }

    #[test]
    fn test_stamp_header_with_timestamp_field() {
        let registry = registry();
        let schema = registry.resolve("geometry_msgs/msg/PoseStamped").unwrap();
        let mut msg = decode(&registry, "geometry_msgs/msg/PoseStamped", &json!({})).unwrap();
        let now = Time::new(1_700_000_000, 42);
        assert!(stamp_header(&registry, &schema, &mut msg, now));
        let Some(FieldValue::Message(header)) = msg.get("header") else {
            panic!("header missing");
        };
        assert_eq!(header.get("stamp"), Some(&FieldValue::Time(now)));
    }

    #[test]
    fn test_stamp_header_with_nested_legacy_stamp() {
        let mut registry = SchemaRegistry::new();
        registry
            .define("legacy_msgs/msg/Stamp", &[("secs", "int32"), ("nsecs", "int32")])
            .unwrap();
        registry
            .define(
                "legacy_msgs/msg/Header",
                &[("stamp", "legacy_msgs/Stamp"), ("frame_id", "string")],
            )
            .unwrap();
        registry
            .define("legacy_msgs/msg/Ping", &[("header", "legacy_msgs/Header")])
            .unwrap();

        let schema = registry.resolve("legacy_msgs/msg/Ping").unwrap();
        let mut msg = default_message(&registry, &schema);
        assert!(stamp_header(&registry, &schema, &mut msg, Time::new(9, 8)));

        let tree = encode(&msg);
        assert_eq!(tree["header"]["stamp"], json!({"sec": 9, "nanosec": 8}));

        let Some(FieldValue::Message(header)) = msg.get("header") else {
            panic!("header missing");
        };
        let Some(FieldValue::Message(stamp)) = header.get("stamp") else {
            panic!("stamp missing");
        };
        assert_eq!(stamp.get("secs"), Some(&FieldValue::Int(9)));
        assert_eq!(stamp.get("nsecs"), Some(&FieldValue::Int(8)));
    }

    #[test]
    fn test_round_trip_legacy_signed_stamp() {
        let mut registry = SchemaRegistry::new();
        registry
            .define("legacy_msgs/msg/Stamp", &[("secs", "int32"), ("nsecs", "int32")])
            .unwrap();
        registry
            .define(
                "legacy_msgs/msg/Ping",
                &[("stamp", "legacy_msgs/Stamp"), ("n", "int32")],
            )
            .unwrap();

        let original = Message::new("legacy_msgs/msg/Ping")
            .with(
                "stamp",
                Message::new("legacy_msgs/msg/Stamp")
                    .with("secs", 3i64)
                    .with("nsecs", 7i64),
            )
            .with("n", 1i64);
        let tree = Value::Object(encode(&original));
        let decoded = decode(&registry, "legacy_msgs/Ping", &tree).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_stamp_header_without_header() {
        let registry = registry();
        let schema = registry.resolve("std_msgs/msg/String").unwrap();
        let mut msg = default_message(&registry, &schema);
        assert!(!stamp_header(&registry, &schema, &mut msg, Time::now()));
    }
}
