//! Schema Registry
//!
//! Static descriptions of structured message types. Each field carries a
//! [`FieldKind`] that drives the recursive encoder and decoder, so no runtime
//! introspection of message values is needed.
//!
//! Field types are written the way message definitions spell them:
//! `float64`, `string`, `time`, `geometry_msgs/Vector3`, `float32[]`,
//! `geometry_msgs/msg/Pose[]`.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::value::FieldValue;
use super::CodecError;

/// Primitive field types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Bool,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    String,
    /// Byte arrays (`uint8[]`, `byte[]`, `char[]`) travel as one blob
    Bytes,
}

impl PrimitiveType {
    /// Parse a primitive type name, returning None for composite types
    pub fn parse(name: &str) -> Option<Self> {
        let p = match name {
            "bool" => PrimitiveType::Bool,
            "int8" => PrimitiveType::Int8,
            "uint8" | "byte" | "char" => PrimitiveType::UInt8,
            "int16" => PrimitiveType::Int16,
            "uint16" => PrimitiveType::UInt16,
            "int32" => PrimitiveType::Int32,
            "uint32" => PrimitiveType::UInt32,
            "int64" => PrimitiveType::Int64,
            "uint64" => PrimitiveType::UInt64,
            "float32" => PrimitiveType::Float32,
            "float64" => PrimitiveType::Float64,
            "string" | "wstring" => PrimitiveType::String,
            _ => return None,
        };
        Some(p)
    }

    /// Zero value a freshly constructed message carries for this type
    pub fn default_value(&self) -> FieldValue {
        match self {
            PrimitiveType::Bool => FieldValue::Bool(false),
            PrimitiveType::Int8
            | PrimitiveType::Int16
            | PrimitiveType::Int32
            | PrimitiveType::Int64 => FieldValue::Int(0),
            PrimitiveType::UInt8
            | PrimitiveType::UInt16
            | PrimitiveType::UInt32
            | PrimitiveType::UInt64 => FieldValue::UInt(0),
            PrimitiveType::Float32 | PrimitiveType::Float64 => FieldValue::Float(0.0),
            PrimitiveType::String => FieldValue::String(String::new()),
            PrimitiveType::Bytes => FieldValue::Bytes(Vec::new()),
        }
    }
}

/// Naming convention of a timestamp's two sub-fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeConvention {
    /// `sec` / `nanosec`
    SecNanosec,
    /// `secs` / `nsecs`
    SecsNsecs,
}

impl TimeConvention {
    pub fn field_names(&self) -> (&'static str, &'static str) {
        match self {
            TimeConvention::SecNanosec => ("sec", "nanosec"),
            TimeConvention::SecsNsecs => ("secs", "nsecs"),
        }
    }
}

/// Element type of an array field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Primitive(PrimitiveType),
    Nested(String),
    /// Element type could not be determined; values pass through untouched
    Unknown,
}

/// Kind of a message field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Primitive(PrimitiveType),
    Timestamp(TimeConvention),
    Nested(String),
    Array(ElementKind),
}

impl FieldKind {
    /// Parse a field type string such as `float64`, `time` or `pkg/Type[]`
    pub fn parse(type_str: &str) -> Result<Self, CodecError> {
        let type_str = type_str.trim();
        if type_str.is_empty() {
            return Err(CodecError::InvalidFieldType(type_str.to_string()));
        }

        if let Some(open) = type_str.find('[') {
            if !type_str.ends_with(']') {
                return Err(CodecError::InvalidFieldType(type_str.to_string()));
            }
            let base = &type_str[..open];
            let element = match base {
                "uint8" | "byte" | "char" => {
                    return Ok(FieldKind::Primitive(PrimitiveType::Bytes));
                }
                "" | "?" => ElementKind::Unknown,
                _ => match PrimitiveType::parse(base) {
                    Some(p) => ElementKind::Primitive(p),
                    None => match Self::parse(base)? {
                        FieldKind::Timestamp(_) => {
                            ElementKind::Nested("builtin_interfaces/msg/Time".to_string())
                        }
                        FieldKind::Nested(t) => ElementKind::Nested(t),
                        _ => ElementKind::Unknown,
                    },
                },
            };
            return Ok(FieldKind::Array(element));
        }

        if let Some(p) = PrimitiveType::parse(type_str) {
            return Ok(FieldKind::Primitive(p));
        }

        let kind = match type_str {
            "time" | "duration" => FieldKind::Timestamp(TimeConvention::SecsNsecs),
            "builtin_interfaces/Time"
            | "builtin_interfaces/msg/Time"
            | "builtin_interfaces/Duration"
            | "builtin_interfaces/msg/Duration" => {
                FieldKind::Timestamp(TimeConvention::SecNanosec)
            }
            "Header" => FieldKind::Nested("std_msgs/msg/Header".to_string()),
            other => FieldKind::Nested(normalize_type_id(other)),
        };
        Ok(kind)
    }
}

/// Normalize `pkg/Type` to `pkg/msg/Type`; other forms are returned unchanged
pub fn normalize_type_id(type_id: &str) -> String {
    let type_id = type_id.trim();
    let mut parts = type_id.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(pkg), Some(name), None) if !pkg.is_empty() && !name.is_empty() => {
            format!("{}/msg/{}", pkg, name)
        }
        _ => type_id.to_string(),
    }
}

/// A single field of a message schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
}

/// Description of a structured message type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub type_id: String,
    pub fields: Vec<FieldDescriptor>,
}

impl Schema {
    pub fn new(type_id: impl Into<String>) -> Self {
        Self {
            type_id: normalize_type_id(&type_id.into()),
            fields: Vec::new(),
        }
    }

    /// Builder-style field declaration from a type string
    pub fn field(mut self, name: &str, type_str: &str) -> Result<Self, CodecError> {
        let kind = FieldKind::parse(type_str)?;
        self.fields.push(FieldDescriptor {
            name: name.to_string(),
            kind,
        });
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Timestamp convention if this schema is shaped like a bare timestamp
    pub fn time_convention(&self) -> Option<TimeConvention> {
        if self.fields.len() != 2 {
            return None;
        }
        [TimeConvention::SecNanosec, TimeConvention::SecsNsecs]
            .into_iter()
            .find(|conv| {
                let (s, ns) = conv.field_names();
                self.get(s).is_some() && self.get(ns).is_some()
            })
    }
}

/// Anything that can map a type identifier to its schema
pub trait SchemaResolver {
    fn resolve(&self, type_id: &str) -> Option<Arc<Schema>>;
}

/// Type identifier → schema table
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<Schema>>,
}

/// On-disk schema definition
#[derive(Debug, Deserialize)]
struct SchemaDef {
    #[serde(rename = "type")]
    type_id: String,
    fields: Vec<FieldDef>,
}

#[derive(Debug, Deserialize)]
struct FieldDef {
    name: String,
    #[serde(rename = "type")]
    type_str: String,
}

const COMMON_TYPES: &[(&str, &[(&str, &str)])] = &[
    ("builtin_interfaces/msg/Time", &[("sec", "int32"), ("nanosec", "uint32")]),
    (
        "std_msgs/msg/Header",
        &[("stamp", "builtin_interfaces/msg/Time"), ("frame_id", "string")],
    ),
    ("std_msgs/msg/String", &[("data", "string")]),
    ("std_msgs/msg/Bool", &[("data", "bool")]),
    ("std_msgs/msg/Int32", &[("data", "int32")]),
    ("std_msgs/msg/Float64", &[("data", "float64")]),
    (
        "geometry_msgs/msg/Vector3",
        &[("x", "float64"), ("y", "float64"), ("z", "float64")],
    ),
    (
        "geometry_msgs/msg/Point",
        &[("x", "float64"), ("y", "float64"), ("z", "float64")],
    ),
    (
        "geometry_msgs/msg/Quaternion",
        &[("x", "float64"), ("y", "float64"), ("z", "float64"), ("w", "float64")],
    ),
    (
        "geometry_msgs/msg/Pose",
        &[("position", "geometry_msgs/Point"), ("orientation", "geometry_msgs/Quaternion")],
    ),
    (
        "geometry_msgs/msg/PoseStamped",
        &[("header", "std_msgs/Header"), ("pose", "geometry_msgs/Pose")],
    ),
    (
        "geometry_msgs/msg/Twist",
        &[("linear", "geometry_msgs/Vector3"), ("angular", "geometry_msgs/Vector3")],
    ),
    (
        "sensor_msgs/msg/Imu",
        &[
            ("header", "std_msgs/Header"),
            ("orientation", "geometry_msgs/Quaternion"),
            ("orientation_covariance", "float64[9]"),
            ("angular_velocity", "geometry_msgs/Vector3"),
            ("angular_velocity_covariance", "float64[9]"),
            ("linear_acceleration", "geometry_msgs/Vector3"),
            ("linear_acceleration_covariance", "float64[9]"),
        ],
    ),
    (
        "sensor_msgs/msg/LaserScan",
        &[
            ("header", "std_msgs/Header"),
            ("angle_min", "float32"),
            ("angle_max", "float32"),
            ("angle_increment", "float32"),
            ("time_increment", "float32"),
            ("scan_time", "float32"),
            ("range_min", "float32"),
            ("range_max", "float32"),
            ("ranges", "float32[]"),
            ("intensities", "float32[]"),
        ],
    ),
];

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with common message types
    pub fn with_common_types() -> Self {
        let mut registry = Self::new();
        for (type_id, fields) in COMMON_TYPES {
            if let Err(e) = registry.define(type_id, fields) {
                tracing::error!(type_id = %type_id, error = %e, "Invalid built-in schema");
            }
        }
        registry
    }

    pub fn register(&mut self, schema: Schema) {
        self.schemas.insert(schema.type_id.clone(), Arc::new(schema));
    }

    /// Register a schema from `(name, type)` pairs
    pub fn define(&mut self, type_id: &str, fields: &[(&str, &str)]) -> Result<(), CodecError> {
        let mut schema = Schema::new(type_id);
        for (name, type_str) in fields {
            schema = schema.field(name, type_str)?;
        }
        self.register(schema);
        Ok(())
    }

    /// Load definitions from a JSON document holding one schema or a list
    pub fn load_json(&mut self, json: &str) -> Result<usize, CodecError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let defs: Vec<SchemaDef> = if value.is_array() {
            serde_json::from_value(value)?
        } else {
            vec![serde_json::from_value(value)?]
        };

        let count = defs.len();
        for def in defs {
            let mut schema = Schema::new(def.type_id);
            for field in def.fields {
                schema = schema.field(&field.name, &field.type_str)?;
            }
            self.register(schema);
        }
        Ok(count)
    }

    /// Load definitions from a JSON file
    pub fn load_file(&mut self, path: &Path) -> Result<usize, CodecError> {
        let content = std::fs::read_to_string(path).map_err(|e| CodecError::SchemaFile {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        self.load_json(&content).map_err(|e| CodecError::SchemaFile {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.schemas.contains_key(&normalize_type_id(type_id))
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

impl SchemaResolver for SchemaRegistry {
    fn resolve(&self, type_id: &str) -> Option<Arc<Schema>> {
        self.schemas.get(&normalize_type_id(type_id)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_normalize_type_id() {
        assert_eq!(normalize_type_id("std_msgs/String"), "std_msgs/msg/String");
        assert_eq!(normalize_type_id("std_msgs/msg/String"), "std_msgs/msg/String");
        assert_eq!(normalize_type_id("Header"), "Header");
    }

    #[test]
    fn test_parse_field_kinds() {
        assert_eq!(
            FieldKind::parse("float64").unwrap(),
            FieldKind::Primitive(PrimitiveType::Float64)
        );
        assert_eq!(
            FieldKind::parse("time").unwrap(),
            FieldKind::Timestamp(TimeConvention::SecsNsecs)
        );
        assert_eq!(
            FieldKind::parse("builtin_interfaces/msg/Time").unwrap(),
            FieldKind::Timestamp(TimeConvention::SecNanosec)
        );
        assert_eq!(
            FieldKind::parse("geometry_msgs/Pose").unwrap(),
            FieldKind::Nested("geometry_msgs/msg/Pose".into())
        );
        assert_eq!(
            FieldKind::parse("float32[]").unwrap(),
            FieldKind::Array(ElementKind::Primitive(PrimitiveType::Float32))
        );
        assert_eq!(
            FieldKind::parse("float64[9]").unwrap(),
            FieldKind::Array(ElementKind::Primitive(PrimitiveType::Float64))
        );
        assert_eq!(
            FieldKind::parse("geometry_msgs/msg/Pose[]").unwrap(),
            FieldKind::Array(ElementKind::Nested("geometry_msgs/msg/Pose".into()))
        );
        assert_eq!(
            FieldKind::parse("uint8[]").unwrap(),
            FieldKind::Primitive(PrimitiveType::Bytes)
        );
        assert_eq!(FieldKind::parse("[]").unwrap(), FieldKind::Array(ElementKind::Unknown));
        assert!(FieldKind::parse("").is_err());
        assert!(FieldKind::parse("float32[").is_err());
    }

    #[test]
    fn test_common_types_resolve() {
        let registry = SchemaRegistry::with_common_types();
        let imu = registry.resolve("sensor_msgs/Imu").unwrap();
        assert_eq!(imu.type_id, "sensor_msgs/msg/Imu");
        assert_eq!(
            imu.get("header").unwrap().kind,
            FieldKind::Nested("std_msgs/msg/Header".into())
        );
        assert!(registry.resolve("custom_msgs/msg/Unknown").is_none());
    }

    #[test]
    fn test_time_convention_detection() {
        let registry = SchemaRegistry::with_common_types();
        let time = registry.resolve("builtin_interfaces/msg/Time").unwrap();
        assert_eq!(time.time_convention(), Some(TimeConvention::SecNanosec));
        let header = registry.resolve("std_msgs/msg/Header").unwrap();
        assert_eq!(header.time_convention(), None);
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"type": "custom_msgs/Battery", "fields": [
                {{"name": "voltage", "type": "float32"}},
                {{"name": "cells", "type": "float32[]"}},
                {{"name": "stamp", "type": "time"}}
            ]}}]"#
        )
        .unwrap();

        let mut registry = SchemaRegistry::new();
        let loaded = registry.load_file(file.path()).unwrap();
        assert_eq!(loaded, 1);
        let schema = registry.resolve("custom_msgs/msg/Battery").unwrap();
        assert_eq!(schema.fields.len(), 3);
    }

    #[test]
    fn test_load_file_rejects_bad_field_type() {
        let mut registry = SchemaRegistry::new();
        let result = registry.load_json(r#"{"type": "a/B", "fields": [{"name": "x", "type": ""}]}"#);
        assert!(matches!(result, Err(CodecError::InvalidFieldType(_))));
    }
}
