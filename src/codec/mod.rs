//! Message Codec
//!
//! Schema-driven conversion between structured messages and plain JSON trees.
//!
//! ## Components
//!
//! - **Schema**: field descriptors keyed by type identifier ([`SchemaRegistry`])
//! - **Value**: structured message values ([`Message`], [`FieldValue`])
//! - **Convert**: recursive [`encode`] / [`decode`]

mod convert;
mod schema;
mod value;

pub use convert::{decode, decode_time, default_message, encode, encode_value, stamp_header};
pub use schema::{
    normalize_type_id, ElementKind, FieldDescriptor, FieldKind, PrimitiveType, Schema,
    SchemaRegistry, SchemaResolver, TimeConvention,
};
pub use value::{FieldValue, Message, Time};

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the codec
#[derive(Error, Debug)]
pub enum CodecError {
    /// No schema registered for the type
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// Field type string could not be parsed
    #[error("Invalid field type: '{0}'")]
    InvalidFieldType(String),

    /// Top-level input to decode was not an object
    #[error("Expected an object for message type {0}")]
    NotAnObject(String),

    /// Schema file could not be read or parsed
    #[error("Failed to load schema file {path:?}: {error}")]
    SchemaFile { path: PathBuf, error: String },

    /// Malformed schema JSON
    #[error("Schema JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
