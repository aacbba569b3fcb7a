//! JSON-schema projection of message descriptors.
//!
//! Each message becomes a small JSON-Schema-like document: `title` is the
//! simple message name, `properties` maps field names to a coarse JSON
//! type, and message-typed fields carry a `$ref` to the referenced
//! message's fully-qualified name. Repeated fields project as their
//! element type; the `required` set is always empty. These are UI hints,
//! not validators.

use std::collections::{BTreeMap, HashSet};

use prost_reflect::{FieldDescriptor, Kind, MessageDescriptor};
use serde_json::{Map, Value, json};

/// Depth-first, cycle-safe collection of a message's schema plus the
/// schemas of every message reachable through its fields or nested types.
pub(crate) fn collect_message_schemas(
    msg: &MessageDescriptor,
    schemas: &mut BTreeMap<String, String>,
    seen: &mut HashSet<String>,
) {
    let name = msg.full_name().to_string();
    if !seen.insert(name.clone()) {
        return;
    }

    schemas.insert(name, render(msg));

    for field in msg.fields() {
        if let Kind::Message(inner) = field.kind() {
            collect_message_schemas(&inner, schemas, seen);
        }
    }
    for nested in msg.child_messages() {
        collect_message_schemas(&nested, schemas, seen);
    }
}

fn render(msg: &MessageDescriptor) -> String {
    let mut properties = Map::new();
    for field in msg.fields() {
        properties.insert(field.name().to_string(), field_schema(&field));
    }

    let schema = json!({
        "type": "object",
        "title": msg.name(),
        "properties": properties,
        "required": [],
    });

    serde_json::to_string_pretty(&schema).expect("valid JSON value")
}

fn field_schema(field: &FieldDescriptor) -> Value {
    let mut prop = Map::new();
    prop.insert(
        "type".to_string(),
        Value::String(json_type(field).to_string()),
    );
    if let Kind::Message(inner) = field.kind() {
        prop.insert(
            "$ref".to_string(),
            Value::String(format!("#/definitions/{}", inner.full_name())),
        );
    }
    Value::Object(prop)
}

/// Maps a protobuf field kind to a coarse JSON type.
fn json_type(field: &FieldDescriptor) -> &'static str {
    match field.kind() {
        Kind::Double | Kind::Float => "number",
        Kind::Int32
        | Kind::Int64
        | Kind::Uint32
        | Kind::Uint64
        | Kind::Sint32
        | Kind::Sint64
        | Kind::Fixed32
        | Kind::Fixed64
        | Kind::Sfixed32
        | Kind::Sfixed64 => "integer",
        Kind::Bool => "boolean",
        // Bytes are base64-encoded strings in JSON; enums render by name.
        Kind::String | Kind::Bytes | Kind::Enum(_) => "string",
        Kind::Message(_) => "object",
    }
}
