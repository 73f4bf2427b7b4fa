//! Conversion between typed variables/results and the `Struct` wire representation.

use std::any::type_name;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::data_connect::error::{
    decode_error, encode_error, invalid_argument, DataConnectResult,
};

/// Wire-level structured value: a JSON object.
pub type Struct = Map<String, Value>;

/// Encodes operation variables into a `Struct`.
///
/// Unit-like values (`()`, `None`) encode to an empty struct.
pub fn encode_variables<T>(variables: &T) -> DataConnectResult<Struct>
where
    T: Serialize + ?Sized,
{
    let value = serde_json::to_value(variables).map_err(|err| {
        encode_error(format!(
            "unable to encode variables of type {}: {err}",
            type_name::<T>()
        ))
    })?;
    match value {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        other => Err(invalid_argument(format!(
            "variables of type {} must encode to a struct, not {}",
            type_name::<T>(),
            value_kind(&other)
        ))),
    }
}

/// Decodes the `data` payload of an operation response into `T`.
pub fn decode_data<T>(data: Value) -> DataConnectResult<T>
where
    T: DeserializeOwned,
{
    serde_json::from_value(data).map_err(|err| {
        decode_error(format!(
            "unable to decode response data into {}: {err}",
            type_name::<T>()
        ))
    })
}

/// Deterministic encoding of a struct with object keys sorted at every level.
pub fn canonical_bytes(value: &Struct) -> Vec<u8> {
    let mut out = String::new();
    write_object(value, &mut out);
    out.into_bytes()
}

fn write_object(map: &Struct, out: &mut String) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    out.push('{');
    for (index, key) in keys.into_iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_value(&map[key], out);
    }
    out.push('}');
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_object(map, out),
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a struct",
    }
}
