use super::{AdapterInput, PayloadAdapter};
use crate::config::{Row, Value};
use crate::error::AdapterError;
use serde_json::Map;

/// Serializes the row(s) as-is, without any Campbell-Scientific enveloping.
/// Used for brokers or tests that just want the raw sensor reading as JSON.
#[derive(Debug, Default, Clone)]
pub struct Passthrough;

impl Passthrough {
    pub fn new() -> Self {
        Self
    }
}

impl PayloadAdapter for Passthrough {
    fn adapt(&self, input: AdapterInput, _device_id: &str) -> Result<Vec<u8>, AdapterError> {
        let json = match input {
            AdapterInput::Row(row) => row_to_json(&row),
            AdapterInput::Rows(rows) => serde_json::Value::Array(rows.iter().map(row_to_json).collect()),
            AdapterInput::Scalar(value) => value_to_json(&value),
            AdapterInput::Positional(values) => {
                serde_json::Value::Array(values.iter().map(value_to_json).collect())
            }
        };
        Ok(serde_json::to_vec(&json)?)
    }
}

fn row_to_json(row: &Row) -> serde_json::Value {
    let mut map = Map::with_capacity(row.len());
    for (key, value) in row {
        map.insert(key.clone(), value_to_json(value));
    }
    serde_json::Value::Object(map)
}

fn value_to_json(value: &Value) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}
