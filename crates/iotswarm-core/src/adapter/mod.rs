//! Pure row-to-envelope transforms. No adapter performs I/O.

mod cr1000x;
mod passthrough;

pub use cr1000x::Cr1000X;
pub use passthrough::Passthrough;

use crate::config::{Row, Value};
use crate::error::AdapterError;
use indexmap::IndexMap;

/// What a `PayloadAdapter` accepts: a single row, a homogeneous batch of rows, or
/// positional values that get `_0`, `_1`, ... keys synthesized.
#[derive(Debug, Clone)]
pub enum AdapterInput {
    Row(Row),
    Rows(Vec<Row>),
    Scalar(Value),
    Positional(Vec<Value>),
}

impl From<Row> for AdapterInput {
    fn from(row: Row) -> Self {
        AdapterInput::Row(row)
    }
}

impl From<Vec<Row>> for AdapterInput {
    fn from(rows: Vec<Row>) -> Self {
        AdapterInput::Rows(rows)
    }
}

pub trait PayloadAdapter: Send + Sync {
    /// Transforms `input` into a serialized payload, using `device_id` for any
    /// identity fields the envelope format requires.
    fn adapt(&self, input: AdapterInput, device_id: &str) -> Result<Vec<u8>, AdapterError>;
}

/// Normalizes any `AdapterInput` into a non-empty `Vec<Row>` with every row sharing
/// the same key set, synthesizing `_0`, `_1`, ... keys for positional input.
fn normalize_rows(input: AdapterInput) -> Result<Vec<Row>, AdapterError> {
    let rows = match input {
        AdapterInput::Row(row) => vec![row],
        AdapterInput::Rows(rows) => rows,
        AdapterInput::Scalar(value) => vec![positional_row([value])],
        AdapterInput::Positional(values) => vec![positional_row(values)],
    };

    if rows.is_empty() {
        return Err(AdapterError::EmptyBatch);
    }

    let first_keys: Vec<&String> = rows[0].keys().collect();
    for row in &rows[1..] {
        let keys: Vec<&String> = row.keys().collect();
        if keys != first_keys {
            return Err(AdapterError::UnequalRowShape);
        }
    }

    Ok(rows)
}

fn positional_row(values: impl IntoIterator<Item = Value>) -> Row {
    let mut row: Row = IndexMap::new();
    for (i, value) in values.into_iter().enumerate() {
        row.insert(format!("_{i}"), value);
    }
    row
}
