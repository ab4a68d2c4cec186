use super::{normalize_rows, AdapterInput, PayloadAdapter};
use crate::config::{Row, Value};
use crate::error::AdapterError;
use chrono::Utc;
use serde::Serialize;

const DEFAULT_TABLE_NAME: &str = "default";
const DEFAULT_OS_VERSION: &str = "CR1000X.Std.07.02";

/// Shapes a row (or batch of rows) into the Campbell-Scientific "CR1000X" datalogger
/// JSON envelope, with auto-inferred XML-schema field types.
#[derive(Debug, Clone, Default)]
pub struct Cr1000X {
    pub table_name: Option<String>,
    pub os_version: Option<String>,
    pub prog_name: Option<String>,
}

impl Cr1000X {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PayloadAdapter for Cr1000X {
    fn adapt(&self, input: AdapterInput, device_id: &str) -> Result<Vec<u8>, AdapterError> {
        let rows = normalize_rows(input)?;

        let mut times = Vec::with_capacity(rows.len());
        let mut data_rows = Vec::with_capacity(rows.len());
        for mut row in rows {
            let time = extract_time(&mut row);
            times.push(time);
            data_rows.push(row);
        }

        let columns: Vec<String> = data_rows[0].keys().cloned().collect();
        for row in &data_rows[1..] {
            let keys: Vec<&String> = row.keys().collect();
            if keys != columns.iter().collect::<Vec<_>>() {
                return Err(AdapterError::UnequalRowShape);
            }
        }

        let fields: Vec<FieldDescriptor> = columns
            .iter()
            .map(|column| {
                let values: Vec<&Value> = data_rows
                    .iter()
                    .map(|row| row.get(column).unwrap_or(&Value::Null))
                    .collect();
                FieldDescriptor {
                    name: column.clone(),
                    r#type: infer_xsd_type(&values).to_string(),
                    units: String::new(),
                    process: infer_process(column).to_string(),
                    settable: false,
                }
            })
            .collect();

        let data: Vec<DataRow> = data_rows
            .iter()
            .zip(times.into_iter())
            .map(|(row, time)| DataRow {
                time,
                vals: columns
                    .iter()
                    .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                    .collect(),
            })
            .collect();

        let envelope = Envelope {
            head: Head {
                transaction: 0,
                signature: 111_111,
                environment: Environment {
                    station_name: device_id.to_string(),
                    table_name: self
                        .table_name
                        .clone()
                        .unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string()),
                    model: "CR1000X".to_string(),
                    serial_no: serial_number(device_id),
                    os_version: self
                        .os_version
                        .clone()
                        .unwrap_or_else(|| DEFAULT_OS_VERSION.to_string()),
                    prog_name: self.prog_name.clone().unwrap_or_else(default_prog_name),
                },
                fields,
            },
            data,
        };

        Ok(serde_json::to_vec(&envelope)?)
    }
}

fn default_prog_name() -> String {
    format!("CPU:iotswarm-{}.CR1X", env!("CARGO_PKG_VERSION"))
}

/// Removes a case-insensitive `DATE_TIME` column from `row` and formats its value as
/// the envelope's per-row `time`, falling back to wall-clock ISO-8601 microseconds.
fn extract_time(row: &mut Row) -> String {
    let key = row
        .keys()
        .find(|k| k.eq_ignore_ascii_case("date_time"))
        .cloned();
    let value = key.and_then(|k| row.shift_remove(&k));
    match value {
        Some(Value::String(s)) => s,
        Some(Value::Timestamp(dt)) => dt.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        _ => Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
    }
}

/// Dash-joined decimal Unicode code points of `device_id`'s characters, e.g.
/// `"ALIC1"` -> `"65-76-73-67-49"`. Injective over any string, since distinct
/// strings differ in at least one code point or in length.
fn serial_number(device_id: &str) -> String {
    device_id
        .chars()
        .map(|c| (c as u32).to_string())
        .collect::<Vec<_>>()
        .join("-")
}

/// Case-insensitive trailing-token process inference.
fn infer_process(column: &str) -> &'static str {
    let lower = column.to_ascii_lowercase();
    const SUFFIXES: &[(&str, &str)] = &[
        ("_std", "Std"),
        ("_avg", "Avg"),
        ("_max", "Max"),
        ("_min", "Min"),
        ("_mom", "Mom"),
        ("_tot", "Tot"),
        ("_cov", "Cov"),
    ];
    for (suffix, label) in SUFFIXES {
        if lower.ends_with(suffix) {
            return label;
        }
    }
    "Smp"
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Rank {
    Null,
    String,
    Boolean,
    DateTime,
    Short,
    Int,
    Long,
    Integer,
    Float,
    Double,
}

impl Rank {
    fn xsd_name(self) -> &'static str {
        match self {
            Rank::Null => "xsd:string",
            Rank::String => "xsd:string",
            Rank::Boolean => "xsd:boolean",
            Rank::DateTime => "xsd:dateTime",
            Rank::Short => "xsd:short",
            Rank::Int => "xsd:int",
            Rank::Long => "xsd:long",
            Rank::Integer => "xsd:integer",
            Rank::Float => "xsd:float",
            Rank::Double => "xsd:double",
        }
    }
}

/// Rank-based XML-schema type inference across a column's values (canonical order:
/// null < string < boolean < dateTime < short < int < long < integer < float <
/// double). The column's type is simply the highest rank observed across every
/// value - a plain string does not short-circuit the column to `xsd:string`, it
/// just contributes its own (low) rank to the max, the same as every other value.
fn infer_xsd_type(values: &[&Value]) -> &'static str {
    let mut max_rank: Option<Rank> = None;
    for value in values {
        let rank = classify(value);
        max_rank = Some(max_rank.map_or(rank, |current| current.max(rank)));
    }
    max_rank.unwrap_or(Rank::Null).xsd_name()
}

/// Classifies a single value by rank.
fn classify(value: &Value) -> Rank {
    match value {
        Value::Null => Rank::Null,
        Value::Bool(_) => Rank::Boolean,
        Value::Timestamp(_) => Rank::DateTime,
        Value::Int(i) => classify_integer_magnitude(*i as i128),
        Value::Float(f) => classify_float(*f),
        Value::String(s) => {
            if looks_like_iso8601(s) {
                Rank::DateTime
            } else {
                Rank::String
            }
        }
    }
}

fn classify_integer_magnitude(i: i128) -> Rank {
    let abs = i.unsigned_abs();
    if abs <= 32_767 {
        Rank::Short
    } else if abs <= 2_147_483_647 {
        Rank::Int
    } else if abs <= 9_223_372_036_854_775_807 {
        Rank::Long
    } else {
        Rank::Integer
    }
}

fn classify_float(f: f64) -> Rank {
    if f.fract() == 0.0 {
        return classify_integer_magnitude(f as i128);
    }
    if within_f32_normal_range(f) {
        Rank::Float
    } else {
        Rank::Double
    }
}

fn within_f32_normal_range(f: f64) -> bool {
    let abs = f.abs();
    abs == 0.0 || (abs >= f32::MIN_POSITIVE as f64 && abs <= f32::MAX as f64)
}

fn looks_like_iso8601(s: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(s).is_ok()
        || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
}

#[derive(Debug, Serialize)]
struct Envelope {
    head: Head,
    data: Vec<DataRow>,
}

#[derive(Debug, Serialize)]
struct Head {
    transaction: u32,
    signature: u32,
    environment: Environment,
    fields: Vec<FieldDescriptor>,
}

#[derive(Debug, Serialize)]
struct Environment {
    station_name: String,
    table_name: String,
    model: String,
    serial_no: String,
    os_version: String,
    prog_name: String,
}

#[derive(Debug, Serialize)]
struct FieldDescriptor {
    name: String,
    #[serde(rename = "type")]
    r#type: String,
    units: String,
    process: String,
    settable: bool,
}

#[derive(Debug, Serialize)]
struct DataRow {
    time: String,
    vals: Vec<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn row(pairs: &[(&str, Value)]) -> Row {
        let mut row: Row = IndexMap::new();
        for (k, v) in pairs {
            row.insert((*k).to_string(), v.clone());
        }
        row
    }

    #[test]
    fn serial_number_is_dash_joined_code_points() {
        assert_eq!(serial_number("ALIC1"), "65-76-73-67-49");
        assert_eq!(serial_number("MORLY"), "77-79-82-76-89");
    }

    #[test]
    fn serial_number_is_injective_over_distinct_ascii_ids() {
        assert_ne!(serial_number("ALIC1"), serial_number("MORLY"));
        assert_ne!(serial_number("A"), serial_number("B"));
    }

    #[test]
    fn mixed_numeric_column_infers_float() {
        let values = vec![Value::Int(1), Value::Float(2.5)];
        let refs: Vec<&Value> = values.iter().collect();
        assert_eq!(infer_xsd_type(&refs), "xsd:float");
    }

    #[test]
    fn mixed_int_and_text_infers_int() {
        // A plain string contributes its own (low) rank to the column's max, it
        // does not short-circuit the whole column to xsd:string.
        let values = vec![Value::Int(1), Value::String("abc".to_string())];
        let refs: Vec<&Value> = values.iter().collect();
        assert_eq!(infer_xsd_type(&refs), "xsd:int");
    }

    #[test]
    fn text_only_column_infers_string() {
        let values = vec![Value::String("abc".to_string()), Value::String("def".to_string())];
        let refs: Vec<&Value> = values.iter().collect();
        assert_eq!(infer_xsd_type(&refs), "xsd:string");
    }

    #[test]
    fn magnitude_beyond_i64_max_infers_integer() {
        let values = vec![Value::Float(1e20)];
        let refs: Vec<&Value> = values.iter().collect();
        assert_eq!(infer_xsd_type(&refs), "xsd:integer");
    }

    #[test]
    fn nulls_with_one_small_int_infer_short() {
        let values = vec![Value::Null, Value::Int(1), Value::Null];
        let refs: Vec<&Value> = values.iter().collect();
        assert_eq!(infer_xsd_type(&refs), "xsd:short");
    }

    #[test]
    fn tiny_float_infers_double() {
        let values = vec![Value::Float(1e-50)];
        let refs: Vec<&Value> = values.iter().collect();
        assert_eq!(infer_xsd_type(&refs), "xsd:double");
    }

    #[test]
    fn single_row_envelope_shape() {
        let adapter = Cr1000X::new();
        let input = AdapterInput::Row(row(&[
            ("DATE_TIME", Value::String("2024-06-10T10:20:41.540116".into())),
            ("temp", Value::Float(17.16)),
            ("door_open", Value::Bool(false)),
        ]));

        let bytes = adapter.adapt(input, "ALIC1").unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(parsed["head"]["environment"]["station_name"], "ALIC1");
        assert_eq!(parsed["head"]["environment"]["serial_no"], "65-76-73-67-49");
        assert_eq!(parsed["data"][0]["time"], "2024-06-10T10:20:41.540116");
        assert_eq!(parsed["data"][0]["vals"].as_array().unwrap().len(), 2);
        assert_eq!(parsed["head"]["fields"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn single_row_battery_fields_span_long_and_double() {
        let adapter = Cr1000X::new();
        let input = AdapterInput::Row(row(&[
            ("DATE_TIME", Value::String("2024-06-10T10:20:41.540116".into())),
            ("temp", Value::Float(17.16)),
            ("door_open", Value::Bool(false)),
            ("BattV", Value::Float(100000000000000000000.0)),
            ("BattLevel", Value::Float(1e-50)),
        ]));

        let bytes = adapter.adapt(input, "ALIC1").unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        let types: Vec<&str> = parsed["head"]["fields"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["type"].as_str().unwrap())
            .collect();
        assert_eq!(types, vec!["xsd:float", "xsd:boolean", "xsd:integer", "xsd:double"]);
        assert_eq!(parsed["data"][0]["vals"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn unequal_row_shape_across_batch_is_rejected() {
        let adapter = Cr1000X::new();
        let input = AdapterInput::Rows(vec![
            row(&[("a", Value::Int(1))]),
            row(&[("b", Value::Int(2))]),
        ]);
        assert!(matches!(
            adapter.adapt(input, "ALIC1").unwrap_err(),
            AdapterError::UnequalRowShape
        ));
    }
}
