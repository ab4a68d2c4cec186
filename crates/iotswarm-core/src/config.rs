//! Shared value types: the closed `Table` enum, `Row`, and per-device configuration.
//!
//! Nothing in this module touches the environment or the filesystem - that belongs to
//! the binaries' own `Config::from_env`. This module only holds what the engine needs
//! to validate and carry around.

use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the closed set of COSMOS sensor datasets a device can be wired to.
/// The five variants are the only tables the embedded-SQL and CSV data sources
/// know how to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Table {
    Level1Soilmet30Min,
    Level1Nmdb1Hour,
    Level1Precip1Min,
    Level1PrecipRaine1Min,
    CosmosStatus1Hour,
}

impl Table {
    /// The exact name used both as a SQL table name and a wire-level identifier.
    pub const fn name(self) -> &'static str {
        match self {
            Table::Level1Soilmet30Min => "LEVEL1_SOILMET_30MIN",
            Table::Level1Nmdb1Hour => "LEVEL1_NMDB_1HOUR",
            Table::Level1Precip1Min => "LEVEL1_PRECIP_1MIN",
            Table::Level1PrecipRaine1Min => "LEVEL1_PRECIP_RAINE_1MIN",
            Table::CosmosStatus1Hour => "COSMOS_STATUS_1HOUR",
        }
    }

    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name {
            "LEVEL1_SOILMET_30MIN" => Ok(Table::Level1Soilmet30Min),
            "LEVEL1_NMDB_1HOUR" => Ok(Table::Level1Nmdb1Hour),
            "LEVEL1_PRECIP_1MIN" => Ok(Table::Level1Precip1Min),
            "LEVEL1_PRECIP_RAINE_1MIN" => Ok(Table::Level1PrecipRaine1Min),
            "COSMOS_STATUS_1HOUR" => Ok(Table::CosmosStatus1Hour),
            other => Err(ConfigError::UnknownTable(other.to_string())),
        }
    }

    pub const ALL: [Table; 5] = [
        Table::Level1Soilmet30Min,
        Table::Level1Nmdb1Hour,
        Table::Level1Precip1Min,
        Table::Level1PrecipRaine1Min,
        Table::CosmosStatus1Hour,
    ];
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A scalar cell value. `Row` is an ordered mapping of column name to `Value`:
/// null, bool, integer, float, string, or timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

/// A single historical sensor reading: an ordered mapping from column name to value,
/// produced by a `DataSource` and consumed by a `PayloadAdapter`.
pub type Row = IndexMap<String, Value>;

/// Immutable (post-construction) configuration for a single simulated device.
/// `cycle` lives on [`crate::device::Device`] itself, not here, since it is the one
/// piece of state that mutates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device_id: String,
    pub device_type: DeviceType,
    pub sleep_seconds: u64,
    pub max_cycles: u64,
    pub delay_start: bool,
    pub no_send_probability: u8,
    pub table: Option<Table>,
    pub mqtt_topic: Option<String>,
    pub mqtt_prefix: Option<String>,
    pub mqtt_suffix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Base,
    Cr1000X,
}

impl DeviceConfig {
    /// Builds and validates a new configuration. `table_required` is supplied by the
    /// caller once it knows whether the chosen `DataSource` variant needs one (SQL
    /// does, CSV and Mock do not) - this requirement belongs to the data source,
    /// not to the config type itself.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device_id: impl Into<String>,
        device_type: DeviceType,
        sleep_seconds: u64,
        max_cycles: u64,
        delay_start: bool,
        no_send_probability: u8,
        table: Option<Table>,
        table_required: bool,
        mqtt_topic: Option<String>,
        mqtt_prefix: Option<String>,
        mqtt_suffix: Option<String>,
    ) -> Result<Self, ConfigError> {
        let device_id = device_id.into();
        if device_id.trim().is_empty() {
            return Err(ConfigError::EmptyDeviceId);
        }
        if no_send_probability > 100 {
            return Err(ConfigError::InvalidNoSendProbability(no_send_probability));
        }
        if table_required && table.is_none() {
            return Err(ConfigError::MissingTable);
        }

        Ok(Self {
            device_id,
            device_type,
            sleep_seconds,
            max_cycles,
            delay_start,
            no_send_probability,
            table,
            mqtt_topic,
            mqtt_prefix,
            mqtt_suffix,
        })
    }

    /// Builds the effective MQTT topic: `[prefix/]device_id_or_override[/suffix]`.
    pub fn topic(&self) -> String {
        let base = self
            .mqtt_topic
            .clone()
            .unwrap_or_else(|| self.device_id.clone());
        let mut topic = base;
        if let Some(prefix) = &self.mqtt_prefix {
            topic = format!("{prefix}/{topic}");
        }
        if let Some(suffix) = &self.mqtt_suffix {
            topic = format!("{topic}/{suffix}");
        }
        topic
    }
}
