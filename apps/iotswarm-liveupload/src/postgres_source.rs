//! Queries a Postgres-backed copy of the COSMOS tables for rows newer than a
//! given `date_time`, decoding each row generically into `iotswarm_core::Row`
//! without a fixed per-table schema.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iotswarm_core::config::{Row, Table, Value};
use iotswarm_core::error::LiveUploadError;
use iotswarm_core::liveupload::RelationalSource;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};

pub struct PostgresSource {
    pool: PgPool,
}

impl PostgresSource {
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(dsn)
            .await
            .context("connecting to live-upload source database")?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl RelationalSource for PostgresSource {
    async fn rows_since(
        &self,
        table: Table,
        site_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Row>, LiveUploadError> {
        // `table.name()` only ever comes from the closed `Table` enum, never from
        // caller input, so interpolating it into the query text doesn't open a
        // SQL-injection path.
        let query = format!(
            "SELECT * FROM {} WHERE site_id = $1 AND date_time > $2 ORDER BY date_time ASC",
            table.name()
        );

        let pg_rows = sqlx::query(&query)
            .bind(site_id)
            .bind(since)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| LiveUploadError::Source(err.to_string()))?;

        pg_rows.iter().map(decode_row).collect()
    }
}

fn decode_row(pg_row: &PgRow) -> Result<Row, LiveUploadError> {
    let mut row = Row::new();
    for column in pg_row.columns() {
        let name = column.name().to_string();
        let value = decode_value(pg_row, column.ordinal(), column.type_info().name())?;
        row.insert(name, value);
    }
    Ok(row)
}

fn decode_value(pg_row: &PgRow, index: usize, type_name: &str) -> Result<Value, LiveUploadError> {
    let raw = pg_row
        .try_get_raw(index)
        .map_err(|err| LiveUploadError::Source(err.to_string()))?;
    if raw.is_null() {
        return Ok(Value::Null);
    }

    let decoded = match type_name {
        "BOOL" => pg_row
            .try_get::<bool, _>(index)
            .map(Value::Bool)
            .map_err(|err| LiveUploadError::Source(err.to_string())),
        "INT2" | "INT4" | "INT8" => pg_row
            .try_get::<i64, _>(index)
            .map(Value::Int)
            .map_err(|err| LiveUploadError::Source(err.to_string())),
        "FLOAT4" | "FLOAT8" | "NUMERIC" => pg_row
            .try_get::<f64, _>(index)
            .map(Value::Float)
            .map_err(|err| LiveUploadError::Source(err.to_string())),
        "TIMESTAMP" | "TIMESTAMPTZ" => pg_row
            .try_get::<DateTime<Utc>, _>(index)
            .map(Value::Timestamp)
            .map_err(|err| LiveUploadError::Source(err.to_string())),
        _ => pg_row
            .try_get::<String, _>(index)
            .map(Value::String)
            .map_err(|err| LiveUploadError::Source(err.to_string())),
    };

    decoded
}
