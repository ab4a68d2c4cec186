use super::DataSource;
use crate::config::{Row, Table, Value};
use crate::error::DataSourceError;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use indexmap::IndexMap;
use std::path::Path;

/// An in-memory table loaded once from a CSV file and cycled through indefinitely,
/// keyed by the `SITE_ID` column.
///
/// All rows are loaded at construction; after that the source is read-only, which is
/// what lets it be shared across devices of the same swarm without a lock beyond the
/// immutable `Arc` the caller wraps it in.
#[derive(Debug, Clone)]
pub struct LoopingCsv {
    rows_by_site: IndexMap<String, Vec<Row>>,
}

impl LoopingCsv {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DataSourceError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)?;

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

        let mut rows_by_site: IndexMap<String, Vec<Row>> = IndexMap::new();
        for result in reader.records() {
            let record = result?;
            let mut row: Row = IndexMap::new();
            for (column, raw) in headers.iter().zip(record.iter()) {
                row.insert(column.clone(), parse_cell(column, raw));
            }

            let site_id = row
                .get("SITE_ID")
                .map(Value::to_string)
                .unwrap_or_default();
            rows_by_site.entry(site_id).or_default().push(row);
        }

        Ok(Self { rows_by_site })
    }
}

fn parse_cell(column: &str, raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        return Value::Null;
    }

    if column.eq_ignore_ascii_case("date_time") {
        if let Some(ts) = parse_date_time(trimmed) {
            return Value::Timestamp(ts);
        }
    }

    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return Value::Float(f);
    }
    if trimmed.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }

    Value::String(trimmed.to_string())
}

/// Accepts `%d-%b-%y %H.%M.%S` (the datalogger export format) or ISO-8601.
fn parse_date_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(raw, "%d-%b-%y %H.%M.%S") {
        return Some(Utc.from_utc_datetime(&ndt));
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&ndt));
    }
    None
}

#[async_trait]
impl DataSource for LoopingCsv {
    async fn site_ids(
        &self,
        _table: Option<Table>,
        max_sites: usize,
    ) -> Result<Vec<String>, DataSourceError> {
        let sites = self.rows_by_site.keys().cloned();
        Ok(if max_sites == 0 {
            sites.collect()
        } else {
            sites.take(max_sites).collect()
        })
    }

    async fn latest_for_site(
        &self,
        site_id: &str,
        _table: Option<Table>,
        offset: u64,
    ) -> Result<Option<Row>, DataSourceError> {
        let Some(rows) = self.rows_by_site.get(site_id) else {
            return Ok(None);
        };
        if rows.is_empty() {
            return Ok(None);
        }
        let index = (offset % rows.len() as u64) as usize;
        Ok(Some(rows[index].clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn loops_and_preserves_site_order() {
        let file = write_csv(
            "SITE_ID,DATE_TIME,temp\n\
             ALIC1,01-Jan-24 00.00.00,10.5\n\
             MORLY,01-Jan-24 00.00.00,11.5\n\
             ALIC1,01-Jan-24 01.00.00,12.5\n",
        );
        let source = LoopingCsv::from_path(file.path()).unwrap();

        let sites = source.site_ids(None, 0).await.unwrap();
        assert_eq!(sites, vec!["ALIC1".to_string(), "MORLY".to_string()]);

        let row0 = source.latest_for_site("ALIC1", None, 0).await.unwrap().unwrap();
        assert_eq!(row0.get("temp"), Some(&Value::Float(10.5)));

        // Wraps at the end of the 2-row ALIC1 subset.
        let row_wrapped = source.latest_for_site("ALIC1", None, 2).await.unwrap().unwrap();
        assert_eq!(row_wrapped, row0);
    }

    #[tokio::test]
    async fn unknown_site_returns_none() {
        let file = write_csv("SITE_ID,temp\nALIC1,1\n");
        let source = LoopingCsv::from_path(file.path()).unwrap();
        assert!(source
            .latest_for_site("NOSITE", None, 0)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn blank_and_nan_cells_become_null() {
        let file = write_csv("SITE_ID,val\nALIC1,\nALIC1,NaN\n");
        let source = LoopingCsv::from_path(file.path()).unwrap();
        let row = source.latest_for_site("ALIC1", None, 0).await.unwrap().unwrap();
        assert_eq!(row.get("val"), Some(&Value::Null));
    }
}
