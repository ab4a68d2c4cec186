use super::DataSource;
use crate::config::{Row, Table, Value};
use crate::error::DataSourceError;
use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeZone, Utc};
use indexmap::IndexMap;
use rusqlite::{types::ValueRef, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A COSMOS-style SQLite table, queried by `(site_id, table, offset)`.
///
/// The connection is opened lazily and held behind a mutex rather than up front,
/// so a `LoopingSql` reconstructed after loading a snapshot reconnects on first use
/// instead of carrying a connection handle across the snapshot boundary.
pub struct LoopingSql {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl LoopingSql {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, DataSourceError> {
        let mut guard = self.conn.lock().expect("sqlite connection mutex poisoned");
        if guard.is_none() {
            *guard = Some(Connection::open(&self.path)?);
        }
        f(guard.as_ref().expect("just initialized"))
    }
}

fn value_from_sqlite(column: &str, v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => {
            let s = String::from_utf8_lossy(t).to_string();
            if column.eq_ignore_ascii_case("date_time") {
                if let Ok(ndt) = NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S") {
                    return Value::Timestamp(Utc.from_utc_datetime(&ndt));
                }
            }
            Value::String(s)
        }
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).to_string()),
    }
}

fn count_for_site(conn: &Connection, table: Table, site_id: &str) -> rusqlite::Result<u64> {
    let sql = format!("SELECT COUNT(*) FROM {} WHERE site_id = ?1", table.name());
    conn.query_row(&sql, rusqlite::params![site_id], |row| row.get::<_, i64>(0))
        .map(|n| n.max(0) as u64)
}

fn row_at_offset(
    conn: &Connection,
    table: Table,
    site_id: &str,
    offset: u64,
) -> rusqlite::Result<Option<Row>> {
    let sql = format!(
        "SELECT * FROM {} WHERE site_id = ?1 LIMIT 1 OFFSET ?2",
        table.name()
    );
    let mut stmt = conn.prepare(&sql)?;
    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();

    let offset = i64::try_from(offset).unwrap_or(i64::MAX);
    let mut rows = stmt.query(rusqlite::params![site_id, offset])?;
    let Some(sql_row) = rows.next()? else {
        return Ok(None);
    };

    let mut row: Row = IndexMap::new();
    for (i, column) in columns.iter().enumerate() {
        row.insert(column.clone(), value_from_sqlite(column, sql_row.get_ref(i)?));
    }
    Ok(Some(row))
}

#[async_trait]
impl DataSource for LoopingSql {
    async fn site_ids(
        &self,
        table: Option<Table>,
        max_sites: usize,
    ) -> Result<Vec<String>, DataSourceError> {
        let table = table.ok_or_else(|| {
            DataSourceError::Connection("LoopingSql requires a table".to_string())
        })?;

        self.with_connection(|conn| {
            let sql = format!("SELECT DISTINCT(site_id) FROM {}", table.name());
            let mut stmt = conn.prepare(&sql)?;
            let mut ids: Vec<String> = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<_>>()?;
            if max_sites > 0 && ids.len() > max_sites {
                ids.truncate(max_sites);
            }
            Ok(ids)
        })
    }

    async fn latest_for_site(
        &self,
        site_id: &str,
        table: Option<Table>,
        offset: u64,
    ) -> Result<Option<Row>, DataSourceError> {
        let table = table.ok_or_else(|| {
            DataSourceError::Connection("LoopingSql requires a table".to_string())
        })?;

        self.with_connection(|conn| {
            let count = count_for_site(conn, table, site_id)?;
            if count == 0 {
                return Ok(None);
            }
            // Wraps at the end of the site's rows: an out-of-range offset loops
            // rather than simply falling back to the first row.
            row_at_offset(conn, table, site_id, offset % count)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE LEVEL1_SOILMET_30MIN (
                site_id TEXT NOT NULL,
                date_time TEXT,
                temp REAL
             );
             INSERT INTO LEVEL1_SOILMET_30MIN VALUES ('ALIC1', '2024-01-01 00:00:00', 10.5);
             INSERT INTO LEVEL1_SOILMET_30MIN VALUES ('ALIC1', '2024-01-01 00:30:00', 11.5);
             INSERT INTO LEVEL1_SOILMET_30MIN VALUES ('MORLY', '2024-01-01 00:00:00', 20.0);",
        )
        .unwrap();
    }

    #[tokio::test]
    async fn site_ids_and_looping_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cosmos.db");
        seed(&path);

        let source = LoopingSql::new(&path);
        let mut ids = source
            .site_ids(Some(Table::Level1Soilmet30Min), 0)
            .await
            .unwrap();
        ids.sort();
        assert_eq!(ids, vec!["ALIC1".to_string(), "MORLY".to_string()]);

        let row0 = source
            .latest_for_site("ALIC1", Some(Table::Level1Soilmet30Min), 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row0.get("temp"), Some(&Value::Float(10.5)));

        // Offset past the end wraps back to the first row for this site.
        let wrapped = source
            .latest_for_site("ALIC1", Some(Table::Level1Soilmet30Min), 50)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(wrapped.get("temp"), Some(&Value::Float(10.5)));
    }

    #[tokio::test]
    async fn offsets_wrap_modulo_row_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cosmos.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE LEVEL1_SOILMET_30MIN (
                site_id TEXT NOT NULL,
                date_time TEXT,
                temp REAL
             );
             INSERT INTO LEVEL1_SOILMET_30MIN VALUES ('MORLY', '2024-01-01 00:00:00', 0.0);
             INSERT INTO LEVEL1_SOILMET_30MIN VALUES ('MORLY', '2024-01-01 01:00:00', 1.0);
             INSERT INTO LEVEL1_SOILMET_30MIN VALUES ('MORLY', '2024-01-01 02:00:00', 2.0);
             INSERT INTO LEVEL1_SOILMET_30MIN VALUES ('MORLY', '2024-01-01 03:00:00', 3.0);",
        )
        .unwrap();
        drop(conn);

        let source = LoopingSql::new(&path);
        // Offsets 0,1,2,3,4,8 loop to rows 0,1,2,3,0,0 for a 4-row site.
        let cases = [(0u64, 0.0), (1, 1.0), (2, 2.0), (3, 3.0), (4, 0.0), (8, 0.0)];
        for (offset, want) in cases {
            let row = source
                .latest_for_site("MORLY", Some(Table::Level1Soilmet30Min), offset)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(row.get("temp"), Some(&Value::Float(want)), "offset {offset}");
        }
    }

    #[tokio::test]
    async fn missing_table_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cosmos.db");
        seed(&path);
        let source = LoopingSql::new(&path);
        assert!(source.site_ids(None, 0).await.is_err());
    }
}
