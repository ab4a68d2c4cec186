//! Read-only row providers keyed by `(site, table, offset)`.

mod csv_source;
mod mock;
mod sql;

pub use csv_source::LoopingCsv;
pub use mock::Mock;
pub use sql::LoopingSql;

use crate::config::{Row, Table};
use crate::error::DataSourceError;
use async_trait::async_trait;

/// Capability set shared by every data source variant.
///
/// `site_ids` and `latest_for_site` are the only two operations a `DataSource`
/// grants; `table` is `None` for variants that don't need it (CSV, Mock).
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Distinct site identifiers known to this source. `max_sites == 0` returns all of
    /// them; a negative count is a precondition violation left to the caller (the
    /// public signature uses `usize`, so callers enforce non-negativity at the type
    /// level already).
    async fn site_ids(
        &self,
        table: Option<Table>,
        max_sites: usize,
    ) -> Result<Vec<String>, DataSourceError>;

    /// The row at logical position `offset` for `(site, table)`, wrapping at the end
    /// of the underlying stream. Returns `Ok(None)` when the site has no rows at
    /// all - not an error, just "no data this cycle".
    async fn latest_for_site(
        &self,
        site_id: &str,
        table: Option<Table>,
        offset: u64,
    ) -> Result<Option<Row>, DataSourceError>;
}
