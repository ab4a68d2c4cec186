use super::DataSource;
use crate::config::{Row, Table};
use crate::error::DataSourceError;
use async_trait::async_trait;

/// Always returns an empty result. Used in tests and dry-run configurations.
#[derive(Debug, Default, Clone)]
pub struct Mock;

impl Mock {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DataSource for Mock {
    async fn site_ids(
        &self,
        _table: Option<Table>,
        _max_sites: usize,
    ) -> Result<Vec<String>, DataSourceError> {
        Ok(Vec::new())
    }

    async fn latest_for_site(
        &self,
        _site_id: &str,
        _table: Option<Table>,
        _offset: u64,
    ) -> Result<Option<Row>, DataSourceError> {
        Ok(None)
    }
}
