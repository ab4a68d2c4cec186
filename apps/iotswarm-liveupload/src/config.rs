use anyhow::{anyhow, Context, Result};
use iotswarm_core::Table;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub table: Table,
    pub sites: Vec<String>,
    pub db_dsn: String,
    pub object_store_root: PathBuf,
    pub key_prefix: String,
    pub poll_interval: Duration,
    pub fallback_hours: i64,
    /// Directory name under the platform state dir; the per-table state file
    /// lives at `<state_dir>/<app_name>/<table>.state`.
    pub app_name: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let table = Table::parse(&env_string("IOTSWARM_LIVEUPLOAD_TABLE", None)?)
            .context("invalid IOTSWARM_LIVEUPLOAD_TABLE")?;

        let sites = env_string("IOTSWARM_LIVEUPLOAD_SITES", None)?
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        if sites.is_empty() {
            return Err(anyhow!("IOTSWARM_LIVEUPLOAD_SITES must list at least one site"));
        }

        let db_dsn = env_string("IOTSWARM_LIVEUPLOAD_DB_DSN", None)?;
        let object_store_root = PathBuf::from(env_string(
            "IOTSWARM_LIVEUPLOAD_OBJECT_STORE_ROOT",
            Some("./liveupload-objects".to_string()),
        )?);
        let key_prefix = env_string("IOTSWARM_LIVEUPLOAD_KEY_PREFIX", Some("cosmos".to_string()))?;
        let poll_interval =
            Duration::from_secs(env_u64("IOTSWARM_LIVEUPLOAD_INTERVAL_SECONDS", Some(300))?);
        let fallback_hours = env_u64("IOTSWARM_LIVEUPLOAD_FALLBACK_HOURS", Some(3))? as i64;
        let app_name = env_string("IOTSWARM_LIVEUPLOAD_APP_NAME", Some("iotswarm-liveupload".to_string()))?;

        Ok(Self {
            table,
            sites,
            db_dsn,
            object_store_root,
            key_prefix,
            poll_interval,
            fallback_hours,
            app_name,
        })
    }
}

fn env_string(key: &str, default: Option<String>) -> Result<String> {
    match env::var(key) {
        Ok(value) => Ok(value.trim().to_string()),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u64(key: &str, default: Option<u64>) -> Result<u64> {
    match env::var(key) {
        Ok(value) => value.trim().parse::<u64>().with_context(|| format!("invalid {key}")),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}
