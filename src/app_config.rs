use std::path::PathBuf;

use anyhow::Result;
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use serde::Deserialize;

use crate::db::DEFAULT_DB_PATH;

const DEFAULT_USER_AGENT: &str = concat!("civitai_collector/", env!("CARGO_PKG_VERSION"));

/// Runtime settings: defaults, then `collector.toml`, then `COLLECTOR_*`
/// environment variables. CLI flags are applied on top by the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub export_dir: PathBuf,
    pub user_agent: String,
    /// Extra attempts for a page fetch that hit 429 or a 5xx.
    pub fetch_retries: u32,
    pub fetch_backoff_ms: u64,
}

fn defaults() -> Result<ConfigBuilder<DefaultState>> {
    Ok(config::Config::builder()
        .set_default("db_path", DEFAULT_DB_PATH)?
        .set_default("export_dir", ".")?
        .set_default("user_agent", DEFAULT_USER_AGENT)?
        .set_default("fetch_retries", 3)?
        .set_default("fetch_backoff_ms", 2000)?)
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let settings = defaults()?
            .add_source(File::with_name("collector").required(false))
            .add_source(Environment::with_prefix("COLLECTOR"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
