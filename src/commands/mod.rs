// Command handlers module
pub mod action;
pub mod query;
pub mod record;

use anyhow::{Context, Result};
use clap::ArgMatches;
use std::path::PathBuf;
use std::sync::Arc;

use crate::core::config::Config;
use crate::core::process_monitor::{QueryEngine, Store};

// Re-exports for cleaner imports
pub use action::execute as action;
pub use record::execute as record;

/// Resolve the effective configuration from the global `--config` and
/// `--data` flags
pub fn load_config(matches: &ArgMatches) -> Result<Config> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load().context("Failed to load config")?,
    };

    if let Some(data) = matches.get_one::<PathBuf>("data") {
        config.data_path = Some(data.clone());
    }

    Ok(config)
}

/// Open the configured store read-side for query commands
pub fn open_query_engine(config: &Config) -> Result<QueryEngine> {
    let path = config.data_path()?;
    let store = Store::open(&path, config.retention_policy(), config.store_busy_timeout())
        .with_context(|| format!("Failed to open sample store at {}", path.display()))?;

    Ok(QueryEngine::new(Arc::new(store)))
}
