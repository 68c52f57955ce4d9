// procwatch Library - Public API

// Re-export error types
pub mod error;
pub use error::{ProcwatchError, Result};

// Module declarations
pub mod commands;
pub mod core;
pub mod platform;
pub mod ui;

// Re-export commonly used types
pub use crate::core::config::Config;
pub use crate::core::process_monitor::{
    Metric, MetricFamily, Monitor, ProcessAction, ProcessIdentity, QueryEngine, Sample, Store,
    TimeWindow,
};

// Initialize logging
pub fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}
