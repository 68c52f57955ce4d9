// UI and formatting module

pub mod formatters;

// Re-export commonly used items for cleaner imports
pub use formatters::{
    format_bytes, format_duration_ms, format_metric_value, format_timestamp, print_analysis,
    print_buckets, print_ranking, print_series, print_stats, print_summary,
};
