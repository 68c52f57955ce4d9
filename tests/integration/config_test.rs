use procwatch::core::config::Config;
use procwatch::core::process_monitor::{MetricFamily, Monitor, SamplerState};
use procwatch::error::ConfigError;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_config_default() {
    let config = Config::default();
    assert_eq!(config.sampling_interval_ms, 2_000);
    assert_eq!(config.max_age_secs, 86_400);
    assert_eq!(config.max_row_count, 1_000_000);
    assert!(config.data_path.is_none());
    assert!(config.metrics_enabled.contains(&MetricFamily::Disk));
}

#[test]
fn test_config_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("config.json");

    let config = Config {
        sampling_interval_ms: 750,
        max_row_count: 5_000,
        metrics_enabled: [MetricFamily::Cpu, MetricFamily::Memory]
            .into_iter()
            .collect(),
        data_path: Some(temp_dir.path().join("samples.db")),
        top_staleness_ms: Some(10_000),
        ..Default::default()
    };
    config.save_to(&path).unwrap();

    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_config_empty_file_is_default() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    std::fs::write(&path, "").unwrap();

    assert_eq!(Config::load_from(&path).unwrap(), Config::default());
}

#[test]
fn test_config_malformed_json_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    std::fs::write(&path, "{ not json").unwrap();

    assert!(matches!(
        Config::load_from(&path),
        Err(ConfigError::Parse { .. })
    ));
}

#[test]
fn test_config_unknown_metric_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    std::fs::write(&path, r#"{"metrics_enabled": ["gpu"]}"#).unwrap();

    assert!(Config::load_from(&path).is_err());
}

#[test]
fn test_config_invalid_values_rejected_on_load() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    std::fs::write(&path, r#"{"sampling_interval_ms": 5}"#).unwrap();

    assert!(matches!(
        Config::load_from(&path),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_config_missing_file_is_read_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("absent.json");

    assert!(matches!(
        Config::load_from(&path),
        Err(ConfigError::Read { .. })
    ));
}

#[test]
fn test_config_derived_values() {
    let config = Config {
        max_age_secs: 60,
        max_row_count: 10,
        read_timeout_ms: 300,
        ..Default::default()
    };

    let policy = config.retention_policy();
    assert_eq!(policy.max_age, Duration::from_secs(60));
    assert_eq!(policy.max_row_count, 10);
    assert_eq!(config.read_timeout(), Duration::from_millis(300));
}

#[test]
fn test_monitor_opens_configured_store() {
    let temp_dir = TempDir::new().unwrap();
    let data = temp_dir.path().join("data").join("samples.db");
    let config = Config {
        sampling_interval_ms: 500,
        data_path: Some(data.clone()),
        ..Default::default()
    };

    let monitor = Monitor::open(&config).unwrap();
    assert!(data.exists());
    assert_eq!(monitor.state(), SamplerState::Stopped);
    assert_eq!(monitor.interval(), Duration::from_millis(500));
    assert_eq!(
        monitor.store().stored_retention_policy().unwrap(),
        Some(config.retention_policy())
    );
}
