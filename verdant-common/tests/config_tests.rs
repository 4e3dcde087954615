//! Tests for TOML bootstrap configuration

use tempfile::TempDir;
use verdant_common::config::{
    load_toml_config, parse_toml_config, write_toml_config, RegulatorConfig, TomlConfig,
};
use verdant_common::Error;

#[test]
fn test_missing_file_yields_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config = load_toml_config(&temp_dir.path().join("absent.toml")).unwrap();

    assert_eq!(config.port, 5730);
    assert!(config.jurisdiction.requires_external_sync);
    assert_eq!(config.jurisdiction.tag_pattern, "^[0-9A-Z]{24}$");
    assert_eq!(config.cadence.interval_secs, 86_400);
}

#[test]
fn test_full_file_parses() {
    let config = parse_toml_config(
        r#"
        database_path = "/var/lib/verdant/verdant.db"
        port = 6000

        [logging]
        level = "debug"

        [jurisdiction]
        code = "CO"
        requires_plant_tags = false
        allowed_stages = ["clone", "vegetative", "flowering", "harvest", "drying", "curing", "completed"]
        manifest_required_on_destroy = false
        tag_pattern = "^CO-[0-9]{6}$"
        harvest_tolerance_percent = 5.0

        [sync]
        max_attempts = 3
        base_backoff_ms = 50
        max_backoff_ms = 400
        request_timeout_ms = 250

        [regulator]
        base_url = "https://regulator.example/api"
        api_key = "secret"
        "#,
    )
    .unwrap();

    assert_eq!(config.port, 6000);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.jurisdiction.code, "CO");
    assert!(!config.jurisdiction.requires_plant_tags);
    assert_eq!(config.jurisdiction.allowed_stages.as_ref().unwrap().len(), 7);
    assert_eq!(config.sync.max_attempts, 3);
    // Unspecified fields of a present section keep their defaults
    assert_eq!(config.sync.concurrency, 4);
    assert_eq!(
        config.regulator.unwrap().base_url,
        "https://regulator.example/api"
    );
}

#[test]
fn test_invalid_tolerance_rejected() {
    let err = parse_toml_config("[jurisdiction]\nharvest_tolerance_percent = 150.0\n").unwrap_err();
    assert!(matches!(err, Error::Config(msg) if msg.contains("harvest_tolerance_percent")));
}

#[test]
fn test_backoff_bounds_rejected() {
    let err = parse_toml_config("[sync]\nbase_backoff_ms = 10\nmax_backoff_ms = 5\n").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_written_config_reloads() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("verdant.toml");

    let mut config = TomlConfig::default();
    config.port = 7001;
    config.regulator = Some(RegulatorConfig {
        base_url: "http://localhost:9000".to_string(),
        api_key: None,
    });

    write_toml_config(&config, &path).unwrap();
    let loaded = load_toml_config(&path).unwrap();

    assert_eq!(loaded.port, 7001);
    assert_eq!(loaded.regulator.unwrap().base_url, "http://localhost:9000");
}
