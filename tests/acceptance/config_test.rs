//! Configuration loading acceptance tests.

use sloc_common::config::{ConfigError, ControllerConfig};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

#[test]
fn test_shipped_default_matches_builtin() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
    let config = ControllerConfig::from_file(&path).expect("shipped config");
    assert_eq!(config, ControllerConfig::default());
}

#[test]
fn test_partial_file_keeps_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[servo]
settle_delay = "250ms"
max_deviation = 3
"#
    )
    .unwrap();

    let config = ControllerConfig::from_file(file.path()).unwrap();
    assert_eq!(config.servo.settle_delay, Duration::from_millis(250));
    assert_eq!(config.servo.settle_delay_ms(), 250);
    assert_eq!(config.servo.max_deviation, 3);
    assert_eq!(config.servo.neutral_duty, 7);
    assert_eq!(config.timing.ticks_per_ms, 40);
}

#[test]
fn test_invalid_file_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[timing]\nticks_per_ms = 0").unwrap();

    assert!(matches!(
        ControllerConfig::from_file(file.path()),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_missing_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    match ControllerConfig::from_file(&path) {
        Err(ConfigError::Io { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected Io error, got {other:?}"),
    }
}
