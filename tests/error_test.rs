//! Tests for error types

use std::path::PathBuf;

use trialkit::Error;

#[test]
fn test_schema_error() {
    let error = Error::Schema {
        path: "model.layers".to_string(),
        reason: "sequence elements must be non-optional scalars".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Schema error"));
    assert!(error_str.contains("model.layers"));
    assert!(error_str.contains("non-optional scalars"));
}

#[test]
fn test_missing_value_lists_every_path() {
    let error = Error::MissingValue {
        paths: vec!["a".to_string(), "b.c".to_string()],
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Missing required value"));
    assert!(error_str.contains("a, b.c"));
}

#[test]
fn test_unknown_field_error() {
    let error = Error::UnknownField {
        path: "optimizer.momentum".to_string(),
    };
    assert!(format!("{error}").contains("Unknown field `optimizer.momentum`"));
}

#[test]
fn test_type_coercion_error() {
    let error = Error::TypeCoercion {
        path: "lr".to_string(),
        expected: "float".to_string(),
        found: "\"fast\"".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("lr"));
    assert!(error_str.contains("expected float"));
    assert!(error_str.contains("fast"));
}

#[test]
fn test_runtime_error_keeps_source() {
    let error = Error::Runtime {
        trial_id: "2024-03-09_14-05-07".to_string(),
        output_dir: PathBuf::from("results/2024-03/2024-03-09_14-05-07"),
        source: anyhow::anyhow!("loss diverged"),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("2024-03-09_14-05-07"));
    assert!(error_str.contains("results/2024-03"));
    assert!(error_str.contains("loss diverged"));
    assert!(std::error::Error::source(&error).is_some());
}

#[test]
fn test_unsupported_format_names_feature() {
    let error = Error::UnsupportedFormat {
        extension: "yaml".to_string(),
        feature: Some("yaml".to_string()),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Unsupported configuration format `.yaml`"));
    assert!(error_str.contains("enable the `yaml` feature"));

    let unknown = Error::UnsupportedFormat {
        extension: "ini".to_string(),
        feature: None,
    };
    assert!(!format!("{unknown}").contains("feature"));
}

#[test]
fn test_settings_error() {
    let error = Error::Settings("invalid id_format `%Q`".to_string());
    assert!(format!("{error}").contains("Invalid settings"));
}

#[test]
fn test_io_error_conversion() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error: Error = io.into();
    let error_str = format!("{error}");
    assert!(error_str.contains("IO error"));
    assert!(error_str.contains("file not found"));
}

#[test]
fn test_exit_codes() {
    let resolution = Error::MissingValue {
        paths: vec!["a".to_string()],
    };
    assert!(resolution.is_resolution_error());
    assert_eq!(resolution.exit_code(), 2);

    let runtime = Error::Runtime {
        trial_id: "t".to_string(),
        output_dir: PathBuf::from("t"),
        source: anyhow::anyhow!("boom"),
    };
    assert!(!runtime.is_resolution_error());
    assert_eq!(runtime.exit_code(), 1);
}
