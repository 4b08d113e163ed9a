//! Config Validation Tests
//!
//! Typo detection and value validation for `tt_inventory.toml`, exercised
//! independently from the rest of the pipeline.

use tt_inventory::config::validation::{known_config_keys, suggest_correction, validate_unknown_keys};
use tt_inventory::config::{
    ArchiveCompression, ConfigError, FailurePolicy, ModelSharing, PipelineConfig,
};

// ============================================================================
// Typo Detection
// ============================================================================

#[test]
fn typo_in_failure_policy_warns_with_suggestion() {
    let toml_str = r#"
[pipeline]
failure_polcy = "abort"
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1, "Expected exactly 1 warning");
    assert_eq!(warnings[0].field, "pipeline.failure_polcy");
    assert_eq!(
        warnings[0].suggestion.as_deref(),
        Some("pipeline.failure_policy")
    );
}

#[test]
fn typo_in_section_name_warns() {
    let toml_str = r#"
[scrach]
prefix = "run-"
"#;
    let warnings = validate_unknown_keys(toml_str);
    // Both the section and its key are unknown
    assert_eq!(warnings.len(), 2);
    assert!(warnings
        .iter()
        .any(|w| w.field == "scrach" && w.suggestion.as_deref() == Some("scratch")));
}

#[test]
fn full_valid_config_produces_zero_warnings() {
    let toml_str = r#"
[pipeline]
workers = 16
failure_policy = "skip"
model_sharing = "shared"
progress_step_percent = 5

[scratch]
parent_dir = "/data/scratch"
prefix = "tt-"
compression_level = 9

[solver]
earth_radius_km = 6371.0

[archive]
compression = "deflated"
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert!(warnings.is_empty(), "Expected 0 warnings, got: {warnings:?}");

    let config = PipelineConfig::from_toml_str(toml_str).unwrap();
    assert_eq!(config.pipeline.workers, 16);
    assert_eq!(config.pipeline.progress_step_percent, 5);
    assert_eq!(config.scratch.compression_level, 9);
    assert_eq!(config.archive.compression, ArchiveCompression::Deflated);
}

#[test]
fn garbage_key_gets_no_suggestion() {
    let known = known_config_keys();
    assert!(suggest_correction("completely_unrelated_garbage_key_xyz", &known).is_none());
}

#[test]
fn unknown_keys_do_not_reject_config() {
    let config = PipelineConfig::from_toml_str("[pipeline]\nworkerz = 3\nworkers = 2\n").unwrap();
    assert_eq!(config.pipeline.workers, 2);
}

// ============================================================================
// Value Validation
// ============================================================================

#[test]
fn enum_values_parse() {
    let config = PipelineConfig::from_toml_str(
        r#"
[pipeline]
failure_policy = "abort"
model_sharing = "per_unit"
"#,
    )
    .unwrap();
    assert_eq!(config.pipeline.failure_policy, FailurePolicy::Abort);
    assert_eq!(config.pipeline.model_sharing, ModelSharing::PerUnit);
}

#[test]
fn out_of_range_values_rejected() {
    for toml_str in [
        "[pipeline]\nworkers = 2000\n",
        "[pipeline]\nprogress_step_percent = 101\n",
        "[scratch]\nprefix = \"../escape/\"\n",
        "[scratch]\ncompression_level = 0\n",
        "[solver]\nearth_radius_km = -1.0\n",
    ] {
        match PipelineConfig::from_toml_str(toml_str) {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 1, "{toml_str}"),
            other => panic!("expected validation error for {toml_str:?}, got {other:?}"),
        }
    }
}

#[test]
fn explicit_file_must_exist() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    assert!(matches!(
        PipelineConfig::load_from_file(&missing),
        Err(ConfigError::Io(..))
    ));
}

#[test]
fn config_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tt_inventory.toml");

    let mut config = PipelineConfig::default();
    config.pipeline.failure_policy = FailurePolicy::Abort;
    config.archive.compression = ArchiveCompression::Stored;
    std::fs::write(&path, config.to_toml().unwrap()).unwrap();

    assert_eq!(PipelineConfig::load_from_file(&path).unwrap(), config);
}
