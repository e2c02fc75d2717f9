use std::fs;

use serial_test::serial;
use tempfile::tempdir;

use super::*;
use crate::ComposeError;
use crate::Error;

#[test]
#[serial]
fn test_default_config_is_valid() {
    temp_env::with_vars_unset(["MESHCONF_CONFIG_PATH", "MESHCONF__REFRESH__MODE"], || {
        let config = EngineConfig::load(None).unwrap().validate().unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.refresh.auto_refresh);
        assert_eq!(config.refresh.mode, RefreshMode::Reflect);
        assert_eq!(config.dispatcher.queue_size, 256);
        assert_eq!(config.registry.sweep_interval_in_ms, 5000);
        assert_eq!(config.composer.internal_file_stems, vec!["application", "bootstrap"]);
    });
}

#[test]
#[serial]
fn test_file_then_environment_override() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("meshconf.toml");
    fs::write(
        &path,
        r#"
[refresh]
auto_refresh = false
mode = "whole_reload"

[dispatcher]
queue_size = 8

[[composer.custom_groups]]
name = "shared"
files = ["db.properties", "cache.yml"]
"#,
    )
    .unwrap();

    temp_env::with_vars(
        [
            ("MESHCONF_CONFIG_PATH", Some(path.to_str().unwrap())),
            ("MESHCONF__DISPATCHER__QUEUE_SIZE", Some("32")),
        ],
        || {
            let config = EngineConfig::load(None).unwrap().validate().unwrap();
            assert!(!config.refresh.auto_refresh);
            assert_eq!(config.refresh.mode, RefreshMode::WholeReload);
            assert_eq!(config.dispatcher.queue_size, 32);
            assert_eq!(config.composer.custom_groups.len(), 1);
            assert_eq!(config.composer.custom_groups[0].files, vec!["db.properties", "cache.yml"]);
            assert_eq!(config.composer.custom_groups[0].namespace, None);
        },
    );
}

#[test]
#[serial]
fn test_explicit_path_wins_over_env_path() {
    let dir = tempdir().unwrap();
    let explicit = dir.path().join("explicit.toml");
    let from_env = dir.path().join("env.toml");
    fs::write(&explicit, "[registry]\nsweep_interval_in_ms = 25\n").unwrap();
    fs::write(&from_env, "[registry]\nsweep_interval_in_ms = 99\n").unwrap();

    temp_env::with_var("MESHCONF_CONFIG_PATH", Some(from_env.to_str().unwrap()), || {
        let config = EngineConfig::load(explicit.to_str()).unwrap();
        assert_eq!(config.registry.sweep_interval_in_ms, 25);
    });
}

#[test]
#[serial]
fn test_missing_config_file_is_an_error() {
    temp_env::with_var_unset("MESHCONF_CONFIG_PATH", || {
        let result = EngineConfig::load(Some("/nonexistent/meshconf.toml"));
        assert!(matches!(result, Err(Error::Config(_))));
    });
}

#[test]
fn test_validation_rejects_bad_sections() {
    let mut config = EngineConfig::default();
    config.dispatcher.queue_size = 0;
    assert!(matches!(config.validate(), Err(Error::Config(_))));

    let mut config = EngineConfig::default();
    config.registry.sweep_interval_in_ms = 0;
    assert!(config.validate().is_err());

    let mut config = EngineConfig::default();
    config
        .composer
        .custom_groups
        .push(CustomGroupConfig::new("shared").with_files(["settings.json"]));
    assert!(matches!(
        config.validate(),
        Err(Error::Compose(ComposeError::UnsupportedFileFormat { .. }))
    ));
}
