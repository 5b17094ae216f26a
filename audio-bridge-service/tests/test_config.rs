use std::env;
use std::sync::Mutex;
use std::time::Duration;

use audio_bridge_service::common::app_config::{
    AppConfig, AppConfigArgs, CONFIG_PATH_ENV, Environment,
};

use clap::Parser;

// The tests below share one process environment.
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn build_args(config_path: &str) -> AppConfigArgs {
    AppConfigArgs::parse_from(["test-bin", "--config", config_path])
}

#[test]
fn loads_valid_yaml_config() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    unsafe { env::remove_var(CONFIG_PATH_ENV) };
    let mut args = build_args("tests/resources/valid-test-config.yaml");

    let config = AppConfig::from_args(&mut args).unwrap();

    assert_eq!(config.environment, Environment::Development);
    assert_eq!(config.connection_limit, 100);
    assert_eq!(config.log_level, "info");
    assert_eq!(config.listen.to_string(), "[::1]:5555");
    assert!(config.log_file().is_none());
    assert!(!config.tokio_console);
}

#[test]
fn bridge_settings_follow_config() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    unsafe { env::remove_var(CONFIG_PATH_ENV) };
    let mut args = build_args("tests/resources/valid-test-config.yaml");

    let settings = AppConfig::from_args(&mut args).unwrap().registry_settings();

    assert_eq!(settings.hub.subscriber_queue_capacity, 16);
    assert_eq!(settings.hub.publish_queue_capacity, 128);
    assert_eq!(settings.max_update_retries, 8);
}

#[test]
fn empty_session_ttl_of_zero_disables_reaping() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    unsafe { env::remove_var(CONFIG_PATH_ENV) };

    let mut args = build_args("tests/resources/valid-test-config.yaml");
    let config = AppConfig::from_args(&mut args).unwrap();
    assert_eq!(config.empty_session_ttl(), Some(Duration::from_secs(60)));

    let mut args = AppConfigArgs::parse_from([
        "test-bin",
        "--config",
        "tests/resources/valid-test-config.yaml",
        "--empty-session-ttl-secs",
        "0",
    ]);
    let config = AppConfig::from_args(&mut args).unwrap();
    assert_eq!(config.empty_session_ttl(), None);
}

#[test]
fn cli_overrides_yaml_values() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    unsafe { env::remove_var(CONFIG_PATH_ENV) };

    let mut args = AppConfigArgs::parse_from([
        "test-bin",
        "--config",
        "tests/resources/valid-test-config.yaml",
        "--connection-limit",
        "999",
        "--max-update-retries",
        "3",
    ]);

    let config = AppConfig::from_args(&mut args).unwrap();

    // CLI should override YAML (priority rule #1)
    assert_eq!(config.connection_limit, 999);
    assert_eq!(config.max_update_retries, 3);
    assert_eq!(config.subscriber_queue_capacity, 16);
}

#[test]
fn env_var_overrides_cli_config_path() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    // CLI path should be ignored
    unsafe { env::set_var(CONFIG_PATH_ENV, "tests/resources/valid-test-config.yaml") };
    let mut args = build_args("tests/resources/invalid-test-config-missing-field.yaml");

    let config = AppConfig::from_args(&mut args);
    unsafe { env::remove_var(CONFIG_PATH_ENV) };

    // It loaded the valid file from ENV instead
    assert_eq!(config.unwrap().connection_limit, 100);
}

#[test]
fn fails_on_invalid_yaml() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    unsafe { env::remove_var(CONFIG_PATH_ENV) };

    let mut args = build_args("tests/resources/invalid-test-config-missing-field.yaml");

    let result = AppConfig::from_args(&mut args);

    assert!(result.is_err());
}

#[test]
fn fails_if_file_does_not_exist() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    unsafe { env::remove_var(CONFIG_PATH_ENV) };

    let mut args = build_args("tests/resources/does-not-exist.yaml");

    let result = AppConfig::from_args(&mut args);
    assert!(result.is_err());
}
