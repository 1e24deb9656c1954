use std::env;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use monitor_app::MonitorConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn toml_config_validates() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    env::set_var("INVERTER_MONITOR_CONFIG", fixture_path("config-valid.toml"));

    let config = MonitorConfig::load().expect("load config");
    config.validate().expect("validate config");
    assert_eq!(config.interval_secs, 120);
    assert_eq!(config.client.retry_count, 2);
    assert_eq!(config.devices.len(), 2);
    assert!(config.devices[0].is_configured());
    assert!(!config.devices[1].is_configured());

    let settings = config.settings().expect("settings");
    assert_eq!(settings.poll_interval, Duration::from_secs(120));

    env::remove_var("INVERTER_MONITOR_CONFIG");
}

#[test]
fn json_config_validates() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    env::set_var("INVERTER_MONITOR_CONFIG", fixture_path("config-valid.json"));

    let config = MonitorConfig::load().expect("load config");
    config.validate().expect("validate config");
    assert!(config.simulate);
    assert_eq!(config.credentials.region, "us");
    assert_eq!(config.devices[0].label, "Inverter 1");
    assert_eq!(config.metrics_listen.as_deref(), Some("127.0.0.1:9102"));
    // Unset sections keep their defaults.
    assert_eq!(config.save_dir, PathBuf::from("data"));

    env::remove_var("INVERTER_MONITOR_CONFIG");
}

#[test]
fn invalid_config_fails_validation() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    env::set_var("INVERTER_MONITOR_CONFIG", fixture_path("config-invalid.toml"));

    let config = MonitorConfig::load().expect("load config");
    assert!(config.validate().is_err());

    env::remove_var("INVERTER_MONITOR_CONFIG");
}

#[test]
fn env_overrides_file_values() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    env::set_var("INVERTER_MONITOR_INTERVAL_SECS", "900");
    env::set_var("INVERTER_MONITOR_SIMULATE", "true");
    env::set_var("INVERTER_MONITOR_SAVE_DIR", "/var/lib/inverter-monitor");

    let config = MonitorConfig::load_with_path(Some(fixture_path("config-valid.toml"))).expect("load config");
    assert_eq!(config.interval_secs, 900);
    assert!(config.simulate);
    assert_eq!(config.save_dir, PathBuf::from("/var/lib/inverter-monitor"));
    assert_eq!(config.recording_start, "06:00");

    env::remove_var("INVERTER_MONITOR_INTERVAL_SECS");
    env::remove_var("INVERTER_MONITOR_SIMULATE");
    env::remove_var("INVERTER_MONITOR_SAVE_DIR");
}

#[test]
fn defaults_validate_and_survive_save() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    let dir = tempfile::tempdir().expect("tempdir");

    let defaults = MonitorConfig::default();
    defaults.validate().expect("defaults validate");
    assert_eq!(defaults.devices.len(), 4);
    assert!(defaults.devices.iter().all(|device| !device.is_configured()));

    for name in ["monitor.toml", "monitor.json"] {
        let path = dir.path().join(name);
        defaults.save(&path).expect("save");
        let loaded = MonitorConfig::load_with_path(Some(path.to_string_lossy().to_string()))
            .expect("load saved");
        assert_eq!(loaded.devices, defaults.devices);
        assert_eq!(loaded.recording_stop, defaults.recording_stop);
        assert_eq!(loaded.interval_secs, defaults.interval_secs);
        assert_eq!(loaded.export_dir, defaults.export_dir);
    }
}

#[test]
fn fetch_budget_must_fit_inside_interval() {
    let mut config = MonitorConfig::default();
    // Defaults allow 10.25s per fetch across retries.
    config.interval_secs = 5;
    let err = config.validate().expect_err("budget exceeds interval");
    assert!(err.to_string().contains("fetch budget"));

    config.client.retry_count = 0;
    config.client.timeout_ms = 1000;
    config.validate().expect("single short attempt fits");

    config.interval_secs = 300;
    config.client = MonitorConfig::default().client;
    config.validate().expect("default interval fits");
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    let result = MonitorConfig::load_with_path(Some("does-not-exist.toml".to_string()));
    assert!(result.is_err());
}

fn fixture_path(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    path.to_string_lossy().to_string()
}
