use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveTime;
use device_registry::{ConfigError, SettingsOwner, SettingsUpdate};
use types::{CloudCredentials, Device};

fn device(id: &str, label: &str) -> Device {
    Device {
        device_id: id.to_string(),
        ip: String::new(),
        local_key: String::new(),
        label: label.to_string(),
    }
}

fn update() -> SettingsUpdate {
    SettingsUpdate {
        devices: vec![device("bf01", "Inverter 1"), device("", "Inverter 2")],
        window_start: "06:00".to_string(),
        window_stop: "20:00".to_string(),
        poll_interval_secs: 300,
        save_dir: PathBuf::from("data"),
        credentials: CloudCredentials::default(),
    }
}

#[test]
fn valid_update_produces_settings() {
    let settings = update().validate().expect("valid");
    assert_eq!(settings.poll_interval, Duration::from_secs(300));
    assert_eq!(settings.window.start, NaiveTime::from_hms_opt(6, 0, 0).unwrap());
    assert_eq!(settings.window.stop, NaiveTime::from_hms_opt(20, 0, 0).unwrap());
    assert_eq!(settings.configured().count(), 1);
    assert_eq!(settings.unconfigured().count(), 1);
    assert!(settings.device("Inverter 2").is_some());
}

#[test]
fn invalid_inputs_are_rejected() {
    let mut bad = update();
    bad.poll_interval_secs = 0;
    assert_eq!(bad.validate(), Err(ConfigError::NonPositiveInterval(0)));

    let mut bad = update();
    bad.window_start = "25:00".to_string();
    assert!(matches!(
        bad.validate(),
        Err(ConfigError::InvalidTimeOfDay { field: "window_start", .. })
    ));

    let mut bad = update();
    bad.window_stop = "8pm".to_string();
    assert!(matches!(
        bad.validate(),
        Err(ConfigError::InvalidTimeOfDay { field: "window_stop", .. })
    ));

    let mut bad = update();
    bad.devices.push(device("bf02", " Inverter 1 "));
    assert_eq!(
        bad.validate(),
        Err(ConfigError::DuplicateLabel("Inverter 1".to_string()))
    );

    let mut bad = update();
    bad.devices.push(device("bf03", "  "));
    assert_eq!(bad.validate(), Err(ConfigError::EmptyLabel(2)));
}

#[test]
fn rejected_update_keeps_previous_settings() {
    let owner = SettingsOwner::new(update().validate().expect("valid"));
    let before = owner.snapshot();

    let mut bad = update();
    bad.poll_interval_secs = -5;
    bad.devices.clear();
    assert!(owner.apply_update(bad).is_err());

    assert_eq!(*owner.snapshot(), *before);
}

#[tokio::test]
async fn applied_update_reaches_subscribers() {
    let owner = SettingsOwner::new(update().validate().expect("valid"));
    let mut rx = owner.subscribe();
    let held = owner.snapshot();

    let mut next = update();
    next.poll_interval_secs = 60;
    next.devices.push(device("bf09", "Inverter 3"));
    owner.apply_update(next).expect("apply");

    rx.changed().await.expect("changed");
    let seen = rx.borrow().clone();
    assert_eq!(seen.poll_interval, Duration::from_secs(60));
    assert_eq!(seen.devices.len(), 3);
    // Snapshots taken earlier are not mutated.
    assert_eq!(held.devices.len(), 2);
}

#[test]
fn settings_round_trip_through_update() {
    let settings = update().validate().expect("valid");
    let again = SettingsUpdate::from(&settings).validate().expect("valid");
    assert_eq!(settings, again);
}
