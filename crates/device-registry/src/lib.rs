use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveTime;
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

use types::{CloudCredentials, Device, RecordingWindow};

const TIME_OF_DAY_FORMAT: &str = "%H:%M";

/// Validated, immutable configuration shared with the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub devices: Vec<Device>,
    pub window: RecordingWindow,
    pub poll_interval: Duration,
    pub save_dir: PathBuf,
    pub credentials: CloudCredentials,
}

impl Settings {
    pub fn configured(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter().filter(|device| device.is_configured())
    }

    pub fn unconfigured(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter().filter(|device| !device.is_configured())
    }

    pub fn device(&self, label: &str) -> Option<&Device> {
        self.devices.iter().find(|device| device.label == label)
    }
}

/// Unvalidated settings as entered by a user or read from a config file.
#[derive(Debug, Clone)]
pub struct SettingsUpdate {
    pub devices: Vec<Device>,
    /// Time of day as `HH:MM`.
    pub window_start: String,
    /// Time of day as `HH:MM`.
    pub window_stop: String,
    pub poll_interval_secs: i64,
    pub save_dir: PathBuf,
    pub credentials: CloudCredentials,
}

impl SettingsUpdate {
    pub fn validate(self) -> Result<Settings, ConfigError> {
        let start = parse_time_of_day("window_start", &self.window_start)?;
        let stop = parse_time_of_day("window_stop", &self.window_stop)?;

        if self.poll_interval_secs <= 0 {
            return Err(ConfigError::NonPositiveInterval(self.poll_interval_secs));
        }

        let mut labels = HashSet::new();
        for (index, device) in self.devices.iter().enumerate() {
            let label = device.label.trim();
            if label.is_empty() {
                return Err(ConfigError::EmptyLabel(index));
            }
            if !labels.insert(label.to_string()) {
                return Err(ConfigError::DuplicateLabel(label.to_string()));
            }
        }

        if self.save_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptySaveDir);
        }

        let devices = self
            .devices
            .into_iter()
            .map(|device| Device {
                device_id: device.device_id.trim().to_string(),
                label: device.label.trim().to_string(),
                ..device
            })
            .collect();

        Ok(Settings {
            devices,
            window: RecordingWindow::new(start, stop),
            poll_interval: Duration::from_secs(self.poll_interval_secs as u64),
            save_dir: self.save_dir,
            credentials: self.credentials,
        })
    }
}

impl From<&Settings> for SettingsUpdate {
    fn from(settings: &Settings) -> Self {
        Self {
            devices: settings.devices.clone(),
            window_start: settings.window.start.format(TIME_OF_DAY_FORMAT).to_string(),
            window_stop: settings.window.stop.format(TIME_OF_DAY_FORMAT).to_string(),
            poll_interval_secs: settings.poll_interval.as_secs() as i64,
            save_dir: settings.save_dir.clone(),
            credentials: settings.credentials.clone(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be HH:MM, got {value:?}")]
    InvalidTimeOfDay { field: &'static str, value: String },
    #[error("poll interval must be a positive number of seconds, got {0}")]
    NonPositiveInterval(i64),
    #[error("device #{0} has an empty label")]
    EmptyLabel(usize),
    #[error("device label {0:?} is used more than once")]
    DuplicateLabel(String),
    #[error("save directory must not be empty")]
    EmptySaveDir,
}

pub fn parse_time_of_day(field: &'static str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), TIME_OF_DAY_FORMAT).map_err(|_| {
        ConfigError::InvalidTimeOfDay {
            field,
            value: value.to_string(),
        }
    })
}

/// Sole owner of the live settings. Consumers hold a receiver and read
/// `Arc<Settings>` snapshots; only `apply_update` replaces them.
#[derive(Debug)]
pub struct SettingsOwner {
    tx: watch::Sender<Arc<Settings>>,
}

impl SettingsOwner {
    pub fn new(settings: Settings) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(settings));
        Self { tx }
    }

    pub fn snapshot(&self) -> Arc<Settings> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Settings>> {
        self.tx.subscribe()
    }

    /// Validates `update` and swaps it in. On error the current settings stay live.
    pub fn apply_update(&self, update: SettingsUpdate) -> Result<Arc<Settings>, ConfigError> {
        let settings = Arc::new(update.validate()?);
        let previous = self.tx.send_replace(settings.clone());
        info!(
            devices = settings.devices.len(),
            configured = settings.configured().count(),
            previous_devices = previous.devices.len(),
            poll_interval_secs = settings.poll_interval.as_secs(),
            "settings applied"
        );
        Ok(settings)
    }
}
