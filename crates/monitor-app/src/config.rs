use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use cloud_client::ClientConfig;
use device_registry::{Settings, SettingsUpdate};
use types::{CloudCredentials, Device};

const ENV_PREFIX: &str = "INVERTER_MONITOR_";
const DEFAULT_REGION: &str = "eu";
const DEFAULT_WINDOW_START: &str = "06:00";
const DEFAULT_WINDOW_STOP: &str = "20:00";
const DEFAULT_INTERVAL_SECS: i64 = 300;
const DEFAULT_SAVE_DIR: &str = "data";
const DEFAULT_EXPORT_DIR: &str = "exports";
const DEFAULT_DEVICE_COUNT: usize = 4;

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub credentials: CloudCredentials,
    pub devices: Vec<Device>,
    pub recording_start: String,
    pub recording_stop: String,
    pub interval_secs: i64,
    pub save_dir: PathBuf,
    pub export_dir: PathBuf,
    pub client: ClientConfig,
    pub simulate: bool,
    pub metrics_listen: Option<String>,
}

impl MonitorConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_path(None)
    }

    pub fn load_with_path(config_path: Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = load_file_config(config_path.as_deref())? {
            apply_file_config(&mut config, file_config);
        }

        apply_env_overrides(&mut config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.client.timeout_ms == 0 {
            anyhow::bail!("client.timeout_ms must be >= 1");
        }
        if self.client.retry_backoff_ms == 0 {
            anyhow::bail!("client.retry_backoff_ms must be >= 1");
        }
        if self.client.retry_max_backoff_ms < self.client.retry_backoff_ms {
            anyhow::bail!("client.retry_max_backoff_ms must be >= client.retry_backoff_ms");
        }
        if self.export_dir.as_os_str().is_empty() {
            anyhow::bail!("storage.export_dir must be non-empty");
        }
        if self.credentials.region.trim().is_empty() && self.credentials.base_url.is_none() {
            anyhow::bail!("cloud.region or cloud.base_url must be set");
        }
        if let Some(ref listen) = self.metrics_listen {
            listen
                .parse::<SocketAddr>()
                .with_context(|| format!("monitor.metrics_listen {listen:?} is not a socket address"))?;
        }

        let settings = self.settings()?;
        let budget = self.client.max_fetch_duration();
        if budget >= settings.poll_interval {
            anyhow::bail!(
                "client fetch budget {}ms must be shorter than recording.interval_secs ({}s)",
                budget.as_millis(),
                settings.poll_interval.as_secs()
            );
        }
        Ok(())
    }

    /// The registry-facing part of the configuration, unvalidated.
    pub fn settings_update(&self) -> SettingsUpdate {
        SettingsUpdate {
            devices: self.devices.clone(),
            window_start: self.recording_start.clone(),
            window_stop: self.recording_stop.clone(),
            poll_interval_secs: self.interval_secs,
            save_dir: self.save_dir.clone(),
            credentials: self.credentials.clone(),
        }
    }

    pub fn settings(&self) -> Result<Settings> {
        self.settings_update()
            .validate()
            .context("settings validation failed")
    }

    /// Writes this configuration as a config file; the format follows the extension.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = FileConfig::from(self);
        let content = match path.extension().and_then(|value| value.to_str()) {
            Some("json") => serde_json::to_string_pretty(&file).context("encode json config")?,
            _ => toml::to_string_pretty(&file).context("encode toml config")?,
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config dir {}", parent.display()))?;
        }
        fs::write(path, content).with_context(|| format!("write config file {}", path.display()))
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            credentials: CloudCredentials {
                region: DEFAULT_REGION.to_string(),
                ..CloudCredentials::default()
            },
            devices: (1..=DEFAULT_DEVICE_COUNT)
                .map(|index| Device {
                    device_id: String::new(),
                    ip: String::new(),
                    local_key: String::new(),
                    label: format!("Inverter {index}"),
                })
                .collect(),
            recording_start: DEFAULT_WINDOW_START.to_string(),
            recording_stop: DEFAULT_WINDOW_STOP.to_string(),
            interval_secs: DEFAULT_INTERVAL_SECS,
            save_dir: PathBuf::from(DEFAULT_SAVE_DIR),
            export_dir: PathBuf::from(DEFAULT_EXPORT_DIR),
            client: ClientConfig::default(),
            simulate: false,
            metrics_listen: None,
        }
    }
}

fn apply_env_overrides(config: &mut MonitorConfig) {
    if let Some(value) = env_string("API_KEY") {
        config.credentials.api_key = value;
    }
    if let Some(value) = env_string("API_SECRET") {
        config.credentials.api_secret = value;
    }
    if let Some(value) = env_string("REGION") {
        config.credentials.region = value;
    }
    config.credentials.access_token = env_string("ACCESS_TOKEN").or(config.credentials.access_token.take());
    config.credentials.base_url = env_string("BASE_URL").or(config.credentials.base_url.take());

    if let Some(value) = env_string("WINDOW_START") {
        config.recording_start = value;
    }
    if let Some(value) = env_string("WINDOW_STOP") {
        config.recording_stop = value;
    }
    config.interval_secs = parse_env("INTERVAL_SECS").unwrap_or(config.interval_secs);

    if let Some(value) = env_string("SAVE_DIR") {
        config.save_dir = PathBuf::from(value);
    }
    if let Some(value) = env_string("EXPORT_DIR") {
        config.export_dir = PathBuf::from(value);
    }

    config.client.timeout_ms = parse_env("TIMEOUT_MS").unwrap_or(config.client.timeout_ms);
    config.client.retry_count = parse_env("RETRY_COUNT").unwrap_or(config.client.retry_count);

    config.simulate = parse_env("SIMULATE").unwrap_or(config.simulate);
    config.metrics_listen = env_string("METRICS_LISTEN").or(config.metrics_listen.take());
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct FileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    cloud: Option<FileCloudConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    recording: Option<FileRecordingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    storage: Option<FileStorageConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client: Option<FileClientConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    monitor: Option<FileMonitorConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    devices: Option<Vec<FileDeviceConfig>>,
}

#[derive(Debug, Deserialize, Serialize)]
struct FileCloudConfig {
    api_key: Option<String>,
    api_secret: Option<String>,
    region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    base_url: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct FileDeviceConfig {
    device_id: Option<String>,
    ip: Option<String>,
    local_key: Option<String>,
    #[serde(alias = "sheet")]
    label: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct FileRecordingConfig {
    start: Option<String>,
    stop: Option<String>,
    interval_secs: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize)]
struct FileStorageConfig {
    save_dir: Option<PathBuf>,
    export_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize)]
struct FileClientConfig {
    timeout_ms: Option<u64>,
    retry_count: Option<usize>,
    retry_backoff_ms: Option<u64>,
    retry_max_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize)]
struct FileMonitorConfig {
    simulate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metrics_listen: Option<String>,
}

impl From<&MonitorConfig> for FileConfig {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            cloud: Some(FileCloudConfig {
                api_key: Some(config.credentials.api_key.clone()),
                api_secret: Some(config.credentials.api_secret.clone()),
                region: Some(config.credentials.region.clone()),
                access_token: config.credentials.access_token.clone(),
                base_url: config.credentials.base_url.clone(),
            }),
            recording: Some(FileRecordingConfig {
                start: Some(config.recording_start.clone()),
                stop: Some(config.recording_stop.clone()),
                interval_secs: Some(config.interval_secs),
            }),
            storage: Some(FileStorageConfig {
                save_dir: Some(config.save_dir.clone()),
                export_dir: Some(config.export_dir.clone()),
            }),
            client: Some(FileClientConfig {
                timeout_ms: Some(config.client.timeout_ms),
                retry_count: Some(config.client.retry_count),
                retry_backoff_ms: Some(config.client.retry_backoff_ms),
                retry_max_backoff_ms: Some(config.client.retry_max_backoff_ms),
            }),
            monitor: Some(FileMonitorConfig {
                simulate: Some(config.simulate),
                metrics_listen: config.metrics_listen.clone(),
            }),
            devices: Some(
                config
                    .devices
                    .iter()
                    .map(|device| FileDeviceConfig {
                        device_id: Some(device.device_id.clone()),
                        ip: Some(device.ip.clone()),
                        local_key: Some(device.local_key.clone()),
                        label: device.label.clone(),
                    })
                    .collect(),
            ),
        }
    }
}

fn load_file_config(config_path: Option<&str>) -> Result<Option<FileConfig>> {
    let path = match config_path {
        Some(path) => path.to_string(),
        None => match env_string("CONFIG") {
            Some(value) => value,
            None => return Ok(None),
        },
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("read config file {path}"))?;
    let ext = Path::new(&path).extension().and_then(|value| value.to_str());

    let config = match ext {
        Some("json") => serde_json::from_str(&content).context("parse json config")?,
        _ => toml::from_str(&content).context("parse toml config")?,
    };

    Ok(Some(config))
}

fn apply_file_config(config: &mut MonitorConfig, file: FileConfig) {
    if let Some(cloud) = file.cloud {
        if let Some(api_key) = cloud.api_key {
            config.credentials.api_key = api_key;
        }
        if let Some(api_secret) = cloud.api_secret {
            config.credentials.api_secret = api_secret;
        }
        if let Some(region) = cloud.region {
            config.credentials.region = region;
        }
        if cloud.access_token.is_some() {
            config.credentials.access_token = cloud.access_token;
        }
        if cloud.base_url.is_some() {
            config.credentials.base_url = cloud.base_url;
        }
    }

    if let Some(devices) = file.devices {
        config.devices = devices
            .into_iter()
            .map(|device| Device {
                device_id: device.device_id.unwrap_or_default(),
                ip: device.ip.unwrap_or_default(),
                local_key: device.local_key.unwrap_or_default(),
                label: device.label,
            })
            .collect();
    }

    if let Some(recording) = file.recording {
        if let Some(start) = recording.start {
            config.recording_start = start;
        }
        if let Some(stop) = recording.stop {
            config.recording_stop = stop;
        }
        if let Some(interval) = recording.interval_secs {
            config.interval_secs = interval;
        }
    }

    if let Some(storage) = file.storage {
        if let Some(save_dir) = storage.save_dir {
            config.save_dir = save_dir;
        }
        if let Some(export_dir) = storage.export_dir {
            config.export_dir = export_dir;
        }
    }

    if let Some(client) = file.client {
        if let Some(timeout_ms) = client.timeout_ms {
            config.client.timeout_ms = timeout_ms;
        }
        if let Some(retry_count) = client.retry_count {
            config.client.retry_count = retry_count;
        }
        if let Some(backoff) = client.retry_backoff_ms {
            config.client.retry_backoff_ms = backoff;
        }
        if let Some(max_backoff) = client.retry_max_backoff_ms {
            config.client.retry_max_backoff_ms = max_backoff;
        }
    }

    if let Some(monitor) = file.monitor {
        if let Some(simulate) = monitor.simulate {
            config.simulate = simulate;
        }
        if monitor.metrics_listen.is_some() {
            config.metrics_listen = monitor.metrics_listen;
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{key}")).ok()
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|value| value.parse().ok())
}
