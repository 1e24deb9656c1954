use std::fmt;

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Column order shared by persisted day-files and CSV exports.
pub const HISTORY_COLUMNS: [&str; 10] = [
    "Timestamp",
    "Reverse Energy (kWh)",
    "Temp (°C)",
    "AC Power (W)",
    "AC Voltage (V)",
    "Frequency (Hz)",
    "AC Current (A)",
    "DC Voltage (V)",
    "DC Current (A)",
    "DC Power (W)",
];

/// DPS value before any decoding; composite fields arrive as base64 text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
    Other(serde_json::Value),
}

impl Default for RawValue {
    fn default() -> Self {
        RawValue::Other(serde_json::Value::Null)
    }
}

/// One `{code, value}` entry of a cloud status response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawStatusItem {
    pub code: String,
    #[serde(default)]
    pub value: RawValue,
}

impl RawStatusItem {
    pub fn number(code: impl Into<String>, value: f64) -> Self {
        Self {
            code: code.into(),
            value: RawValue::Number(value),
        }
    }

    pub fn text(code: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            value: RawValue::Text(value.into()),
        }
    }
}

/// Scalar DPS values. `None` means the device did not report a usable value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportantDps {
    pub reverse_energy_kwh: Option<f64>,
    pub temp_c: Option<f64>,
    pub ac_power_w: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseA {
    pub ac_voltage: Option<f64>,
    pub frequency: Option<f64>,
    /// Derived from AC power and voltage, never reported by the device.
    pub ac_current: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PvDc {
    pub dc_voltage: Option<f64>,
    pub dc_current: Option<f64>,
    pub dc_power: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDps {
    pub phase_a: PhaseA,
    pub pv1_dc: PvDc,
}

/// A decoded reading for one device, produced once per poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: NaiveDateTime,
    pub important: ImportantDps,
    pub extracted: ExtractedDps,
}

impl Sample {
    pub fn empty(timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            important: ImportantDps::default(),
            extracted: ExtractedDps::default(),
        }
    }
}

/// One persisted row, in `HISTORY_COLUMNS` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: NaiveDateTime,
    pub reverse_energy_kwh: Option<f64>,
    pub temp_c: Option<f64>,
    pub ac_power_w: Option<f64>,
    pub ac_voltage_v: Option<f64>,
    pub frequency_hz: Option<f64>,
    pub ac_current_a: Option<f64>,
    pub dc_voltage_v: Option<f64>,
    pub dc_current_a: Option<f64>,
    pub dc_power_w: Option<f64>,
}

impl HistoryRecord {
    pub fn from_sample(sample: &Sample) -> Self {
        let phase_a = &sample.extracted.phase_a;
        let pv1_dc = &sample.extracted.pv1_dc;
        Self {
            timestamp: sample.timestamp,
            reverse_energy_kwh: sample.important.reverse_energy_kwh,
            temp_c: sample.important.temp_c,
            ac_power_w: sample.important.ac_power_w,
            ac_voltage_v: phase_a.ac_voltage,
            frequency_hz: phase_a.frequency,
            ac_current_a: phase_a.ac_current.map(round3),
            dc_voltage_v: pv1_dc.dc_voltage,
            dc_current_a: pv1_dc.dc_current,
            dc_power_w: pv1_dc.dc_power,
        }
    }

    /// Placeholder row used when a device has no history yet.
    pub fn zero(timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            reverse_energy_kwh: Some(0.0),
            temp_c: Some(0.0),
            ac_power_w: Some(0.0),
            ac_voltage_v: Some(0.0),
            frequency_hz: Some(0.0),
            ac_current_a: Some(0.0),
            dc_voltage_v: Some(0.0),
            dc_current_a: Some(0.0),
            dc_power_w: Some(0.0),
        }
    }

    /// The nine measurement columns following `Timestamp`.
    pub fn values(&self) -> [Option<f64>; 9] {
        [
            self.reverse_energy_kwh,
            self.temp_c,
            self.ac_power_w,
            self.ac_voltage_v,
            self.frequency_hz,
            self.ac_current_a,
            self.dc_voltage_v,
            self.dc_current_a,
            self.dc_power_w,
        ]
    }
}

fn round3(value: f64) -> f64 {
    (value * 1_000.0).round() / 1_000.0
}

/// A monitored inverter. An empty `device_id` marks it as unconfigured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub local_key: String,
    /// Display name; doubles as the sheet name in day-files.
    pub label: String,
}

impl Device {
    pub fn is_configured(&self) -> bool {
        !self.device_id.trim().is_empty()
    }
}

/// Daily time-of-day interval during which polling is permitted, bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingWindow {
    pub start: NaiveTime,
    pub stop: NaiveTime,
}

impl RecordingWindow {
    pub fn new(start: NaiveTime, stop: NaiveTime) -> Self {
        Self { start, stop }
    }

    /// A window whose start is after its stop wraps past midnight.
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.stop {
            self.start <= time && time <= self.stop
        } else {
            time >= self.start || time <= self.stop
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Ok,
    Failed,
    Simulated,
    Unconfigured,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Ok => "ok",
            DeviceStatus::Failed => "failed",
            DeviceStatus::Simulated => "simulated",
            DeviceStatus::Unconfigured => "unconfigured",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cloud API credentials. Re-read whenever settings are applied.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub region: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl fmt::Debug for CloudCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("region", &self.region)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .finish()
    }
}
