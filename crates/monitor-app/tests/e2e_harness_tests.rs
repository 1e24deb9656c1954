use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};

use cloud_client::{CloudClient, FetchError};
use device_registry::SettingsOwner;
use history_store::HistoryStore;
use monitor_app::{LogDisplay, MonitorConfig};
use poll_scheduler::{Display, PollScheduler};
use types::{CloudCredentials, Device, DeviceStatus, RawStatusItem};

struct StaticClient;

#[async_trait]
impl CloudClient for StaticClient {
    async fn get_status(
        &self,
        _credentials: &CloudCredentials,
        device_id: &str,
    ) -> Result<Vec<RawStatusItem>, FetchError> {
        if device_id == "offline" {
            return Err(FetchError::MissingResult);
        }
        Ok(vec![
            RawStatusItem::number("reverse_energy_total", 1234.0),
            RawStatusItem::number("temp_current", 41.5),
            RawStatusItem::number("ac_power", 1200.0),
            RawStatusItem::text("phase_a", "CPwAAAH0"),
            RawStatusItem::text("pv1_dc_data", "C7gAFAPo"),
        ])
    }
}

fn at(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 3)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

fn device(id: &str, label: &str) -> Device {
    Device {
        device_id: id.to_string(),
        ip: String::new(),
        local_key: String::new(),
        label: label.to_string(),
    }
}

#[tokio::test]
async fn e2e_harness_polls_persists_and_exports() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = MonitorConfig::default();
    config.save_dir = dir.path().join("data");
    config.export_dir = dir.path().join("exports");
    config.devices = vec![
        device("bf01", "Inverter 1"),
        device("offline", "Inverter 2"),
        device("", "Inverter 3"),
    ];
    config.validate().expect("validate");

    let owner = SettingsOwner::new(config.settings().expect("settings"));
    let store = HistoryStore::new(&config.save_dir);
    let display = Arc::new(LogDisplay::new());
    let scheduler = PollScheduler::new(
        owner.subscribe(),
        Arc::new(StaticClient),
        store.clone(),
        display.clone(),
        false,
    );

    for minute in [0, 5] {
        let summary = scheduler.tick_at(at(12, minute)).await;
        assert_eq!(summary.polled, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.unconfigured, 1);
    }
    // Outside the default 06:00-20:00 window.
    assert_eq!(scheduler.tick_at(at(21, 0)).await.skipped, 3);

    assert_eq!(display.status("Inverter 1"), Some(DeviceStatus::Ok));
    assert_eq!(display.status("Inverter 2"), Some(DeviceStatus::Failed));
    assert_eq!(display.status("Inverter 3"), Some(DeviceStatus::Unconfigured));

    let last = display.last_sample("Inverter 1").expect("sample");
    assert_eq!(last.timestamp, at(12, 5));
    assert_eq!(last.important.temp_c, Some(41.5));
    assert_eq!(last.extracted.pv1_dc.dc_voltage, Some(300.0));
    assert_eq!(last.extracted.pv1_dc.dc_current, Some(2.0));
    assert_eq!(last.extracted.pv1_dc.dc_power, Some(100.0));

    let sheet = store
        .read_sheet(at(0, 0).date(), "Inverter 1")
        .await
        .expect("read")
        .expect("sheet");
    assert_eq!(sheet.rows.len(), 2);

    let fresh = HistoryStore::new(&config.save_dir);
    let dataset = fresh.load_at("Inverter 1", at(22, 0)).await.expect("load");
    assert_eq!(dataset.len(), 2);

    let written = fresh
        .export_all(&config.export_dir, at(22, 0))
        .await
        .expect("export");
    assert_eq!(written.len(), 1);
    let csv = std::fs::read_to_string(&written[0]).expect("read csv");
    assert_eq!(csv.lines().count(), 3);
    assert!(csv.contains("2024-06-03 12:05:00,12.34,41.5,120,230,50,0.522,300,2,100"));
}

#[tokio::test]
async fn e2e_failed_cycle_keeps_last_reading() {
    let display = LogDisplay::new();
    let inverter = device("bf01", "Inverter 1");
    let sample = types::Sample::empty(at(10, 0));
    let dataset = history_store::SheetDataset::default();

    display.on_sample(&inverter, &sample, &dataset);
    display.on_status(&inverter, DeviceStatus::Ok);
    display.on_status(&inverter, DeviceStatus::Failed);

    assert_eq!(display.status("Inverter 1"), Some(DeviceStatus::Failed));
    assert_eq!(display.last_sample("Inverter 1"), Some(sample));
}
