use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use history_store::SheetDataset;
use poll_scheduler::Display;
use tracing::{info, warn};
use types::{Device, DeviceStatus, Sample};

/// Headless display: logs each reading and keeps the last one per device,
/// so a failed cycle still has values to show.
#[derive(Debug, Default)]
pub struct LogDisplay {
    last: Mutex<HashMap<String, Sample>>,
    statuses: Mutex<HashMap<String, DeviceStatus>>,
}

impl LogDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_sample(&self, label: &str) -> Option<Sample> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(label)
            .cloned()
    }

    pub fn status(&self, label: &str) -> Option<DeviceStatus> {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(label)
            .copied()
    }
}

impl Display for LogDisplay {
    fn on_sample(&self, device: &Device, sample: &Sample, dataset: &SheetDataset) {
        info!(
            device = %device.label,
            timestamp = %sample.timestamp,
            ac_power_w = ?sample.important.ac_power_w,
            ac_voltage = ?sample.extracted.phase_a.ac_voltage,
            ac_current = ?sample.extracted.phase_a.ac_current,
            dc_power = ?sample.extracted.pv1_dc.dc_power,
            rows = dataset.len(),
            "reading"
        );
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device.label.clone(), sample.clone());
    }

    fn on_status(&self, device: &Device, status: DeviceStatus) {
        let previous = self
            .statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device.label.clone(), status);
        if previous == Some(status) {
            return;
        }

        match status {
            DeviceStatus::Failed => {
                let shown = self.last_sample(&device.label).map(|sample| sample.timestamp);
                warn!(device = %device.label, last_reading = ?shown, "device status failed");
            }
            _ => info!(device = %device.label, status = %status, "device status changed"),
        }
    }
}
