use types::{HistoryRecord, HISTORY_COLUMNS};

use crate::dataset::SheetDataset;
use crate::StoreError;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const UNAVAILABLE: &str = "N/A";

pub fn render_csv(dataset: &SheetDataset) -> Result<Vec<u8>, StoreError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(HISTORY_COLUMNS)?;
    for record in dataset.observed() {
        writer.write_record(row(record))?;
    }
    writer
        .into_inner()
        .map_err(|err| StoreError::Csv(csv::Error::from(err.into_error())))
}

fn row(record: &HistoryRecord) -> Vec<String> {
    let mut row = Vec::with_capacity(HISTORY_COLUMNS.len());
    row.push(record.timestamp.format(TIMESTAMP_FORMAT).to_string());
    row.extend(record.values().iter().map(|value| match value {
        Some(value) => value.to_string(),
        None => UNAVAILABLE.to_string(),
    }));
    row
}

/// File-name-safe form of a device label.
pub fn file_stem(label: &str) -> String {
    label
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
