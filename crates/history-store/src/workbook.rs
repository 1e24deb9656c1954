use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use types::{HistoryRecord, HISTORY_COLUMNS};

use crate::StoreError;

/// One day-file: a sheet per device label.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workbook {
    #[serde(default)]
    pub sheets: BTreeMap<String, Sheet>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    #[serde(default)]
    pub header: Vec<String>,
    #[serde(default)]
    pub rows: Vec<HistoryRecord>,
}

impl Sheet {
    fn new() -> Self {
        Self {
            header: header_row(),
            rows: Vec::new(),
        }
    }
}

impl Workbook {
    /// Returns the sheet for `label`, creating it with its header row if new.
    pub fn sheet_mut(&mut self, label: &str) -> &mut Sheet {
        let sheet = self
            .sheets
            .entry(label.to_string())
            .or_insert_with(Sheet::new);
        if sheet.header.is_empty() {
            sheet.header = header_row();
        }
        sheet
    }
}

fn header_row() -> Vec<String> {
    HISTORY_COLUMNS.iter().map(|column| column.to_string()).collect()
}

pub async fn read(path: &Path) -> Result<Option<Workbook>, StoreError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Writes the workbook next to `path` and renames it into place.
pub async fn write(path: &Path, workbook: &Workbook) -> Result<(), StoreError> {
    let payload = serde_json::to_vec_pretty(workbook).map_err(StoreError::Encode)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    let tmp = temp_path(path);
    tokio::fs::write(&tmp, &payload)
        .await
        .map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}
