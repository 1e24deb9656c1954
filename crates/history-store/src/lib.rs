mod dataset;
mod export;
mod workbook;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime};
use thiserror::Error;
use tracing::{debug, info, warn};
use types::HistoryRecord;

pub use dataset::{HistoryRange, SheetDataset};
pub use export::TIMESTAMP_FORMAT;
pub use workbook::{Sheet, Workbook};

const DAY_FILE_EXT: &str = "json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("day-file {path} is not a valid workbook: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("workbook encode error: {0}")]
    Encode(serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("no working dataset loaded for {0:?}")]
    NotLoaded(String),
}

/// Day-file persistence plus the per-device in-memory working set.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    root: PathBuf,
    /// One async mutex per day-file; every read-modify-write holds it.
    file_locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
    working: RwLock<HashMap<String, Arc<SheetDataset>>>,
}

impl HistoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                root: root.into(),
                file_locks: Mutex::new(HashMap::new()),
                working: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn month_dir(&self, date: NaiveDate) -> PathBuf {
        self.inner.root.join(date.format("%Y-%m").to_string())
    }

    /// `<root>/<YYYY-MM>/<YYYY-MM-DD>.json`
    pub fn day_path(&self, date: NaiveDate) -> PathBuf {
        self.month_dir(date)
            .join(format!("{}.{DAY_FILE_EXT}", date.format("%Y-%m-%d")))
    }

    /// Persists `record` into the sheet for `label` in the record's day-file and
    /// appends it to the working set. Returns the updated working snapshot.
    pub async fn append(
        &self,
        record: HistoryRecord,
        label: &str,
    ) -> Result<Arc<SheetDataset>, StoreError> {
        let date = record.timestamp.date();
        let path = self.day_path(date);
        let lock = self.file_lock(&path);
        let _guard = lock.lock().await;

        if self.working_set(label).is_none() {
            let records = self.scan_month(label, record.timestamp).await?;
            write_lock(&self.inner.working)
                .entry(label.to_string())
                .or_insert_with(|| Arc::new(SheetDataset::new(records)));
        }

        let mut workbook = workbook::read(&path).await?.unwrap_or_default();
        let sheet = workbook.sheet_mut(label);
        sheet.rows.push(record.clone());
        let rows = sheet.rows.len();
        workbook::write(&path, &workbook).await?;
        debug!(sheet = %label, path = %path.display(), rows, "record persisted");

        let mut working = write_lock(&self.inner.working);
        let entry = working
            .entry(label.to_string())
            .or_insert_with(|| Arc::new(SheetDataset::default()));
        Arc::make_mut(entry).push(record);
        Ok(entry.clone())
    }

    /// Rehydrates the working set for `label` from the current month's day-files.
    /// With no history the dataset holds a single zero-valued seed row.
    pub async fn load(&self, label: &str) -> Result<Arc<SheetDataset>, StoreError> {
        self.load_at(label, Local::now().naive_local()).await
    }

    pub async fn load_at(
        &self,
        label: &str,
        now: NaiveDateTime,
    ) -> Result<Arc<SheetDataset>, StoreError> {
        let records = self.scan_month(label, now).await?;
        let dataset = if records.is_empty() {
            SheetDataset::seeded(now)
        } else {
            SheetDataset::new(records)
        };
        let dataset = Arc::new(dataset);
        write_lock(&self.inner.working).insert(label.to_string(), dataset.clone());
        Ok(dataset)
    }

    /// Current working snapshot; never blocks on writers for longer than a pointer swap.
    pub fn working_set(&self, label: &str) -> Option<Arc<SheetDataset>> {
        read_lock(&self.inner.working).get(label).cloned()
    }

    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = read_lock(&self.inner.working).keys().cloned().collect();
        labels.sort();
        labels
    }

    pub fn query(&self, label: &str, range: HistoryRange, now: NaiveDateTime) -> Vec<HistoryRecord> {
        self.working_set(label)
            .map(|dataset| dataset.query(range, now))
            .unwrap_or_default()
    }

    /// Reads one persisted sheet as stored on disk.
    pub async fn read_sheet(&self, date: NaiveDate, label: &str) -> Result<Option<Sheet>, StoreError> {
        let path = self.day_path(date);
        Ok(workbook::read(&path)
            .await?
            .and_then(|mut workbook| workbook.sheets.remove(label)))
    }

    /// Writes the working set for `label` to a CSV file. Returns the row count.
    pub async fn export_snapshot(&self, label: &str, destination: &Path) -> Result<usize, StoreError> {
        let dataset = self
            .working_set(label)
            .ok_or_else(|| StoreError::NotLoaded(label.to_string()))?;
        let payload = export::render_csv(&dataset)?;

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(destination, payload)
            .await
            .map_err(|source| StoreError::Io {
                path: destination.to_path_buf(),
                source,
            })?;

        let rows = dataset.observed().len();
        info!(sheet = %label, path = %destination.display(), rows, "history exported");
        Ok(rows)
    }

    /// Exports every working set holding observed records to
    /// `<dir>/<label>_historical_<stamp>.csv`.
    pub async fn export_all(&self, dir: &Path, now: NaiveDateTime) -> Result<Vec<PathBuf>, StoreError> {
        let stamp = now.format("%Y%m%d_%H%M%S");
        let mut written = Vec::new();
        for label in self.labels() {
            let is_empty = self
                .working_set(&label)
                .map(|dataset| dataset.observed().is_empty())
                .unwrap_or(true);
            if is_empty {
                continue;
            }
            let path = dir.join(format!("{}_historical_{stamp}.csv", export::file_stem(&label)));
            self.export_snapshot(&label, &path).await?;
            written.push(path);
        }
        Ok(written)
    }

    async fn scan_month(
        &self,
        label: &str,
        now: NaiveDateTime,
    ) -> Result<Vec<HistoryRecord>, StoreError> {
        let dir = self.month_dir(now.date());
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(sheet = %label, dir = %dir.display(), "no history for current month");
                return Ok(Vec::new());
            }
            Err(source) => return Err(StoreError::Io { path: dir, source }),
        };

        let mut files = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let path = entry.path();
                    if path.extension().and_then(|ext| ext.to_str()) == Some(DAY_FILE_EXT) {
                        files.push(path);
                    }
                }
                Ok(None) => break,
                Err(source) => return Err(StoreError::Io { path: dir, source }),
            }
        }
        files.sort();

        // Day-files are replaced by rename, so reads need no partition lock.
        let mut records = Vec::new();
        for path in files {
            match workbook::read(&path).await {
                Ok(Some(mut workbook)) => {
                    if let Some(sheet) = workbook.sheets.remove(label) {
                        records.extend(sheet.rows);
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(sheet = %label, path = %path.display(), error = %err, "skipping unreadable day-file");
                }
            }
        }

        records.sort_by_key(|record| record.timestamp);
        debug!(sheet = %label, month = now.month(), rows = records.len(), "history scanned");
        Ok(records)
    }

    fn file_lock(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .inner
            .file_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(path.to_path_buf()).or_default().clone()
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
