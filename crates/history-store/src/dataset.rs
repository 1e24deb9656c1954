use chrono::{Duration, NaiveDateTime};
use types::{HistoryRecord, HISTORY_COLUMNS};

/// Time window applied to a working dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryRange {
    LastHour,
    LastDay,
    Last7Days,
    /// Half-open `[start, end)`.
    Custom {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    All,
}

impl HistoryRange {
    pub fn includes(&self, timestamp: NaiveDateTime, now: NaiveDateTime) -> bool {
        match self {
            HistoryRange::LastHour => timestamp > now - Duration::hours(1),
            HistoryRange::LastDay => timestamp > now - Duration::days(1),
            HistoryRange::Last7Days => timestamp > now - Duration::days(7),
            HistoryRange::Custom { start, end } => *start <= timestamp && timestamp < *end,
            HistoryRange::All => true,
        }
    }
}

/// Ordered records for one device, in `HISTORY_COLUMNS` shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetDataset {
    records: Vec<HistoryRecord>,
    seeded: bool,
}

impl SheetDataset {
    pub fn new(records: Vec<HistoryRecord>) -> Self {
        Self {
            records,
            seeded: false,
        }
    }

    /// Schema-complete stand-in for a device with no history: one zero row.
    /// The row is dropped by the first real record.
    pub fn seeded(now: NaiveDateTime) -> Self {
        Self {
            records: vec![HistoryRecord::zero(now)],
            seeded: true,
        }
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    pub fn columns(&self) -> &'static [&'static str; 10] {
        &HISTORY_COLUMNS
    }

    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records that came from a device, without the seed row.
    pub fn observed(&self) -> &[HistoryRecord] {
        if self.seeded {
            &[]
        } else {
            &self.records
        }
    }

    pub(crate) fn push(&mut self, record: HistoryRecord) {
        if self.seeded {
            self.records.clear();
            self.seeded = false;
        }
        self.records.push(record);
    }

    pub fn query(&self, range: HistoryRange, now: NaiveDateTime) -> Vec<HistoryRecord> {
        self.observed()
            .iter()
            .filter(|record| range.includes(record.timestamp, now))
            .cloned()
            .collect()
    }
}
