//! Append-only monthly record store.
//!
//! # Layout
//!
//! ```text
//! data/items/
//! ├── 2024-01.jsonl
//! └── 2024-02.jsonl
//! ```
//!
//! Each line is one [`Record`]. The partition is chosen by the month of the
//! record's commit timestamp (`observed_at`), never by its publish date.
//! Lines are only ever appended; a crash can at worst leave a torn final
//! line, which readers skip.

use crate::models::{Record, SourceGroup};
use crate::utils::month_key;
use chrono::{Datelike, NaiveDate};
use std::error::Error;
use std::path::PathBuf;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct RecordStore {
    items_dir: PathBuf,
}

impl RecordStore {
    pub fn new(items_dir: impl Into<PathBuf>) -> Self {
        Self {
            items_dir: items_dir.into(),
        }
    }

    /// `items/{month}.jsonl`
    pub fn partition_path(&self, month: &str) -> PathBuf {
        self.items_dir.join(format!("{month}.jsonl"))
    }

    /// Append one record to the partition of its commit month.
    ///
    /// The record is serialized to a single line and written with one
    /// `write_all` in append mode, then flushed.
    ///
    /// # Arguments
    ///
    /// * `record` - The fully built record; `observed_at` picks the partition
    ///
    /// # Returns
    ///
    /// `Ok(())` once the line is flushed. Any I/O or serialization error is
    /// returned and the caller must not admit the record.
    #[instrument(level = "info", skip_all, fields(item_id = %record.item_id))]
    pub async fn append(&self, record: &Record) -> Result<(), Box<dyn Error>> {
        fs::create_dir_all(&self.items_dir).await?;
        let path = self.partition_path(&month_key(&record.observed_at));

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!(path = %path.display(), bytes = line.len(), "Appended record");
        Ok(())
    }

    /// Read every well-formed record of a month. Malformed lines are logged
    /// and skipped; a missing partition reads as empty.
    #[instrument(level = "info", skip(self))]
    pub async fn load_partition(&self, month: &str) -> Result<Vec<Record>, Box<dyn Error>> {
        let path = self.partition_path(month);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (idx, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Record>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %path.display(),
                    line = idx + 1,
                    error = %e,
                    "Skipping malformed line"
                ),
            }
        }
        info!(count = records.len(), "Loaded partition");
        Ok(records)
    }

    /// Records committed on `date`, split into (high, trend).
    #[instrument(level = "info", skip(self))]
    pub async fn records_observed_on(
        &self,
        date: NaiveDate,
    ) -> Result<(Vec<Record>, Vec<Record>), Box<dyn Error>> {
        let month = format!("{:04}-{:02}", date.year(), date.month());
        let (high, trend): (Vec<Record>, Vec<Record>) = self
            .load_partition(&month)
            .await?
            .into_iter()
            .filter(|r| r.observed_at.date_naive() == date)
            .partition(|r| r.source_group == SourceGroup::High);
        info!(high = high.len(), trend = trend.len(), "Records observed on date");
        Ok((high, trend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{jst, record};
    use std::io::Write;

    #[tokio::test]
    async fn test_append_goes_to_commit_month() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("items"));
        let rec = record("https://example.com/a", SourceGroup::High, jst(2024, 2, 1, 8));
        store.append(&rec).await.unwrap();

        assert!(store.partition_path("2024-02").exists());
        let loaded = store.load_partition("2024-02").await.unwrap();
        assert_eq!(loaded, vec![rec]);
    }

    #[tokio::test]
    async fn test_append_never_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        let first = record("https://example.com/a", SourceGroup::High, jst(2024, 1, 15, 9));
        let second = record("https://example.com/b", SourceGroup::Trend, jst(2024, 1, 15, 10));
        store.append(&first).await.unwrap();
        let before = std::fs::read_to_string(store.partition_path("2024-01")).unwrap();
        store.append(&second).await.unwrap();
        let after = std::fs::read_to_string(store.partition_path("2024-01")).unwrap();

        assert!(after.starts_with(&before));
        assert_eq!(after.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_missing_partition_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        assert!(store.load_partition("1999-12").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        let a = record("https://example.com/a", SourceGroup::High, jst(2024, 1, 15, 9));
        let b = record("https://example.com/b", SourceGroup::High, jst(2024, 1, 15, 10));
        store.append(&a).await.unwrap();
        {
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(store.partition_path("2024-01"))
                .unwrap();
            writeln!(f, "{{\"item_id\": \"torn").unwrap();
            writeln!(f).unwrap();
        }
        store.append(&b).await.unwrap();

        let loaded = store.load_partition("2024-01").await.unwrap();
        assert_eq!(loaded, vec![a, b]);
    }

    #[tokio::test]
    async fn test_records_observed_on_filters_by_day_and_splits_groups() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        let day = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();

        let later_trend = record("https://example.com/t", SourceGroup::Trend, jst(2024, 1, 15, 23));
        let high = record("https://example.com/h", SourceGroup::High, jst(2024, 1, 15, 0));
        let other_day = record("https://example.com/x", SourceGroup::High, jst(2024, 1, 16, 0));
        // Appended out of chronological order on purpose.
        for r in [&later_trend, &other_day, &high] {
            store.append(r).await.unwrap();
        }

        let (h, t) = store.records_observed_on(day).await.unwrap();
        assert_eq!(h, vec![high]);
        assert_eq!(t, vec![later_trend]);
    }
}
