/// Append-only history of traffic readings.
///
/// Readings are held in memory, time-ordered per intersection, and are never
/// rewritten: the only mutations are `append` and `prune`. Queries return
/// owned clones (copy-on-read), so a training snapshot built from `query`
/// stays valid for the whole training cycle even if `prune` runs
/// concurrently — the store never needs to be locked for the duration of
/// training.
///
/// An optional JSONL archive mirrors every accepted reading to disk. Archive
/// writes happen outside the in-memory lock and never sit on any read path;
/// an archive write failure is the pipeline's one unrecoverable storage
/// error and is surfaced upward rather than retried silently.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};

use crate::logging::{self, Component};
use crate::model::{PipelineError, Reading};

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct HistoryStore {
    /// Per-intersection readings in ascending timestamp order.
    inner: RwLock<HashMap<String, Vec<Reading>>>,
    /// Optional JSONL archive path; the mutex serializes appends.
    archive: Option<Mutex<PathBuf>>,
}

impl HistoryStore {
    /// In-memory store without an archive.
    pub fn new() -> Self {
        HistoryStore {
            inner: RwLock::new(HashMap::new()),
            archive: None,
        }
    }

    /// Store that additionally mirrors accepted readings to a JSONL file.
    pub fn with_archive(path: impl Into<PathBuf>) -> Self {
        HistoryStore {
            inner: RwLock::new(HashMap::new()),
            archive: Some(Mutex::new(path.into())),
        }
    }

    /// Appends a batch of readings, returning how many were accepted.
    ///
    /// A reading older than the newest stored timestamp for its intersection
    /// violates the per-intersection monotonicity invariant; it is skipped
    /// with a warning rather than spliced in, because stored history is
    /// never reordered or rewritten.
    pub fn append(&self, readings: &[Reading]) -> Result<usize, PipelineError> {
        let mut accepted = Vec::with_capacity(readings.len());
        {
            let mut inner = self.inner.write().unwrap();
            for reading in readings {
                let series = inner.entry(reading.intersection_id.clone()).or_default();
                if let Some(last) = series.last() {
                    if reading.timestamp < last.timestamp {
                        logging::warn(
                            Component::History,
                            Some(&reading.intersection_id),
                            &format!(
                                "dropping out-of-order reading at {} (newest stored is {})",
                                reading.timestamp, last.timestamp
                            ),
                        );
                        continue;
                    }
                }
                series.push(reading.clone());
                accepted.push(reading);
            }
        }

        if let Some(archive) = &self.archive {
            let path = archive.lock().unwrap();
            Self::archive_readings(&path, &accepted)?;
        }
        Ok(accepted.len())
    }

    /// Readings for one intersection with `since <= timestamp <= until`,
    /// ascending. Returns owned clones.
    pub fn query(&self, id: &str, since: DateTime<Utc>, until: DateTime<Utc>) -> Vec<Reading> {
        let inner = self.inner.read().unwrap();
        let Some(series) = inner.get(id) else {
            return Vec::new();
        };
        let start = series.partition_point(|r| r.timestamp < since);
        let end = series.partition_point(|r| r.timestamp <= until);
        series[start..end].to_vec()
    }

    /// Number of readings for one intersection within a window, without
    /// cloning them. Used by the model manager's cold-start check.
    pub fn count(&self, id: &str, since: DateTime<Utc>, until: DateTime<Utc>) -> usize {
        let inner = self.inner.read().unwrap();
        match inner.get(id) {
            Some(series) => {
                let start = series.partition_point(|r| r.timestamp < since);
                let end = series.partition_point(|r| r.timestamp <= until);
                end - start
            }
            None => 0,
        }
    }

    /// The most recent reading for one intersection.
    pub fn latest(&self, id: &str) -> Option<Reading> {
        let inner = self.inner.read().unwrap();
        inner.get(id).and_then(|series| series.last().cloned())
    }

    /// The most recent `n` readings for one intersection, ascending.
    pub fn latest_n(&self, id: &str, n: usize) -> Vec<Reading> {
        let inner = self.inner.read().unwrap();
        match inner.get(id) {
            Some(series) => {
                let start = series.len().saturating_sub(n);
                series[start..].to_vec()
            }
            None => Vec::new(),
        }
    }

    /// Total readings across all intersections.
    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap();
        inner.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evicts readings strictly older than `before`; returns how many were
    /// removed. Snapshots already returned by `query` are unaffected.
    pub fn prune(&self, before: DateTime<Utc>) -> usize {
        let mut inner = self.inner.write().unwrap();
        let mut removed = 0;
        for series in inner.values_mut() {
            let keep_from = series.partition_point(|r| r.timestamp < before);
            removed += keep_from;
            if keep_from > 0 {
                series.drain(..keep_from);
            }
        }
        removed
    }

    fn archive_readings(path: &PathBuf, readings: &[&Reading]) -> Result<(), PipelineError> {
        if readings.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| PipelineError::Storage(format!("archive open {}: {}", path.display(), e)))?;
        for reading in readings {
            let line = serde_json::to_string(reading)
                .map_err(|e| PipelineError::Storage(format!("archive encode: {}", e)))?;
            writeln!(file, "{}", line)
                .map_err(|e| PipelineError::Storage(format!("archive write: {}", e)))?;
        }
        Ok(())
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        HistoryStore::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CongestionLevel;
    use chrono::{Duration, TimeZone};

    fn reading(id: &str, at: DateTime<Utc>, count: u32) -> Reading {
        Reading {
            intersection_id: id.to_string(),
            timestamp: at,
            vehicle_count: count,
            avg_speed_kmh: 22.5,
            level: CongestionLevel::Medium,
            is_emergency: false,
        }
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_appended_readings_round_trip_unmodified() {
        let store = HistoryStore::new();
        let t0 = base_time();
        let original = reading("delhi_cp", t0, 142);
        store.append(std::slice::from_ref(&original)).unwrap();

        let results = store.query("delhi_cp", t0 - Duration::minutes(1), t0 + Duration::minutes(1));
        assert_eq!(results, vec![original]);
    }

    #[test]
    fn test_query_returns_ascending_order_with_inclusive_bounds() {
        let store = HistoryStore::new();
        let t0 = base_time();
        let batch: Vec<_> = (0..10)
            .map(|i| reading("blr_silk", t0 + Duration::minutes(5 * i), 100 + i as u32))
            .collect();
        store.append(&batch).unwrap();

        let results = store.query("blr_silk", t0, t0 + Duration::minutes(45));
        assert_eq!(results.len(), 10, "both window endpoints are inclusive");
        for pair in results.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }

        let middle = store.query(
            "blr_silk",
            t0 + Duration::minutes(10),
            t0 + Duration::minutes(20),
        );
        assert_eq!(middle.len(), 3);
    }

    #[test]
    fn test_query_unknown_intersection_returns_empty() {
        let store = HistoryStore::new();
        assert!(store.query("nowhere", base_time(), base_time()).is_empty());
    }

    #[test]
    fn test_out_of_order_reading_is_skipped_not_spliced() {
        let store = HistoryStore::new();
        let t0 = base_time();
        store.append(&[reading("delhi_cp", t0 + Duration::minutes(10), 50)]).unwrap();

        let accepted = store.append(&[reading("delhi_cp", t0, 40)]).unwrap();
        assert_eq!(accepted, 0);
        assert_eq!(store.len(), 1);
        assert_eq!(store.latest("delhi_cp").unwrap().vehicle_count, 50);
    }

    #[test]
    fn test_equal_timestamps_are_accepted() {
        // Monotonicity is non-decreasing, not strictly increasing.
        let store = HistoryStore::new();
        let t0 = base_time();
        store.append(&[reading("delhi_cp", t0, 40)]).unwrap();
        let accepted = store.append(&[reading("delhi_cp", t0, 41)]).unwrap();
        assert_eq!(accepted, 1);
        assert_eq!(store.count("delhi_cp", t0, t0), 2);
    }

    #[test]
    fn test_prune_evicts_only_readings_older_than_horizon() {
        let store = HistoryStore::new();
        let t0 = base_time();
        let batch: Vec<_> = (0..10)
            .map(|i| reading("chennai_omr", t0 + Duration::minutes(5 * i), i as u32))
            .collect();
        store.append(&batch).unwrap();

        let removed = store.prune(t0 + Duration::minutes(25));
        assert_eq!(removed, 5);
        assert_eq!(store.len(), 5);
        // The boundary reading (timestamp == before) survives.
        let survivors = store.query("chennai_omr", t0, t0 + Duration::minutes(60));
        assert_eq!(survivors[0].timestamp, t0 + Duration::minutes(25));
    }

    #[test]
    fn test_snapshot_survives_concurrent_prune() {
        let store = HistoryStore::new();
        let t0 = base_time();
        let batch: Vec<_> = (0..20)
            .map(|i| reading("mumbai_bandra", t0 + Duration::minutes(5 * i), i as u32))
            .collect();
        store.append(&batch).unwrap();

        // Training snapshot taken before a prune wipes the whole window.
        let snapshot = store.query("mumbai_bandra", t0, t0 + Duration::hours(2));
        assert_eq!(snapshot.len(), 20);
        store.prune(t0 + Duration::hours(2));
        assert_eq!(store.len(), 0);
        assert_eq!(snapshot.len(), 20, "copy-on-read snapshot must outlive pruning");
        assert_eq!(snapshot[7].vehicle_count, 7);
    }

    #[test]
    fn test_latest_n_returns_trailing_readings_in_order() {
        let store = HistoryStore::new();
        let t0 = base_time();
        let batch: Vec<_> = (0..6)
            .map(|i| reading("delhi_lajpat", t0 + Duration::minutes(5 * i), 10 * i as u32))
            .collect();
        store.append(&batch).unwrap();

        let tail = store.latest_n("delhi_lajpat", 3);
        let counts: Vec<_> = tail.iter().map(|r| r.vehicle_count).collect();
        assert_eq!(counts, vec![30, 40, 50]);

        assert_eq!(store.latest_n("delhi_lajpat", 100).len(), 6);
        assert!(store.latest_n("unknown", 3).is_empty());
    }

    #[test]
    fn test_archive_mirrors_accepted_readings_as_jsonl() {
        let path = std::env::temp_dir().join(format!(
            "trafcast_archive_test_{}.jsonl",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let store = HistoryStore::with_archive(&path);
        let t0 = base_time();
        store
            .append(&[reading("delhi_cp", t0, 80), reading("blr_silk", t0, 150)])
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let decoded: Reading = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(decoded.intersection_id, "delhi_cp");
        assert_eq!(decoded.vehicle_count, 80);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_unwritable_archive_surfaces_a_storage_error() {
        let store = HistoryStore::with_archive("/nonexistent-dir/trafcast/archive.jsonl");
        let result = store.append(&[reading("delhi_cp", base_time(), 80)]);
        match result {
            Err(PipelineError::Storage(_)) => {}
            other => panic!("expected Storage error, got {:?}", other),
        }
    }
}
