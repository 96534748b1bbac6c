/// Feature extraction for model training and inference.
///
/// Each feature row is anchored at one (intersection, tick): cyclical
/// time-of-day encoding, a weekend indicator, the intersection's class
/// capacity factor, and the trailing vehicle counts as lag features. The
/// label is the vehicle count a fixed number of collection intervals ahead.
///
/// The chronological train/validation split is the one ordering constraint
/// that must never be relaxed: shuffling would leak future readings into
/// training and inflate validation accuracy.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};

use crate::config::{ClassProfile, SimulationConfig, TrainingConfig};
use crate::history::HistoryStore;
use crate::intersections::Registry;

// ---------------------------------------------------------------------------
// Feature encoding
// ---------------------------------------------------------------------------

/// Cyclical encoding of the minute of day, so 23:55 and 00:05 are close.
pub fn time_of_day_features(at: DateTime<Utc>) -> (f64, f64) {
    let minute_of_day = (at.hour() * 60 + at.minute()) as f64;
    let angle = minute_of_day / 1440.0 * std::f64::consts::TAU;
    (angle.sin(), angle.cos())
}

pub fn weekend_flag(at: DateTime<Utc>) -> f64 {
    match at.weekday() {
        Weekday::Sat | Weekday::Sun => 1.0,
        _ => 0.0,
    }
}

/// Scalar encoding of the congestion class, anchored to its capacity.
pub fn class_factor(profile: &ClassProfile) -> f64 {
    profile.capacity / 100.0
}

/// Assembles one feature row. `lags` are vehicle counts, most recent first.
pub fn feature_row(at: DateTime<Utc>, class_factor: f64, lags: &[f64]) -> Vec<f64> {
    let (sin_t, cos_t) = time_of_day_features(at);
    let mut row = Vec::with_capacity(4 + lags.len());
    row.push(sin_t);
    row.push(cos_t);
    row.push(weekend_flag(at));
    row.push(class_factor);
    row.extend_from_slice(lags);
    row
}

// ---------------------------------------------------------------------------
// Training snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Row {
    at: DateTime<Utc>,
    features: Vec<f64>,
    label: f64,
}

/// Materialized feature/label table for one training cycle.
///
/// Owned entirely by the model manager; built from copy-on-read queries, so
/// concurrent appends and prunes cannot invalidate it.
#[derive(Debug)]
pub struct TrainingSnapshot {
    rows: Vec<Row>,
}

/// One side of a chronological split, ready for `Forecaster::fit`.
#[derive(Debug)]
pub struct FeatureMatrix {
    pub features: Vec<Vec<f64>>,
    pub labels: Vec<f64>,
}

impl TrainingSnapshot {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Splits the snapshot into (train, validation) with the NEWEST
    /// `validation_fraction` of rows held out. Rows are already in global
    /// timestamp order, so no validation row precedes any training row.
    pub fn split_chronological(&self, validation_fraction: f64) -> (FeatureMatrix, FeatureMatrix) {
        let held_out = ((self.rows.len() as f64 * validation_fraction) as usize)
            .clamp(1, self.rows.len().saturating_sub(1));
        let split = self.rows.len() - held_out;

        let matrix = |rows: &[Row]| FeatureMatrix {
            features: rows.iter().map(|r| r.features.clone()).collect(),
            labels: rows.iter().map(|r| r.label).collect(),
        };
        (matrix(&self.rows[..split]), matrix(&self.rows[split..]))
    }
}

/// Builds the snapshot for one training cycle from the given history window.
pub fn build_snapshot(
    history: &HistoryStore,
    registry: &Registry,
    simulation: &SimulationConfig,
    training: &TrainingConfig,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> TrainingSnapshot {
    let lag = training.lag_intervals;
    let horizon = training.label_horizon_intervals;

    let mut rows = Vec::new();
    for intersection in registry.list() {
        let series = history.query(&intersection.id, since, until);
        let factor = class_factor(simulation.class_profile(intersection.class));

        let last_anchor = series.len().saturating_sub(horizon);
        for i in (lag.saturating_sub(1))..last_anchor {
            let mut lags = Vec::with_capacity(lag);
            for k in 0..lag {
                lags.push(series[i - k].vehicle_count as f64);
            }
            rows.push(Row {
                at: series[i].timestamp,
                features: feature_row(series[i].timestamp, factor, &lags),
                label: series[i + horizon].vehicle_count as f64,
            });
        }
    }

    // Global timestamp order across intersections makes the chronological
    // split a single cut.
    rows.sort_by_key(|row| row.at);
    TrainingSnapshot { rows }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::intersections::{Intersection, Registry};
    use crate::model::{CongestionClass, CongestionLevel, Reading};
    use chrono::{Duration, TimeZone};

    fn single_registry() -> Registry {
        Registry::new(vec![Intersection {
            id: "t_one".to_string(),
            name: "One".to_string(),
            city: "Testville".to_string(),
            class: CongestionClass::Medium,
            latitude: 0.0,
            longitude: 0.0,
        }])
        .unwrap()
    }

    fn fill_history(counts: &[u32]) -> (HistoryStore, DateTime<Utc>) {
        let store = HistoryStore::new();
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let readings: Vec<_> = counts
            .iter()
            .enumerate()
            .map(|(i, &count)| Reading {
                intersection_id: "t_one".to_string(),
                timestamp: start + Duration::minutes(5 * i as i64),
                vehicle_count: count,
                avg_speed_kmh: 20.0,
                level: CongestionLevel::Medium,
                is_emergency: false,
            })
            .collect();
        store.append(&readings).unwrap();
        (store, start)
    }

    #[test]
    fn test_lags_and_label_are_aligned_to_the_anchor_tick() {
        let config = PipelineConfig::default(); // lag 3, label horizon 1
        let (store, start) = fill_history(&[10, 20, 30, 40, 50]);
        let snapshot = build_snapshot(
            &store,
            &single_registry(),
            &config.simulation,
            &config.training,
            start,
            start + Duration::hours(1),
        );

        // Anchors at indexes 2 and 3: two rows.
        assert_eq!(snapshot.len(), 2);
        let first = &snapshot.rows[0];
        // Row anchored at count=30: lags most recent first, label one ahead.
        assert_eq!(&first.features[4..], &[30.0, 20.0, 10.0]);
        assert_eq!(first.label, 40.0);
        let second = &snapshot.rows[1];
        assert_eq!(&second.features[4..], &[40.0, 30.0, 20.0]);
        assert_eq!(second.label, 50.0);
    }

    #[test]
    fn test_short_series_produces_no_rows() {
        let config = PipelineConfig::default();
        let (store, start) = fill_history(&[10, 20]);
        let snapshot = build_snapshot(
            &store,
            &single_registry(),
            &config.simulation,
            &config.training,
            start,
            start + Duration::hours(1),
        );
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_chronological_split_never_leaks_future_rows_into_training() {
        let config = PipelineConfig::default();
        let counts: Vec<u32> = (0..100).map(|i| 50 + i).collect();
        let (store, start) = fill_history(&counts);
        let snapshot = build_snapshot(
            &store,
            &single_registry(),
            &config.simulation,
            &config.training,
            start,
            start + Duration::days(1),
        );

        let split = snapshot.rows.len() - (snapshot.rows.len() as f64 * 0.2) as usize;
        let latest_train = snapshot.rows[..split].iter().map(|r| r.at).max().unwrap();
        let earliest_val = snapshot.rows[split..].iter().map(|r| r.at).min().unwrap();
        assert!(
            latest_train < earliest_val,
            "every validation row must postdate every training row"
        );

        let (train, validation) = snapshot.split_chronological(0.2);
        assert_eq!(train.labels.len() + validation.labels.len(), snapshot.len());
        assert!(!validation.labels.is_empty());
    }

    #[test]
    fn test_split_keeps_at_least_one_row_on_each_side() {
        let config = PipelineConfig::default();
        let (store, start) = fill_history(&[10, 20, 30, 40, 50]);
        let snapshot = build_snapshot(
            &store,
            &single_registry(),
            &config.simulation,
            &config.training,
            start,
            start + Duration::hours(1),
        );
        let (train, validation) = snapshot.split_chronological(0.01);
        assert!(!train.labels.is_empty());
        assert_eq!(validation.labels.len(), 1);
    }

    #[test]
    fn test_time_of_day_encoding_is_cyclical() {
        let before_midnight = Utc.with_ymd_and_hms(2024, 5, 1, 23, 55, 0).unwrap();
        let after_midnight = Utc.with_ymd_and_hms(2024, 5, 2, 0, 5, 0).unwrap();
        let noon = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let (s1, c1) = time_of_day_features(before_midnight);
        let (s2, c2) = time_of_day_features(after_midnight);
        let (s3, c3) = time_of_day_features(noon);

        let dist_close = ((s1 - s2).powi(2) + (c1 - c2).powi(2)).sqrt();
        let dist_far = ((s1 - s3).powi(2) + (c1 - c3).powi(2)).sqrt();
        assert!(dist_close < 0.1);
        assert!(dist_far > 1.0);
    }

    #[test]
    fn test_weekend_flag() {
        // 2024-05-04 is a Saturday, 2024-05-01 a Wednesday.
        assert_eq!(weekend_flag(Utc.with_ymd_and_hms(2024, 5, 4, 9, 0, 0).unwrap()), 1.0);
        assert_eq!(weekend_flag(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()), 0.0);
    }
}
