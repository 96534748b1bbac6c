/// Bounded-horizon congestion prediction.
///
/// Answers `predict(intersection, target_time)` for targets up to the
/// configured horizon ahead (24 h in the reference deployment). With an
/// active model, the feature row combines the target's time-of-day with the
/// latest observed lag counts; without one, the forecast falls back to the
/// same deterministic class baseline the simulator anchors on, marked with
/// the Unix-epoch sentinel so callers can see it is not model-derived.
///
/// Forecasts are cached per (intersection, target bucket). An entry stays
/// valid until the active model's trained-at changes or its TTL passes,
/// whichever comes first, so a dashboard polling every 30 seconds recomputes
/// nothing and sees consistent predictions between retrains. Cache hits
/// touch only an in-memory map guarded by a briefly-held mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::config::PipelineConfig;
use crate::forecast::features::{class_factor, feature_row};
use crate::forecast::manager::ModelManager;
use crate::history::HistoryStore;
use crate::intersections::Registry;
use crate::model::{Forecast, PipelineError};
use crate::simulate::{baseline_count, expected_speed, level_for};

/// Entries beyond this many trigger an eviction sweep of dead entries.
const CACHE_SWEEP_THRESHOLD: usize = 4096;

pub struct ForecastService {
    registry: Arc<Registry>,
    history: Arc<HistoryStore>,
    manager: Arc<ModelManager>,
    config: PipelineConfig,
    cache: Mutex<HashMap<(String, i64), Forecast>>,
}

impl ForecastService {
    pub fn new(
        registry: Arc<Registry>,
        history: Arc<HistoryStore>,
        manager: Arc<ModelManager>,
        config: PipelineConfig,
    ) -> Self {
        ForecastService {
            registry,
            history,
            manager,
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Predicted congestion for one intersection at one future instant.
    ///
    /// Always answers for targets within the horizon, even with zero
    /// history; fails only for unknown intersections and out-of-horizon
    /// targets.
    pub fn predict(
        &self,
        id: &str,
        target_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Forecast, PipelineError> {
        let intersection = self.registry.get(id)?.clone();

        let offset = target_time - now;
        let max_minutes = self.config.forecast.horizon_hours * 60;
        if offset < Duration::zero() || offset > Duration::minutes(max_minutes) {
            return Err(PipelineError::OutOfHorizon {
                requested_minutes: offset.num_minutes(),
                max_minutes,
            });
        }

        let active = self.manager.active();
        let generation = active
            .as_ref()
            .map(|model| model.trained_at)
            .unwrap_or(DateTime::UNIX_EPOCH);

        // Bucketing the target to the collection interval makes a sliding
        // `now + horizon` poll from the dashboard hit the same entry.
        let bucket_secs = self.config.collection.interval_minutes * 60;
        let key = (id.to_string(), target_time.timestamp().div_euclid(bucket_secs));

        {
            let cache = self.cache.lock().unwrap();
            if let Some(hit) = cache.get(&key) {
                if hit.expires_at > now && hit.model_trained_at == generation {
                    return Ok(hit.clone());
                }
            }
        }

        let profile = self.config.simulation.class_profile(intersection.class).clone();
        let city_factor = self.config.simulation.city_factor(&intersection.city);

        let vehicle_count = match &active {
            Some(model) => {
                let lags = self.recent_lags(id, &profile, city_factor, now);
                let row = feature_row(target_time, class_factor(&profile), &lags);
                model.forecaster.infer(&row).round().max(0.0) as u32
            }
            None => baseline_count(&profile, &self.config.simulation.day, city_factor, target_time),
        };

        let speed = expected_speed(vehicle_count, &profile);
        let forecast = Forecast {
            intersection_id: id.to_string(),
            target_time,
            vehicle_count,
            level: level_for(vehicle_count, speed, &profile, &self.config.levels),
            model_trained_at: generation,
            expires_at: now + Duration::seconds(self.config.forecast.cache_ttl_secs),
        };

        let mut cache = self.cache.lock().unwrap();
        if cache.len() >= CACHE_SWEEP_THRESHOLD {
            cache.retain(|_, entry| entry.expires_at > now && entry.model_trained_at == generation);
        }
        cache.insert(key, forecast.clone());
        Ok(forecast)
    }

    /// Latest observed counts, most recent first, padded with the
    /// deterministic baseline when history is shorter than the lag window.
    fn recent_lags(
        &self,
        id: &str,
        profile: &crate::config::ClassProfile,
        city_factor: f64,
        now: DateTime<Utc>,
    ) -> Vec<f64> {
        let lag = self.config.training.lag_intervals;
        let recent = self.history.latest_n(id, lag);
        let mut lags: Vec<f64> = recent
            .iter()
            .rev()
            .map(|reading| reading.vehicle_count as f64)
            .collect();
        while lags.len() < lag {
            lags.push(baseline_count(profile, &self.config.simulation.day, city_factor, now) as f64);
        }
        lags
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
