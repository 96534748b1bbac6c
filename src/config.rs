/// Pipeline configuration.
///
/// Every behavioral constant of the pipeline — class baselines, rush-hour
/// windows, congestion thresholds, retention, training cadence parameters,
/// forecast horizon — lives here as a tunable value. Defaults reproduce the
/// reference deployment; a TOML file can override any subset of them.
///
/// Environment bootstrap (`EnvSettings::from_env`) follows the usual daemon
/// convention: `.env` is loaded if present, then `TRAFCAST_*` variables
/// select the config file, registry file, log sink and history archive.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::logging::LogLevel;
use crate::model::{CongestionClass, PipelineError};

// ---------------------------------------------------------------------------
// Environment variables
// ---------------------------------------------------------------------------

pub const ENV_CONFIG: &str = "TRAFCAST_CONFIG";
pub const ENV_REGISTRY: &str = "TRAFCAST_REGISTRY";
pub const ENV_LOG_LEVEL: &str = "TRAFCAST_LOG_LEVEL";
pub const ENV_LOG_FILE: &str = "TRAFCAST_LOG_FILE";
pub const ENV_HISTORY_ARCHIVE: &str = "TRAFCAST_HISTORY_ARCHIVE";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Collection cadence. The timer itself is external; the pipeline only needs
/// to know the nominal spacing between ticks (lag features and the forecast
/// cache bucket are expressed in collection intervals).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    pub interval_minutes: i64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        CollectionConfig { interval_minutes: 5 }
    }
}

/// History retention horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        RetentionConfig { days: 14 }
    }
}

/// Model training parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Trailing history window pulled for each training cycle.
    pub window_days: i64,
    /// Cold-start floor: every intersection must have at least this many
    /// readings in the window before training is attempted.
    pub min_samples_per_intersection: usize,
    /// Minimum held-out accuracy (R²) a candidate must reach to replace
    /// the active model.
    pub acceptance_threshold: f64,
    /// A cycle exceeding this wall-clock budget is abandoned as rejected.
    pub max_duration_secs: u64,
    /// Label offset: the feature row at tick t is labeled with the vehicle
    /// count at t + this many collection intervals.
    pub label_horizon_intervals: usize,
    /// Number of trailing vehicle counts included as lag features.
    pub lag_intervals: usize,
    /// Newest fraction of the snapshot held out for validation.
    pub validation_fraction: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            window_days: 7,
            min_samples_per_intersection: 100,
            acceptance_threshold: 0.5,
            max_duration_secs: 30,
            label_horizon_intervals: 1,
            lag_intervals: 3,
            validation_fraction: 0.2,
        }
    }
}

/// Forecast service parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Maximum future offset a prediction may be requested for.
    pub horizon_hours: i64,
    /// Cache entry lifetime; entries also die when the active model changes.
    pub cache_ttl_secs: i64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        ForecastConfig {
            horizon_hours: 24,
            cache_ttl_secs: 300,
        }
    }
}

/// Baseline volume and speed profile for one congestion class.
///
/// Count bands are pre-city-factor vehicle counts: during rush hours and
/// afternoons the band is `base_count` plus the additive range; at night the
/// band replaces the base entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassProfile {
    pub base_count: u32,
    pub rush_add: (u32, u32),
    pub afternoon_add: (u32, u32),
    pub night_range: (u32, u32),
    /// Count at which the intersection saturates; anchors congestion scoring.
    pub capacity: f64,
    /// Speed at zero load, km/h.
    pub free_flow_kmh: f64,
    /// Speed lost per vehicle, km/h.
    pub speed_slope: f64,
    /// Crawl floor, km/h.
    pub min_speed_kmh: f64,
}

/// Hour boundaries (inclusive) of the deterministic time-of-day profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DayProfile {
    pub rush_morning: (u32, u32),
    pub rush_evening: (u32, u32),
    pub afternoon: (u32, u32),
    /// Night wraps midnight: hours >= night_start or <= night_end.
    pub night_start: u32,
    pub night_end: u32,
}

impl Default for DayProfile {
    fn default() -> Self {
        DayProfile {
            rush_morning: (7, 11),
            rush_evening: (16, 21),
            afternoon: (12, 15),
            night_start: 22,
            night_end: 5,
        }
    }
}

impl DayProfile {
    pub fn is_rush(&self, hour: u32) -> bool {
        (self.rush_morning.0..=self.rush_morning.1).contains(&hour)
            || (self.rush_evening.0..=self.rush_evening.1).contains(&hour)
    }

    pub fn is_afternoon(&self, hour: u32) -> bool {
        (self.afternoon.0..=self.afternoon.1).contains(&hour)
    }

    pub fn is_night(&self, hour: u32) -> bool {
        hour >= self.night_start || hour <= self.night_end
    }
}

/// State generator parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Fixed RNG seed; unset means a fresh seed per process.
    pub seed: Option<u64>,
    /// Largest per-tick move toward the baseline target, vehicles.
    pub max_step: f64,
    /// Bounded symmetric perturbation applied to each count, vehicles.
    pub count_jitter: f64,
    /// Bounded symmetric perturbation applied to each speed, km/h.
    pub speed_jitter: f64,
    /// Emergency mode drives counts to this multiple of class capacity.
    pub emergency_surge: f64,
    /// Emergency mode crawl speed, km/h.
    pub emergency_speed_kmh: f64,
    pub day: DayProfile,
    pub high: ClassProfile,
    pub medium: ClassProfile,
    pub low: ClassProfile,
    /// Per-city density multipliers; cities not listed default to 1.0.
    pub city_factors: BTreeMap<String, f64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let mut city_factors = BTreeMap::new();
        city_factors.insert("Mumbai".to_string(), 1.4);
        city_factors.insert("Delhi NCR".to_string(), 1.2);
        city_factors.insert("Bengaluru".to_string(), 1.2);
        city_factors.insert("Chennai".to_string(), 1.1);

        SimulationConfig {
            seed: None,
            max_step: 45.0,
            count_jitter: 15.0,
            speed_jitter: 5.0,
            emergency_surge: 1.25,
            emergency_speed_kmh: 4.0,
            day: DayProfile::default(),
            high: ClassProfile {
                base_count: 60,
                rush_add: (100, 180),
                afternoon_add: (40, 80),
                night_range: (15, 35),
                capacity: 240.0,
                free_flow_kmh: 18.0,
                speed_slope: 0.15,
                min_speed_kmh: 2.0,
            },
            medium: ClassProfile {
                base_count: 35,
                rush_add: (60, 120),
                afternoon_add: (20, 50),
                night_range: (8, 20),
                capacity: 155.0,
                free_flow_kmh: 28.0,
                speed_slope: 0.18,
                min_speed_kmh: 5.0,
            },
            low: ClassProfile {
                base_count: 20,
                rush_add: (30, 80),
                afternoon_add: (10, 30),
                night_range: (3, 12),
                capacity: 100.0,
                free_flow_kmh: 40.0,
                speed_slope: 0.22,
                min_speed_kmh: 8.0,
            },
            city_factors,
        }
    }
}

impl SimulationConfig {
    pub fn class_profile(&self, class: CongestionClass) -> &ClassProfile {
        match class {
            CongestionClass::High => &self.high,
            CongestionClass::Medium => &self.medium,
            CongestionClass::Low => &self.low,
        }
    }

    pub fn city_factor(&self, city: &str) -> f64 {
        self.city_factors.get(city).copied().unwrap_or(1.0)
    }
}

/// Joint (count, speed) congestion scoring thresholds.
///
/// `score = count_weight * min(count / capacity, occupancy_cap)
///        + speed_weight * max(0, 1 - speed / free_flow)`
/// and the level is the highest cutoff the score reaches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelConfig {
    pub count_weight: f64,
    pub speed_weight: f64,
    pub occupancy_cap: f64,
    pub medium_cutoff: f64,
    pub high_cutoff: f64,
    pub severe_cutoff: f64,
}

impl Default for LevelConfig {
    fn default() -> Self {
        LevelConfig {
            count_weight: 0.6,
            speed_weight: 0.4,
            occupancy_cap: 1.5,
            medium_cutoff: 0.35,
            high_cutoff: 0.65,
            severe_cutoff: 0.95,
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub collection: CollectionConfig,
    pub retention: RetentionConfig,
    pub training: TrainingConfig,
    pub forecast: ForecastConfig,
    pub simulation: SimulationConfig,
    pub levels: LevelConfig,
}

impl PipelineConfig {
    /// Parses a config from TOML text; unspecified values keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, PipelineError> {
        let config: PipelineConfig = toml::from_str(text)
            .map_err(|e| PipelineError::Config(format!("config parse failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), PipelineError> {
        fn fail(msg: String) -> Result<(), PipelineError> {
            Err(PipelineError::Config(msg))
        }

        if self.collection.interval_minutes <= 0 {
            return fail("collection.interval_minutes must be positive".to_string());
        }
        if self.retention.days <= 0 {
            return fail("retention.days must be positive".to_string());
        }
        if self.training.window_days <= 0 || self.training.window_days > self.retention.days {
            return fail(format!(
                "training.window_days must be in 1..={}",
                self.retention.days
            ));
        }
        if self.training.lag_intervals == 0 || self.training.label_horizon_intervals == 0 {
            return fail("training lag/label horizons must be at least 1".to_string());
        }
        if !(0.0..1.0).contains(&self.training.validation_fraction)
            || self.training.validation_fraction == 0.0
        {
            return fail("training.validation_fraction must be in (0, 1)".to_string());
        }
        if !(0.0..=1.0).contains(&self.training.acceptance_threshold) {
            return fail("training.acceptance_threshold must be in [0, 1]".to_string());
        }
        if self.forecast.horizon_hours <= 0 {
            return fail("forecast.horizon_hours must be positive".to_string());
        }
        if !(self.levels.medium_cutoff < self.levels.high_cutoff
            && self.levels.high_cutoff < self.levels.severe_cutoff)
        {
            return fail("level cutoffs must be strictly ascending".to_string());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Environment bootstrap
// ---------------------------------------------------------------------------

/// Everything the host process resolves from the environment at startup.
#[derive(Debug)]
pub struct EnvSettings {
    pub config: PipelineConfig,
    pub registry_path: Option<PathBuf>,
    pub log_level: LogLevel,
    pub log_file: Option<String>,
    pub history_archive: Option<PathBuf>,
}

impl EnvSettings {
    /// Loads `.env` if present, then resolves `TRAFCAST_*` variables.
    /// An unset `TRAFCAST_CONFIG` means the built-in defaults.
    pub fn from_env() -> Result<Self, PipelineError> {
        dotenv::dotenv().ok();

        let config = match std::env::var(ENV_CONFIG) {
            Ok(path) => {
                let text = std::fs::read_to_string(&path).map_err(|e| {
                    PipelineError::Config(format!("cannot read {}: {}", path, e))
                })?;
                PipelineConfig::from_toml_str(&text)?
            }
            Err(_) => PipelineConfig::default(),
        };

        let log_level = match std::env::var(ENV_LOG_LEVEL) {
            Ok(raw) => LogLevel::parse(&raw).ok_or_else(|| {
                PipelineError::Config(format!("unrecognized log level '{}'", raw))
            })?,
            Err(_) => LogLevel::Info,
        };

        Ok(EnvSettings {
            config,
            registry_path: std::env::var(ENV_REGISTRY).ok().map(PathBuf::from),
            log_level,
            log_file: std::env::var(ENV_LOG_FILE).ok(),
            history_archive: std::env::var(ENV_HISTORY_ARCHIVE).ok().map(PathBuf::from),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
