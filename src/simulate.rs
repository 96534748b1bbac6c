/// Synthetic traffic state generator.
///
/// Produces one plausible reading per registered intersection per tick.
/// Volumes follow a deterministic time-of-day profile (rush-hour peaks,
/// afternoon shoulder, night trough) parameterized by congestion class and
/// city density factor, with bounded random perturbation. Consecutive ticks
/// are correlated: each intersection moves a bounded step from its previous
/// count toward the current baseline target, so counts never jump by more
/// than `max_step + count_jitter` vehicles between ticks.
///
/// Emergency mode overrides the normal model entirely and drives every
/// intersection to Severe. This is the only place external control state
/// enters the pipeline.
///
/// The deterministic half of the baseline (`baseline_count`) is shared with
/// the forecast service's cold-start fallback path.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{ClassProfile, DayProfile, LevelConfig, SimulationConfig};
use crate::intersections::Registry;
use crate::model::{CongestionLevel, Reading};

// ---------------------------------------------------------------------------
// Baseline model
// ---------------------------------------------------------------------------

/// The pre-jitter vehicle count band for a class at a given hour, before the
/// city factor is applied. Night replaces the base entirely; rush hours and
/// afternoons add on top of it.
pub fn volume_band(profile: &ClassProfile, day: &DayProfile, hour: u32) -> (f64, f64) {
    let base = profile.base_count as f64;
    if day.is_rush(hour) {
        (base + profile.rush_add.0 as f64, base + profile.rush_add.1 as f64)
    } else if day.is_afternoon(hour) {
        (
            base + profile.afternoon_add.0 as f64,
            base + profile.afternoon_add.1 as f64,
        )
    } else if day.is_night(hour) {
        (profile.night_range.0 as f64, profile.night_range.1 as f64)
    } else {
        (base, base)
    }
}

/// Deterministic class baseline at an instant: the band midpoint scaled by
/// the city factor. Used by the simulator as its smoothing target anchor and
/// by the forecast fallback when no trained model exists.
pub fn baseline_count(
    profile: &ClassProfile,
    day: &DayProfile,
    city_factor: f64,
    at: DateTime<Utc>,
) -> u32 {
    let (lo, hi) = volume_band(profile, day, at.hour());
    ((lo + hi) / 2.0 * city_factor).round().max(0.0) as u32
}

/// Average speed implied by a vehicle count: inverse-linear in count with a
/// class-specific free-flow intercept, floored at the crawl speed.
pub fn expected_speed(count: u32, profile: &ClassProfile) -> f64 {
    (profile.free_flow_kmh - profile.speed_slope * count as f64).max(profile.min_speed_kmh)
}

/// Derives the congestion level jointly from count and speed.
///
/// Count enters as occupancy relative to the class capacity and speed as
/// slowdown relative to the class free-flow speed, so a class-Low
/// intersection under unusual load still registers High or Severe.
pub fn level_for(
    count: u32,
    speed_kmh: f64,
    profile: &ClassProfile,
    levels: &LevelConfig,
) -> CongestionLevel {
    let occupancy = (count as f64 / profile.capacity).min(levels.occupancy_cap);
    let slowdown = (1.0 - speed_kmh / profile.free_flow_kmh).max(0.0);
    let score = levels.count_weight * occupancy + levels.speed_weight * slowdown;

    if score < levels.medium_cutoff {
        CongestionLevel::Low
    } else if score < levels.high_cutoff {
        CongestionLevel::Medium
    } else if score < levels.severe_cutoff {
        CongestionLevel::High
    } else {
        CongestionLevel::Severe
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// Stateful generator of synthetic readings.
///
/// Keeps the previous count per intersection for tick-to-tick correlation.
/// The smoothing state resets whenever the emergency flag flips, so Severe
/// appears on the first emergency tick and class-appropriate readings return
/// on the first tick after clearing.
pub struct TrafficSimulator {
    registry: Arc<Registry>,
    config: SimulationConfig,
    levels: LevelConfig,
    rng: StdRng,
    last_counts: HashMap<String, f64>,
    last_emergency: bool,
}

impl TrafficSimulator {
    pub fn new(registry: Arc<Registry>, config: SimulationConfig, levels: LevelConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        TrafficSimulator {
            registry,
            config,
            levels,
            rng,
            last_counts: HashMap::new(),
            last_emergency: false,
        }
    }

    /// Produces one reading per registered intersection, stamped `now`.
    pub fn tick(&mut self, now: DateTime<Utc>, emergency: bool) -> Vec<Reading> {
        let resync = emergency != self.last_emergency;
        self.last_emergency = emergency;

        let registry = Arc::clone(&self.registry);
        let mut readings = Vec::with_capacity(registry.len());
        for intersection in registry.list() {
            let profile = self.config.class_profile(intersection.class).clone();
            let reading = if emergency {
                self.emergency_reading(&intersection.id, &profile, now)
            } else {
                let factor = self.config.city_factor(&intersection.city);
                self.normal_reading(&intersection.id, &profile, factor, now, resync)
            };
            readings.push(reading);
        }
        readings
    }

    fn normal_reading(
        &mut self,
        id: &str,
        profile: &ClassProfile,
        city_factor: f64,
        now: DateTime<Utc>,
        resync: bool,
    ) -> Reading {
        let (lo, hi) = volume_band(profile, &self.config.day, now.hour());
        let (lo, hi) = (lo * city_factor, hi * city_factor);
        let target = if hi > lo { self.rng.gen_range(lo..=hi) } else { lo };
        let jitter = self.rng.gen_range(-self.config.count_jitter..=self.config.count_jitter);

        let raw = match self.last_counts.get(id) {
            Some(&prev) if !resync => {
                let step = (target - prev).clamp(-self.config.max_step, self.config.max_step);
                prev + step + jitter
            }
            _ => target + jitter,
        };
        let count_f = raw.max(0.0);
        self.last_counts.insert(id.to_string(), count_f);

        let count = count_f.round() as u32;
        let speed_jitter =
            self.rng.gen_range(-self.config.speed_jitter..=self.config.speed_jitter);
        let speed = (profile.free_flow_kmh - profile.speed_slope * count as f64 + speed_jitter)
            .max(profile.min_speed_kmh);

        Reading {
            intersection_id: id.to_string(),
            timestamp: now,
            vehicle_count: count,
            avg_speed_kmh: speed,
            level: level_for(count, speed, profile, &self.levels),
            is_emergency: false,
        }
    }

    fn emergency_reading(&mut self, id: &str, profile: &ClassProfile, now: DateTime<Utc>) -> Reading {
        // Ignores time of day and city factor: gridlock is gridlock.
        let count_f = profile.capacity * self.config.emergency_surge;
        self.last_counts.insert(id.to_string(), count_f);

        let count = count_f.round() as u32;
        let speed = self.config.emergency_speed_kmh.max(0.0);

        Reading {
            intersection_id: id.to_string(),
            timestamp: now,
            vehicle_count: count,
            avg_speed_kmh: speed,
            level: level_for(count, speed, profile, &self.levels),
            is_emergency: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
