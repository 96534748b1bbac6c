/// Core data types for the traffic forecasting pipeline.
///
/// This module defines the shared domain model imported by all other modules.
/// It contains no logic beyond trivial derivations, no I/O, and no external
/// dependencies other than `chrono` and `serde`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Congestion categories
// ---------------------------------------------------------------------------

/// Static per-intersection category shaping the simulator's baseline volume.
///
/// Assigned once in the registry and immutable thereafter. Not to be
/// confused with [`CongestionLevel`], which is derived per reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CongestionClass {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for CongestionClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CongestionClass::High => write!(f, "high"),
            CongestionClass::Medium => write!(f, "medium"),
            CongestionClass::Low => write!(f, "low"),
        }
    }
}

/// Per-reading congestion severity, in ascending order.
///
/// Derived jointly from vehicle count and average speed against the
/// intersection's class-specific thresholds (`simulate::level_for`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CongestionLevel {
    Low,
    Medium,
    High,
    Severe,
}

impl CongestionLevel {
    /// Signal-timing recommendation surfaced alongside current readings.
    pub fn signal_plan(&self) -> SignalPlan {
        match self {
            CongestionLevel::Low => SignalPlan::NormalCycle,
            CongestionLevel::Medium => SignalPlan::OptimizeTiming,
            CongestionLevel::High | CongestionLevel::Severe => SignalPlan::ExtendGreen,
        }
    }
}

impl std::fmt::Display for CongestionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CongestionLevel::Low => write!(f, "Low"),
            CongestionLevel::Medium => write!(f, "Medium"),
            CongestionLevel::High => write!(f, "High"),
            CongestionLevel::Severe => write!(f, "Severe"),
        }
    }
}

/// Traffic-light timing recommendation for the display layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalPlan {
    ExtendGreen,
    OptimizeTiming,
    NormalCycle,
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// One observation produced by the state generator for one intersection.
///
/// Immutable once stored: the history store only appends or evicts, never
/// rewrites. Timestamps are monotonically non-decreasing per intersection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub intersection_id: String,
    pub timestamp: DateTime<Utc>,
    pub vehicle_count: u32,
    pub avg_speed_kmh: f64,
    pub level: CongestionLevel,
    pub is_emergency: bool,
}

// ---------------------------------------------------------------------------
// Forecast
// ---------------------------------------------------------------------------

/// A congestion prediction for one intersection at one future instant.
///
/// `model_trained_at` is the Unix epoch when the prediction came from the
/// deterministic fallback path, so staleness is always observable by the
/// caller without a separate flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Forecast {
    pub intersection_id: String,
    pub target_time: DateTime<Utc>,
    pub vehicle_count: u32,
    pub level: CongestionLevel,
    pub model_trained_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Forecast {
    /// `true` when this forecast came from the class-baseline fallback
    /// rather than a trained model.
    pub fn is_fallback(&self) -> bool {
        self.model_trained_at == DateTime::UNIX_EPOCH
    }
}

// ---------------------------------------------------------------------------
// Retrain outcomes and model status
// ---------------------------------------------------------------------------

/// Result of one retrain trigger. Outcomes are data, not errors: a failed
/// retrain degrades freshness, never correctness.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RetrainOutcome {
    /// A candidate model passed validation and replaced the active model.
    Accepted { accuracy: f64 },
    /// The candidate was discarded; the previously active model (if any)
    /// is retained unchanged.
    Rejected { reason: String },
    /// Too few readings per intersection to attempt training (cold start).
    InsufficientData,
}

/// Lifecycle state of the single model slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    Untrained,
    Training,
    Active,
}

/// Model manager state surfaced for health reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStatus {
    pub state: SlotState,
    /// `true` while forecasts are served from the deterministic fallback.
    pub fallback: bool,
    pub trained_at: Option<DateTime<Utc>>,
    pub accuracy: Option<f64>,
    /// Number of feature rows in the accepted model's training snapshot.
    pub window_len: Option<usize>,
    pub rejected_attempts: u32,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors surfaced by the pipeline.
///
/// `NotFound` and `OutOfHorizon` are caller errors and pass through to the
/// API layer as-is. `Storage` is the only condition that should halt the
/// pipeline; everything else degrades gracefully.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// The requested intersection id is not in the registry.
    NotFound(String),
    /// The forecast target lies outside the supported horizon.
    OutOfHorizon {
        requested_minutes: i64,
        max_minutes: i64,
    },
    /// Unrecoverable storage failure (history archive write failed).
    Storage(String),
    /// Invalid or unreadable configuration at startup.
    Config(String),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::NotFound(id) => write!(f, "unknown intersection: {}", id),
            PipelineError::OutOfHorizon {
                requested_minutes,
                max_minutes,
            } => write!(
                f,
                "forecast target {} minutes ahead is outside the supported 0-{} minute horizon",
                requested_minutes, max_minutes
            ),
            PipelineError::Storage(msg) => write!(f, "storage failure: {}", msg),
            PipelineError::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_congestion_levels_order_ascending() {
        assert!(CongestionLevel::Low < CongestionLevel::Medium);
        assert!(CongestionLevel::Medium < CongestionLevel::High);
        assert!(CongestionLevel::High < CongestionLevel::Severe);
    }

    #[test]
    fn test_signal_plan_recommendations() {
        assert_eq!(CongestionLevel::Low.signal_plan(), SignalPlan::NormalCycle);
        assert_eq!(CongestionLevel::Medium.signal_plan(), SignalPlan::OptimizeTiming);
        assert_eq!(CongestionLevel::High.signal_plan(), SignalPlan::ExtendGreen);
        assert_eq!(CongestionLevel::Severe.signal_plan(), SignalPlan::ExtendGreen);
    }

    #[test]
    fn test_fallback_forecast_is_observable_via_sentinel() {
        let target = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap();
        let forecast = Forecast {
            intersection_id: "delhi_cp".to_string(),
            target_time: target,
            vehicle_count: 120,
            level: CongestionLevel::Medium,
            model_trained_at: DateTime::UNIX_EPOCH,
            expires_at: target,
        };
        assert!(forecast.is_fallback());

        let trained = Forecast {
            model_trained_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 45, 0).unwrap(),
            ..forecast
        };
        assert!(!trained.is_fallback());
    }

    #[test]
    fn test_error_display_names_the_offending_input() {
        let err = PipelineError::NotFound("nowhere_junction".to_string());
        assert!(err.to_string().contains("nowhere_junction"));

        let err = PipelineError::OutOfHorizon {
            requested_minutes: 1500,
            max_minutes: 1440,
        };
        let rendered = err.to_string();
        assert!(rendered.contains("1500"));
        assert!(rendered.contains("1440"));
    }

    #[test]
    fn test_congestion_class_round_trips_through_serde() {
        let class: CongestionClass = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(class, CongestionClass::High);
        assert_eq!(serde_json::to_string(&CongestionClass::Low).unwrap(), "\"low\"");
    }
}
