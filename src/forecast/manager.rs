/// Model lifecycle management.
///
/// Owns the single active model slot and the retrain cycle:
/// snapshot history → fit a candidate → validate on the chronological
/// hold-out → atomically swap the slot if the candidate clears the
/// acceptance threshold. Readers clone an `Arc` out of the slot and never
/// block on a retrain in progress; training runs entirely outside the slot
/// lock.
///
/// At most one retrain executes at a time. A trigger arriving during an
/// active cycle is a no-op (never queued): losing one cadence of freshness
/// is acceptable, duplicate training work is not.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, Utc};

use crate::config::{SimulationConfig, TrainingConfig};
use crate::forecast::features::build_snapshot;
use crate::forecast::regressor::{r_squared, Forecaster, RidgeRegressor};
use crate::history::HistoryStore;
use crate::intersections::Registry;
use crate::logging::{self, Component};
use crate::model::{ModelStatus, RetrainOutcome, SlotState};

// ---------------------------------------------------------------------------
// Trained model
// ---------------------------------------------------------------------------

/// A fitted forecaster plus the metadata the status endpoint reports.
pub struct TrainedModel {
    pub forecaster: Box<dyn Forecaster>,
    pub trained_at: DateTime<Utc>,
    /// Feature rows in the training snapshot.
    pub window_len: usize,
    /// Held-out R² at acceptance time.
    pub accuracy: f64,
}

type BackendFactory = Box<dyn Fn() -> Box<dyn Forecaster> + Send + Sync>;

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct ModelManager {
    registry: Arc<Registry>,
    history: Arc<HistoryStore>,
    training: TrainingConfig,
    simulation: SimulationConfig,
    /// The single active model slot. Writers swap the `Arc`; readers clone
    /// it out, so a prediction in progress keeps its model alive even
    /// through a swap.
    active: RwLock<Option<Arc<TrainedModel>>>,
    /// Single-flight guard for the retrain cycle.
    in_flight: Mutex<()>,
    training_flag: AtomicBool,
    rejected_attempts: AtomicU32,
    backend: BackendFactory,
}

impl ModelManager {
    /// Manager with the ridge regression reference backend.
    pub fn new(
        registry: Arc<Registry>,
        history: Arc<HistoryStore>,
        training: TrainingConfig,
        simulation: SimulationConfig,
    ) -> Self {
        Self::with_backend(
            registry,
            history,
            training,
            simulation,
            Box::new(|| -> Box<dyn Forecaster> { Box::new(RidgeRegressor::default()) }),
        )
    }

    /// Manager with a custom forecasting backend factory. The factory is
    /// invoked once per training cycle to produce a fresh candidate.
    pub fn with_backend(
        registry: Arc<Registry>,
        history: Arc<HistoryStore>,
        training: TrainingConfig,
        simulation: SimulationConfig,
        backend: BackendFactory,
    ) -> Self {
        ModelManager {
            registry,
            history,
            training,
            simulation,
            active: RwLock::new(None),
            in_flight: Mutex::new(()),
            training_flag: AtomicBool::new(false),
            rejected_attempts: AtomicU32::new(0),
            backend,
        }
    }

    /// Runs one retrain cycle, unless one is already in progress.
    pub fn retrain(&self, now: DateTime<Utc>) -> RetrainOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            let outcome = RetrainOutcome::Rejected {
                reason: "retrain already in progress".to_string(),
            };
            logging::log_retrain_outcome(&outcome);
            return outcome;
        };

        self.training_flag.store(true, Ordering::SeqCst);
        let outcome = self.run_cycle(now);
        self.training_flag.store(false, Ordering::SeqCst);

        if matches!(outcome, RetrainOutcome::Rejected { .. }) {
            self.rejected_attempts.fetch_add(1, Ordering::SeqCst);
        }
        logging::log_retrain_outcome(&outcome);
        outcome
    }

    fn run_cycle(&self, now: DateTime<Utc>) -> RetrainOutcome {
        let started = Instant::now();
        let deadline = StdDuration::from_secs(self.training.max_duration_secs);
        let since = now - Duration::days(self.training.window_days);

        // Cold-start check before any feature work.
        for intersection in self.registry.list() {
            let available = self.history.count(&intersection.id, since, now);
            if available < self.training.min_samples_per_intersection {
                logging::debug(
                    Component::Model,
                    Some(&intersection.id),
                    &format!(
                        "{} of {} readings required for training",
                        available, self.training.min_samples_per_intersection
                    ),
                );
                return RetrainOutcome::InsufficientData;
            }
        }

        let snapshot = build_snapshot(
            &self.history,
            &self.registry,
            &self.simulation,
            &self.training,
            since,
            now,
        );
        if snapshot.len() < 2 {
            return RetrainOutcome::InsufficientData;
        }
        if started.elapsed() > deadline {
            return RetrainOutcome::Rejected {
                reason: "training deadline exceeded while building the snapshot".to_string(),
            };
        }

        let (train, validation) = snapshot.split_chronological(self.training.validation_fraction);

        let mut candidate = (self.backend)();
        if let Err(e) = candidate.fit(&train.features, &train.labels) {
            return RetrainOutcome::Rejected {
                reason: format!("{} fit failed: {}", candidate.name(), e),
            };
        }
        if started.elapsed() > deadline {
            // Abandoned candidate; the active slot is untouched.
            return RetrainOutcome::Rejected {
                reason: "training deadline exceeded; candidate abandoned".to_string(),
            };
        }

        let accuracy = r_squared(candidate.as_ref(), &validation.features, &validation.labels);
        if accuracy < self.training.acceptance_threshold {
            return RetrainOutcome::Rejected {
                reason: format!(
                    "validation accuracy {:.3} below acceptance threshold {:.3}",
                    accuracy, self.training.acceptance_threshold
                ),
            };
        }

        let model = Arc::new(TrainedModel {
            forecaster: candidate,
            trained_at: now,
            window_len: snapshot.len(),
            accuracy,
        });
        *self.active.write().unwrap() = Some(model);
        RetrainOutcome::Accepted { accuracy }
    }

    /// The current active model, if any. Never blocks on training.
    pub fn active(&self) -> Option<Arc<TrainedModel>> {
        self.active.read().unwrap().clone()
    }

    /// Manager state for health reporting.
    pub fn status(&self) -> ModelStatus {
        let active = self.active.read().unwrap();
        let state = if self.training_flag.load(Ordering::SeqCst) {
            SlotState::Training
        } else if active.is_some() {
            SlotState::Active
        } else {
            SlotState::Untrained
        };
        ModelStatus {
            state,
            fallback: active.is_none(),
            trained_at: active.as_ref().map(|m| m.trained_at),
            accuracy: active.as_ref().map(|m| m.accuracy),
            window_len: active.as_ref().map(|m| m.window_len),
            rejected_attempts: self.rejected_attempts.load(Ordering::SeqCst),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
