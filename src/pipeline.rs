/// Composition root and external interface of the pipeline.
///
/// The host environment owns the timers and the transport; this handle owns
/// the state. Two periodic triggers drive it — `on_collect_tick` (generate
/// and persist one reading per intersection, then apply retention) and
/// `on_retrain_tick` (one model training cycle) — and the API layer reads
/// through `current_state`, `forecast` and `model_status`. The emergency
/// flag is the only control signal flowing backward into the pipeline.
///
/// Collection, retraining and forecast reads run on independent schedules
/// and never block one another: the history store is copy-on-read, the
/// active model swaps atomically behind an `Arc`, and the emergency flag is
/// a plain atomic with last-writer-wins semantics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::config::{EnvSettings, PipelineConfig};
use crate::forecast::{ForecastService, ModelManager};
use crate::history::HistoryStore;
use crate::intersections::{reference_registry, Registry};
use crate::logging::{self, Component};
use crate::model::{Forecast, ModelStatus, PipelineError, Reading, RetrainOutcome};
use crate::simulate::TrafficSimulator;

pub struct Pipeline {
    registry: Arc<Registry>,
    config: PipelineConfig,
    simulator: Mutex<TrafficSimulator>,
    history: Arc<HistoryStore>,
    manager: Arc<ModelManager>,
    service: ForecastService,
    emergency: AtomicBool,
}

impl Pipeline {
    /// Builds a pipeline over an in-memory history store.
    pub fn new(registry: Registry, config: PipelineConfig) -> Result<Self, PipelineError> {
        Self::build(registry, config, HistoryStore::new())
    }

    /// Builds a pipeline whose history store mirrors readings to a JSONL
    /// archive file.
    pub fn with_archive(
        registry: Registry,
        config: PipelineConfig,
        archive_path: impl Into<std::path::PathBuf>,
    ) -> Result<Self, PipelineError> {
        Self::build(registry, config, HistoryStore::with_archive(archive_path))
    }

    /// Bootstraps from the environment: `.env`, `TRAFCAST_CONFIG`,
    /// `TRAFCAST_REGISTRY`, log settings and the optional history archive.
    pub fn from_env() -> Result<Self, PipelineError> {
        let settings = EnvSettings::from_env()?;
        logging::init_logger(settings.log_level, settings.log_file.as_deref());

        let registry = match &settings.registry_path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    PipelineError::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                Registry::from_toml_str(&text)?
            }
            None => reference_registry(),
        };

        match settings.history_archive {
            Some(path) => Self::with_archive(registry, settings.config, path),
            None => Self::new(registry, settings.config),
        }
    }

    fn build(
        registry: Registry,
        config: PipelineConfig,
        history: HistoryStore,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let registry = Arc::new(registry);
        let history = Arc::new(history);
        let simulator = Mutex::new(TrafficSimulator::new(
            Arc::clone(&registry),
            config.simulation.clone(),
            config.levels.clone(),
        ));
        let manager = Arc::new(ModelManager::new(
            Arc::clone(&registry),
            Arc::clone(&history),
            config.training.clone(),
            config.simulation.clone(),
        ));
        let service = ForecastService::new(
            Arc::clone(&registry),
            Arc::clone(&history),
            Arc::clone(&manager),
            config.clone(),
        );

        logging::info(
            Component::System,
            None,
            &format!("pipeline initialized with {} intersections", registry.len()),
        );

        Ok(Pipeline {
            registry,
            config,
            simulator,
            history,
            manager,
            service,
            emergency: AtomicBool::new(false),
        })
    }

    // -----------------------------------------------------------------------
    // Periodic triggers (wired to the host scheduler)
    // -----------------------------------------------------------------------

    /// One collection cycle: generate a reading per intersection, append to
    /// history, apply the retention horizon. Returns the fresh readings.
    pub fn on_collect_tick(&self, now: DateTime<Utc>) -> Result<Vec<Reading>, PipelineError> {
        let emergency = self.emergency.load(Ordering::SeqCst);
        let readings = self.simulator.lock().unwrap().tick(now, emergency);
        self.history.append(&readings)?;

        let horizon = now - chrono::Duration::days(self.config.retention.days);
        let pruned = self.history.prune(horizon);
        if pruned > 0 {
            logging::debug(
                Component::History,
                None,
                &format!("pruned {} readings past the retention horizon", pruned),
            );
        }
        Ok(readings)
    }

    /// One retrain cycle. Overlapping triggers are no-ops, never queued.
    pub fn on_retrain_tick(&self, now: DateTime<Utc>) -> RetrainOutcome {
        self.manager.retrain(now)
    }

    // -----------------------------------------------------------------------
    // Control plane
    // -----------------------------------------------------------------------

    /// Sets or clears emergency mode. Takes effect on the next tick.
    pub fn set_emergency(&self, active: bool) {
        self.emergency.store(active, Ordering::SeqCst);
        logging::info(
            Component::System,
            None,
            if active { "emergency mode enabled" } else { "emergency mode cleared" },
        );
    }

    pub fn emergency_active(&self) -> bool {
        self.emergency.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Reads (wired to the API layer)
    // -----------------------------------------------------------------------

    /// Latest reading per intersection, in registry order. Intersections
    /// that have not produced a reading yet are omitted.
    pub fn current_state(&self) -> Vec<Reading> {
        self.registry
            .list()
            .iter()
            .filter_map(|intersection| self.history.latest(&intersection.id))
            .collect()
    }

    /// Predicted congestion for one intersection at a future instant.
    pub fn forecast(
        &self,
        id: &str,
        target_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Forecast, PipelineError> {
        self.service.predict(id, target_time, now)
    }

    /// Model manager state for health reporting.
    pub fn model_status(&self) -> ModelStatus {
        self.manager.status()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
