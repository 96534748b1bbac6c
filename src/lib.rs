//! Traffic-state simulation and forecasting pipeline.
//!
//! This crate is the stateful core behind a traffic congestion dashboard and
//! prediction API: it produces plausible synthetic sensor readings for a
//! fixed set of road intersections, persists them in an append-only history,
//! periodically retrains a forecasting model on the accumulated readings,
//! and serves 24-hour-ahead congestion predictions with a deterministic
//! fallback while no trained model exists.
//!
//! The HTTP layer, the dashboard, and the timer that fires the collection
//! and retrain cadences are external collaborators. They interact with the
//! crate exclusively through [`pipeline::Pipeline`].
//!
//! Modules:
//! - `model` — shared domain types and the error taxonomy; no logic, no I/O.
//! - `intersections` — immutable registry of monitored intersections.
//! - `config` — TOML configuration with environment bootstrap.
//! - `logging` — leveled, component-tagged console/file logger.
//! - `simulate` — the synthetic state generator.
//! - `history` — append-only in-memory reading store with retention.
//! - `forecast` — feature building, model training, and the forecast service.
//! - `pipeline` — composition root wiring all of the above together.

pub mod config;
pub mod forecast;
pub mod history;
pub mod intersections;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod simulate;

pub use model::{CongestionClass, CongestionLevel, Forecast, PipelineError, Reading, RetrainOutcome};
pub use pipeline::Pipeline;
