/// Forecasting subsystem: feature extraction, the trainable model
/// capability, the retrain lifecycle, and the prediction service.
///
/// Submodules:
/// - `features` — materializes training snapshots from history.
/// - `regressor` — the `Forecaster` fit/infer capability and the ridge
///   regression reference backend.
/// - `manager` — owns the single active model slot and the retrain cycle.
/// - `service` — answers bounded-horizon predictions with caching and the
///   deterministic cold-start fallback.

pub mod features;
pub mod manager;
pub mod regressor;
pub mod service;

pub use manager::{ModelManager, TrainedModel};
pub use regressor::{Forecaster, RidgeRegressor};
pub use service::ForecastService;
