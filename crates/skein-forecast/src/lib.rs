//! Forecasting of an observed vector quantity over a receding horizon.
//!
//! The controller predicts the external wrench applied to the end effector
//! while rolling out candidate trajectories. Three strategies are provided:
//!
//! 1. **LOCF** ([`LocfForecast`]) — last observation carried forward
//! 2. **Average** ([`AverageForecast`]) — mean over a sliding time window
//! 3. **Kalman** ([`KalmanForecast`]) — derivative-chained Kalman filter
//!    extrapolated over the horizon
//!
//! All forecasters are safe to share across threads: observers take an
//! exclusive lock, readers a shared lock. Cost functions read predictions
//! through a non-owning [`ForecastHandle`] so a dropped forecaster can never
//! be dereferenced.

pub mod average;
pub mod kalman;
pub mod locf;

pub use average::AverageForecast;
pub use kalman::{KalmanFilter, KalmanFilterConfig, KalmanForecast, KalmanForecastConfig};
pub use locf::LocfForecast;

use std::sync::{Arc, Weak};

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Construction errors for forecasters.
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("Observed dimension must be nonzero")]
    ZeroDimension,

    #[error("Prediction window is negative: {0}")]
    NegativeWindow(f64),

    #[error("Invalid time_step: {0} (must be > 0)")]
    InvalidTimeStep(f64),

    #[error("Invalid horizon: {0} (must be > 0)")]
    InvalidHorizon(f64),

    #[error(
        "{name} has shape ({rows}, {cols}), expected ({expected_rows}, {expected_cols})"
    )]
    MatrixShape {
        name: &'static str,
        rows: usize,
        cols: usize,
        expected_rows: usize,
        expected_cols: usize,
    },
}

// ---------------------------------------------------------------------------
// Forecast trait
// ---------------------------------------------------------------------------

/// A forecaster of a timestamped vector quantity.
///
/// Methods take `&self`; implementations synchronize internally with a
/// read-write lock so that observation ingestion and prediction reads can
/// come from different threads.
pub trait Forecast: Send + Sync {
    /// Dimension of the observed (and forecast) vector.
    fn observed_dim(&self) -> usize;

    /// Ingest a timestamped observation.
    ///
    /// Observations whose dimension does not match [`observed_dim`](Self::observed_dim)
    /// are rejected with a warning; the last good forecast is retained.
    fn update(&self, value: &DVector<f64>, time: f64);

    /// Advance internal time without a new observation.
    fn advance(&self, time: f64);

    /// Predict the observed quantity at `time`.
    fn forecast(&self, time: f64) -> DVector<f64>;

    /// The time of the most recent observation.
    fn last_update_time(&self) -> f64;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Forecast strategy selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ForecastConfig {
    /// Last observation carried forward.
    Locf { observed_dim: usize },
    /// Arithmetic mean over a sliding window of `window` seconds.
    Average { observed_dim: usize, window: f64 },
    /// Derivative-chained Kalman filter.
    Kalman(KalmanForecastConfig),
}

impl ForecastConfig {
    /// Instantiate the configured forecaster.
    ///
    /// # Errors
    ///
    /// Returns [`ForecastError`] if the configuration is invalid
    /// (zero dimension, negative window, malformed Kalman shapes).
    pub fn create(&self) -> Result<Arc<dyn Forecast>, ForecastError> {
        match self {
            Self::Locf { observed_dim } => {
                Ok(Arc::new(LocfForecast::new(*observed_dim)?))
            }
            Self::Average {
                observed_dim,
                window,
            } => Ok(Arc::new(AverageForecast::new(*observed_dim, *window)?)),
            Self::Kalman(config) => Ok(Arc::new(KalmanForecast::new(config)?)),
        }
    }
}

// ---------------------------------------------------------------------------
// ForecastHandle
// ---------------------------------------------------------------------------

/// A read-only, non-owning view of a forecaster.
///
/// Cost functions hold a handle rather than the forecaster itself: the
/// optimizer owns the forecaster alongside the dynamics it describes, and
/// the handle returns `None` once the owner drops it.
#[derive(Clone)]
pub struct ForecastHandle {
    inner: Weak<dyn Forecast>,
}

impl ForecastHandle {
    /// Create a handle viewing `forecast`.
    #[must_use]
    pub fn new(forecast: &Arc<dyn Forecast>) -> Self {
        Self {
            inner: Arc::downgrade(forecast),
        }
    }

    /// Predict the observed quantity at `time`, or `None` if the owning
    /// forecaster has been dropped.
    #[must_use]
    pub fn forecast(&self, time: f64) -> Option<DVector<f64>> {
        self.inner.upgrade().map(|f| f.forecast(time))
    }

    /// The time of the most recent observation, or `None` if the owning
    /// forecaster has been dropped.
    #[must_use]
    pub fn last_update_time(&self) -> Option<f64> {
        self.inner.upgrade().map(|f| f.last_update_time())
    }

    /// Whether the owning forecaster is still alive.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
