//! Last-observation-carried-forward forecasting.

use std::sync::RwLock;

use nalgebra::DVector;
use tracing::warn;

use crate::{Forecast, ForecastError};

/// Forecaster that returns the most recent observation verbatim.
///
/// Observations with a timestamp at or before the last accepted one are
/// ignored. Before the first observation the forecast is zero.
pub struct LocfForecast {
    dim: usize,
    inner: RwLock<Inner>,
}

struct Inner {
    last: DVector<f64>,
    time: f64,
}

impl LocfForecast {
    /// Create a forecaster for a `observed_dim`-dimensional quantity.
    ///
    /// # Errors
    ///
    /// Returns [`ForecastError::ZeroDimension`] if `observed_dim` is zero.
    pub fn new(observed_dim: usize) -> Result<Self, ForecastError> {
        if observed_dim == 0 {
            return Err(ForecastError::ZeroDimension);
        }
        Ok(Self {
            dim: observed_dim,
            inner: RwLock::new(Inner {
                last: DVector::zeros(observed_dim),
                time: f64::NEG_INFINITY,
            }),
        })
    }
}

impl Forecast for LocfForecast {
    fn observed_dim(&self) -> usize {
        self.dim
    }

    fn update(&self, value: &DVector<f64>, time: f64) {
        if value.len() != self.dim {
            warn!(
                got = value.len(),
                expected = self.dim,
                "rejecting observation with mismatched dimension"
            );
            return;
        }

        let mut inner = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);

        // Ignore observations in the past.
        if time <= inner.time {
            return;
        }

        inner.last.copy_from(value);
        inner.time = time;
    }

    fn advance(&self, _time: f64) {}

    fn forecast(&self, _time: f64) -> DVector<f64> {
        let inner = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.last.clone()
    }

    fn last_update_time(&self) -> f64 {
        let inner = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.time
    }
}
