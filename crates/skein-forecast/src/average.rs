//! Sliding-window-average forecasting.

use std::collections::VecDeque;
use std::sync::RwLock;

use nalgebra::DVector;
use tracing::warn;

use crate::{Forecast, ForecastError};

/// Forecaster that returns the arithmetic mean of recent observations.
///
/// Observations older than `window` seconds behind the current time are
/// evicted, except the most recent observation, which is always retained.
/// Observations strictly older than the newest buffered one are rejected.
pub struct AverageForecast {
    dim: usize,
    window: f64,
    inner: RwLock<Inner>,
}

struct Inner {
    buffer: VecDeque<(f64, DVector<f64>)>,
    average: DVector<f64>,
}

impl AverageForecast {
    /// Create a forecaster averaging over a `window`-second history.
    ///
    /// # Errors
    ///
    /// Returns [`ForecastError::ZeroDimension`] if `observed_dim` is zero, or
    /// [`ForecastError::NegativeWindow`] if `window` is negative.
    pub fn new(observed_dim: usize, window: f64) -> Result<Self, ForecastError> {
        if observed_dim == 0 {
            return Err(ForecastError::ZeroDimension);
        }
        if !window.is_finite() || window < 0.0 {
            return Err(ForecastError::NegativeWindow(window));
        }
        Ok(Self {
            dim: observed_dim,
            window,
            inner: RwLock::new(Inner {
                buffer: VecDeque::new(),
                average: DVector::zeros(observed_dim),
            }),
        })
    }

    /// Number of buffered observations. Exposed for diagnostics and tests.
    #[must_use]
    pub fn buffered(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.buffer.len()
    }
}

impl Inner {
    /// Drop observations older than `time - window`, always keeping the most
    /// recent one.
    fn evict(&mut self, time: f64, window: f64) {
        let cutoff = time - window;
        while self.buffer.len() > 1
            && self.buffer.front().is_some_and(|(t, _)| *t <= cutoff)
        {
            self.buffer.pop_front();
        }
    }

    fn recompute_average(&mut self, dim: usize) {
        if self.buffer.is_empty() {
            self.average = DVector::zeros(dim);
            return;
        }
        let mut total = DVector::zeros(dim);
        for (_, value) in &self.buffer {
            total += value;
        }
        #[allow(clippy::cast_precision_loss)]
        let count = self.buffer.len() as f64;
        self.average = total / count;
    }
}

impl Forecast for AverageForecast {
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

        // Reject observations strictly older than the newest buffered one.
        if inner.buffer.back().is_some_and(|(t, _)| time < *t) {
            return;
        }

        inner.buffer.push_back((time, value.clone()));
        inner.evict(time, self.window);
        inner.recompute_average(self.dim);
    }

    fn advance(&self, time: f64) {
        let mut inner = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.evict(time, self.window);
        inner.recompute_average(self.dim);
    }

    fn forecast(&self, _time: f64) -> DVector<f64> {
        let inner = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.average.clone()
    }

    fn last_update_time(&self) -> f64 {
        let inner = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.buffer.back().map_or(f64::NEG_INFINITY, |(t, _)| *t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn scalar(value: f64) -> DVector<f64> {
        DVector::from_vec(vec![value])
    }

    #[test]
    fn forecast_is_zero_before_first_observation() {
        let forecast = AverageForecast::new(2, 1.0).unwrap();
        assert_eq!(forecast.forecast(0.0), DVector::zeros(2));
    }

    #[test]
    fn average_of_buffered_observations() {
        let forecast = AverageForecast::new(1, 10.0).unwrap();
        forecast.update(&scalar(1.0), 0.0);
        forecast.update(&scalar(2.0), 1.0);
        forecast.update(&scalar(6.0), 2.0);
        assert_relative_eq!(forecast.forecast(2.0)[0], 3.0);
    }

    #[test]
    fn old_observations_evicted() {
        let forecast = AverageForecast::new(1, 1.0).unwrap();
        forecast.update(&scalar(100.0), 0.0);
        forecast.update(&scalar(2.0), 5.0);
        forecast.update(&scalar(4.0), 5.5);
        // The observation at t=0 is far outside the window at t=5.5.
        assert_relative_eq!(forecast.forecast(5.5)[0], 3.0);
        assert_eq!(forecast.buffered(), 2);
    }

    #[test]
    fn most_recent_observation_always_retained() {
        let forecast = AverageForecast::new(1, 1.0).unwrap();
        forecast.update(&scalar(7.0), 0.0);
        // Advance far beyond the window: buffer shrinks to one element.
        forecast.advance(100.0);
        forecast.advance(1000.0);
        assert_eq!(forecast.buffered(), 1);
        assert_relative_eq!(forecast.forecast(1000.0)[0], 7.0);
    }

    #[test]
    fn stale_observations_rejected() {
        let forecast = AverageForecast::new(1, 10.0).unwrap();
        forecast.update(&scalar(1.0), 5.0);
        forecast.update(&scalar(100.0), 1.0); // strictly older: rejected
        assert_relative_eq!(forecast.forecast(5.0)[0], 1.0);
        assert_eq!(forecast.buffered(), 1);
    }

    #[test]
    fn equal_timestamp_accepted() {
        let forecast = AverageForecast::new(1, 10.0).unwrap();
        forecast.update(&scalar(1.0), 5.0);
        forecast.update(&scalar(3.0), 5.0);
        assert_relative_eq!(forecast.forecast(5.0)[0], 2.0);
    }

    #[test]
    fn mismatched_dimension_rejected() {
        let forecast = AverageForecast::new(2, 1.0).unwrap();
        forecast.update(&DVector::from_vec(vec![1.0, 1.0]), 0.0);
        forecast.update(&scalar(9.0), 1.0);
        assert_eq!(forecast.forecast(1.0), DVector::from_vec(vec![1.0, 1.0]));
    }

    #[test]
    fn negative_window_fails() {
        assert!(matches!(
            AverageForecast::new(1, -1.0),
            Err(ForecastError::NegativeWindow(_))
        ));
    }
}
