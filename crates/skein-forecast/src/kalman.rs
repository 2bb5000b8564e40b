//! Kalman filtering and horizon extrapolation of an observed quantity.
//!
//! The filter tracks the observed vector together with its first `order`
//! time derivatives. The state transition matrix chains the derivatives by
//! Taylor integration:
//!
//! ```text
//! x⁽ᵏ⁾(t + Δ) = Σⱼ (Δʲ / j!) · x⁽ᵏ⁺ʲ⁾(t)
//! ```
//!
//! For example, a 3-dimensional observation with order 1 (constant velocity)
//! has the 6-state transition
//!
//! ```text
//! [1, 0, 0, Δ, 0, 0] [ x ]
//! [0, 1, 0, 0, Δ, 0] [ y ]
//! [0, 0, 1, 0, 0, Δ] [ z ]
//! [0, 0, 0, 1, 0, 0] [ dx ]
//! [0, 0, 0, 0, 1, 0] [ dy ]
//! [0, 0, 0, 0, 0, 1] [ dz ]
//! ```
//!
//! [`KalmanForecast`] pairs a filter with a second "predictor" copy. On every
//! observation the predictor is re-synchronized to the filter estimate and
//! iterated over the horizon to fill a prediction buffer; forecasting then
//! interpolates that buffer without disturbing the filter.

use std::sync::RwLock;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Forecast, ForecastError};

// ---------------------------------------------------------------------------
// KalmanFilter
// ---------------------------------------------------------------------------

/// Configuration of a linear Kalman filter.
#[derive(Debug, Clone)]
pub struct KalmanFilterConfig {
    /// Dimension of the observed vector.
    pub observed_dim: usize,

    /// Dimension of the estimated state (observed vector plus derivatives).
    pub state_dim: usize,

    /// State transition matrix F, `state_dim` square.
    pub state_transition: DMatrix<f64>,

    /// Process noise covariance Q, `state_dim` square.
    pub transition_covariance: DMatrix<f64>,

    /// Observation matrix H, `observed_dim` x `state_dim`.
    pub observation_matrix: DMatrix<f64>,

    /// Observation noise covariance R, `observed_dim` square.
    pub observation_covariance: DMatrix<f64>,

    /// Initial state estimate.
    pub initial_state: DVector<f64>,

    /// Initial estimate covariance, `state_dim` square.
    pub initial_covariance: DMatrix<f64>,
}

/// A linear Kalman filter with optimal-gain correction.
///
/// Keeps both the corrected estimate and the one-step-ahead prediction so
/// that the next correction interpolates against the propagated state.
#[derive(Debug, Clone)]
pub struct KalmanFilter {
    observed_dim: usize,
    state_dim: usize,
    state_transition: DMatrix<f64>,
    transition_covariance: DMatrix<f64>,
    observation_matrix: DMatrix<f64>,
    observation_covariance: DMatrix<f64>,
    identity: DMatrix<f64>,
    covariance: DMatrix<f64>,
    state: DVector<f64>,
    next_state: DVector<f64>,
}

fn check_matrix(
    name: &'static str,
    matrix: &DMatrix<f64>,
    rows: usize,
    cols: usize,
) -> Result<(), ForecastError> {
    if matrix.nrows() != rows || matrix.ncols() != cols {
        return Err(ForecastError::MatrixShape {
            name,
            rows: matrix.nrows(),
            cols: matrix.ncols(),
            expected_rows: rows,
            expected_cols: cols,
        });
    }
    Ok(())
}

impl KalmanFilter {
    /// Create a filter, verifying every matrix dimension.
    ///
    /// # Errors
    ///
    /// Returns [`ForecastError::MatrixShape`] naming the first matrix whose
    /// shape disagrees with `observed_dim` / `state_dim`.
    pub fn new(config: KalmanFilterConfig) -> Result<Self, ForecastError> {
        let s = config.state_dim;
        let d = config.observed_dim;
        if d == 0 || s == 0 {
            return Err(ForecastError::ZeroDimension);
        }

        check_matrix("state transition matrix", &config.state_transition, s, s)?;
        check_matrix(
            "transition covariance matrix",
            &config.transition_covariance,
            s,
            s,
        )?;
        check_matrix("observation matrix", &config.observation_matrix, d, s)?;
        check_matrix(
            "observation covariance matrix",
            &config.observation_covariance,
            d,
            d,
        )?;
        if config.initial_state.len() != s {
            return Err(ForecastError::MatrixShape {
                name: "initial state",
                rows: config.initial_state.len(),
                cols: 1,
                expected_rows: s,
                expected_cols: 1,
            });
        }
        check_matrix(
            "initial state covariance",
            &config.initial_covariance,
            s,
            s,
        )?;

        let next_state = &config.state_transition * &config.initial_state;
        Ok(Self {
            observed_dim: d,
            state_dim: s,
            state_transition: config.state_transition,
            transition_covariance: config.transition_covariance,
            observation_matrix: config.observation_matrix,
            observation_covariance: config.observation_covariance,
            identity: DMatrix::identity(s, s),
            covariance: config.initial_covariance,
            state: config.initial_state,
            next_state,
        })
    }

    /// Dimension of the observed vector.
    #[must_use]
    pub const fn observed_dim(&self) -> usize {
        self.observed_dim
    }

    /// Dimension of the estimated state.
    #[must_use]
    pub const fn state_dim(&self) -> usize {
        self.state_dim
    }

    /// The current state estimate.
    #[must_use]
    pub const fn estimate(&self) -> &DVector<f64> {
        &self.state
    }

    /// The current estimate covariance.
    #[must_use]
    pub const fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    /// Overwrite the state estimate, re-deriving the one-step prediction.
    pub fn set_estimate(&mut self, state: &DVector<f64>) {
        self.state.copy_from(state);
        self.next_state = &self.state_transition * &self.state;
    }

    /// Overwrite the estimate covariance.
    pub fn set_covariance(&mut self, covariance: &DMatrix<f64>) {
        self.covariance.copy_from(covariance);
    }

    /// Correct the predicted state with an observation, then propagate.
    pub fn update(&mut self, observation: &DVector<f64>) {
        let h = &self.observation_matrix;

        // Innovation covariance S = H P H^T + R.
        let innovation_covariance =
            h * &self.covariance * h.transpose() + &self.observation_covariance;

        let Some(innovation_inverse) = innovation_covariance.try_inverse() else {
            warn!("innovation covariance is singular; skipping correction");
            return;
        };

        // Optimal gain K = P H^T S^-1.
        let gain = &self.covariance * h.transpose() * innovation_inverse;

        // Interpolate between the propagated state and the observation.
        self.state = &self.next_state + &gain * (observation - h * &self.next_state);

        // Simplified covariance update, valid for the optimal gain.
        self.covariance = (&self.identity - &gain * h) * &self.covariance;

        // Propagate for the next cycle.
        self.next_state = &self.state_transition * &self.state;
        self.covariance = &self.state_transition
            * &self.covariance
            * self.state_transition.transpose()
            + &self.transition_covariance;
    }

    /// Advance the estimate one transition without an observation.
    pub fn predict(&mut self) {
        self.state.copy_from(&self.next_state);
        self.next_state = &self.state_transition * &self.state;
        self.covariance = &self.state_transition
            * &self.covariance
            * self.state_transition.transpose()
            + &self.transition_covariance;
    }
}

// ---------------------------------------------------------------------------
// Transition matrix construction
// ---------------------------------------------------------------------------

#[allow(clippy::cast_precision_loss)]
fn factorial(n: usize) -> f64 {
    (1..=n).fold(1.0, |acc, i| acc * i as f64)
}

/// Build the Taylor-integration state transition matrix for `observed_dim`
/// observed states with derivatives up to `order`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn transition_matrix(time_step: f64, observed_dim: usize, order: usize) -> DMatrix<f64> {
    let states = observed_dim * (order + 1);
    let mut matrix = DMatrix::zeros(states, states);

    // Each derivative block integrates the blocks above it in the chain.
    for derivative in 0..=order {
        for term in 0..=(order - derivative) {
            let coefficient = time_step.powi(term as i32) / factorial(term);
            for state in 0..observed_dim {
                let row = derivative * observed_dim + state;
                let col = (derivative + term) * observed_dim + state;
                matrix[(row, col)] = coefficient;
            }
        }
    }

    matrix
}

/// Build the observation matrix `[I | 0]` selecting the zeroth derivative.
#[must_use]
pub fn observation_matrix(observed_dim: usize, order: usize) -> DMatrix<f64> {
    let states = observed_dim * (order + 1);
    let mut matrix = DMatrix::zeros(observed_dim, states);
    matrix
        .view_mut((0, 0), (observed_dim, observed_dim))
        .fill_with_identity();
    matrix
}

// ---------------------------------------------------------------------------
// KalmanForecast
// ---------------------------------------------------------------------------

const fn default_variance() -> f64 {
    1e-8
}

/// Configuration of the Kalman horizon forecaster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KalmanForecastConfig {
    /// Dimension of the observed vector.
    pub observed_dim: usize,

    /// Highest derivative of the observed quantity tracked by the filter.
    pub order: usize,

    /// Time increment between prediction buffer columns in seconds.
    pub time_step: f64,

    /// Duration of the prediction horizon in seconds.
    pub horizon: f64,

    /// Diagonal process noise variance (default 1e-8).
    #[serde(default = "default_variance")]
    pub transition_variance: f64,

    /// Diagonal observation noise variance (default 1e-8).
    #[serde(default = "default_variance")]
    pub observation_variance: f64,

    /// Diagonal initial estimate variance (default 1e-8).
    #[serde(default = "default_variance")]
    pub initial_variance: f64,

    /// Initial value of the observed quantity. Zero when absent.
    #[serde(default)]
    pub initial_state: Option<DVector<f64>>,
}

/// Forecaster that extrapolates a Kalman estimate over a receding horizon.
pub struct KalmanForecast {
    dim: usize,
    time_step: f64,
    steps: usize,
    inner: RwLock<Inner>,
}

struct Inner {
    last_update: f64,
    filter: KalmanFilter,
    predictor: KalmanFilter,
    /// Zeroth-derivative prediction at now, now + Δ, ..., now + steps·Δ.
    prediction: DMatrix<f64>,
}

impl KalmanForecast {
    /// Create a forecaster from its configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ForecastError`] on a non-positive time step or horizon, a
    /// zero observed dimension, or an initial state of the wrong length.
    pub fn new(config: &KalmanForecastConfig) -> Result<Self, ForecastError> {
        if config.observed_dim == 0 {
            return Err(ForecastError::ZeroDimension);
        }
        if !config.time_step.is_finite() || config.time_step <= 0.0 {
            return Err(ForecastError::InvalidTimeStep(config.time_step));
        }
        if !config.horizon.is_finite() || config.horizon <= 0.0 {
            return Err(ForecastError::InvalidHorizon(config.horizon));
        }

        let d = config.observed_dim;
        let states = d * (config.order + 1);

        let mut initial_state = DVector::zeros(states);
        if let Some(initial) = &config.initial_state {
            if initial.len() != d {
                return Err(ForecastError::MatrixShape {
                    name: "initial state",
                    rows: initial.len(),
                    cols: 1,
                    expected_rows: d,
                    expected_cols: 1,
                });
            }
            initial_state.rows_mut(0, d).copy_from(initial);
        }

        let filter_config = KalmanFilterConfig {
            observed_dim: d,
            state_dim: states,
            state_transition: transition_matrix(config.time_step, d, config.order),
            transition_covariance: DMatrix::identity(states, states)
                * config.transition_variance,
            observation_matrix: observation_matrix(d, config.order),
            observation_covariance: DMatrix::identity(d, d) * config.observation_variance,
            initial_state,
            initial_covariance: DMatrix::identity(states, states) * config.initial_variance,
        };

        let filter = KalmanFilter::new(filter_config.clone())?;
        let predictor = KalmanFilter::new(filter_config)?;

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let steps = (config.horizon / config.time_step).ceil() as usize;

        // Before the first observation the whole horizon reads the initial
        // observed state.
        let mut prediction = DMatrix::zeros(d, steps + 1);
        let head = filter.estimate().rows(0, d).into_owned();
        for k in 0..=steps {
            prediction.set_column(k, &head);
        }

        Ok(Self {
            dim: d,
            time_step: config.time_step,
            steps,
            inner: RwLock::new(Inner {
                last_update: f64::NEG_INFINITY,
                filter,
                predictor,
                prediction,
            }),
        })
    }

    /// Number of prediction steps over the horizon.
    #[must_use]
    pub const fn steps(&self) -> usize {
        self.steps
    }
}

impl Forecast for KalmanForecast {
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
        let inner = &mut *inner;

        inner.last_update = time;
        inner.filter.update(value);

        // Re-synchronize the predictor and sweep it across the horizon.
        inner.predictor.set_estimate(inner.filter.estimate());
        inner.predictor.set_covariance(inner.filter.covariance());

        let head = inner.predictor.estimate().rows(0, self.dim).into_owned();
        inner.prediction.set_column(0, &head);

        for k in 0..self.steps {
            inner.predictor.predict();
            let head = inner.predictor.estimate().rows(0, self.dim).into_owned();
            inner.prediction.set_column(k + 1, &head);
        }
    }

    fn advance(&self, _time: f64) {
        // Propagate the filter estimate and its covariance only; the
        // prediction buffer keeps interpolating from the last observation.
        let mut inner = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.filter.predict();
    }

    fn forecast(&self, time: f64) -> DVector<f64> {
        let inner = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);

        // Extrapolate the first prediction backwards.
        if !inner.last_update.is_finite() || time <= inner.last_update {
            return inner.prediction.column(0).into_owned();
        }

        // Steps into the horizon, clamped at its end.
        let position = (time - inner.last_update) / self.time_step;
        #[allow(clippy::cast_precision_loss)]
        if position >= self.steps as f64 {
            return inner.prediction.column(self.steps).into_owned();
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let lower = position.floor() as usize;
        let upper = lower + 1;
        #[allow(clippy::cast_precision_loss)]
        let t = position - lower as f64;

        // Linear interpolation between the bracketing predictions.
        let mut value = inner.prediction.column(lower).into_owned();
        value *= 1.0 - t;
        value.axpy(t, &inner.prediction.column(upper), 1.0);
        value
    }

    fn last_update_time(&self) -> f64 {
        let inner = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.last_update
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
