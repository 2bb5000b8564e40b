//! Optimizer configuration.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use skein_core::error::ConfigError;

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_rollouts() -> usize {
    32
}
const fn default_step_size() -> f64 {
    0.05
}
const fn default_horizon() -> f64 {
    1.0
}
const fn default_gradient_step() -> f64 {
    1.0
}
const fn default_gradient_minmax() -> f64 {
    10.0
}
const fn default_cost_scale() -> f64 {
    1.0
}
const fn default_cost_discount_factor() -> f64 {
    1.0
}
const fn default_true() -> bool {
    true
}
fn default_threads() -> usize {
    std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
}
fn empty_vector() -> DVector<f64> {
    DVector::zeros(0)
}

// ---------------------------------------------------------------------------
// SmoothingConfig
// ---------------------------------------------------------------------------

/// Savitzky–Golay post-smoothing of the nominal trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmoothingConfig {
    /// Filter window in trajectory columns. Must be odd, at least 3, and
    /// greater than `order`.
    pub window: usize,

    /// Order of the fitted polynomial.
    pub order: usize,
}

// ---------------------------------------------------------------------------
// TrajectoryConfig
// ---------------------------------------------------------------------------

/// Configuration of the trajectory optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryConfig {
    /// Total trajectories simulated per cycle, including the two reserved
    /// rollouts (default: 32).
    #[serde(default = "default_rollouts")]
    pub rollouts: usize,

    /// Number of best rollouts carried over to warm-start the next cycle's
    /// sampling (default: 0). At most `rollouts - 2`.
    #[serde(default)]
    pub keep_best_rollouts: usize,

    /// Time increment between trajectory columns in seconds (default: 0.05).
    #[serde(default = "default_step_size")]
    pub step_size: f64,

    /// Duration of time each rollout covers in seconds (default: 1.0).
    /// The trajectory has `ceil(horizon / step_size)` columns.
    #[serde(default = "default_horizon")]
    pub horizon: f64,

    /// Blending factor of the weighted-noise update into the nominal, in
    /// (0, 1] (default: 1.0).
    #[serde(default = "default_gradient_step")]
    pub gradient_step: f64,

    /// Per-coordinate clamp on the update increment (default: 10.0).
    #[serde(default = "default_gradient_minmax")]
    pub gradient_minmax: f64,

    /// Cost-to-likelihood scale λ in `w ∝ exp(-(J - J_min) / λ)`
    /// (default: 1.0).
    #[serde(default = "default_cost_scale")]
    pub cost_scale: f64,

    /// Per-step cost discount γ in (0, 1] (default: 1.0).
    #[serde(default = "default_cost_discount_factor")]
    pub cost_discount_factor: f64,

    /// Covariance of the rollout noise, `control_dof` square.
    pub covariance: DMatrix<f64>,

    /// True to clamp every nominal coordinate to
    /// [`control_min`](Self::control_min), [`control_max`](Self::control_max).
    #[serde(default)]
    pub control_bound: bool,

    /// Per-coordinate lower control bound. Required when
    /// [`control_bound`](Self::control_bound) is set.
    #[serde(default = "empty_vector")]
    pub control_min: DVector<f64>,

    /// Per-coordinate upper control bound. Required when
    /// [`control_bound`](Self::control_bound) is set.
    #[serde(default = "empty_vector")]
    pub control_max: DVector<f64>,

    /// True to return the last trajectory column when evaluating past the
    /// horizon, false to return
    /// [`control_default_value`](Self::control_default_value) (default: true).
    #[serde(default = "default_true")]
    pub control_default_last: bool,

    /// The control returned past the horizon when
    /// [`control_default_last`](Self::control_default_last) is false.
    #[serde(default = "empty_vector")]
    pub control_default_value: DVector<f64>,

    /// Optional Savitzky–Golay smoothing of the updated nominal.
    #[serde(default)]
    pub smoothing: Option<SmoothingConfig>,

    /// Size of the rollout worker pool (default: available parallelism).
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Root seed for the rollout noise stream. `None` seeds from OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,

    /// When every rollout weight vanishes, apply uniform weights over
    /// finite-cost rollouts instead of holding the nominal (default: false).
    #[serde(default)]
    pub uniform_weight_fallback: bool,
}

impl TrajectoryConfig {
    /// Number of time steps each rollout covers.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn steps(&self) -> usize {
        (self.horizon / self.step_size).ceil() as usize
    }

    /// Validate the dimension-independent configuration invariants.
    ///
    /// Checks against the dynamics' control dimension happen in
    /// [`Trajectory::new`](crate::trajectory::Trajectory::new).
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint as a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rollouts < 2 {
            return Err(ConfigError::InvalidRollouts(self.rollouts));
        }
        if self.keep_best_rollouts > self.rollouts - 2 {
            return Err(ConfigError::KeepBestTooLarge {
                keep_best: self.keep_best_rollouts,
                limit: self.rollouts - 2,
            });
        }
        if !self.step_size.is_finite() || self.step_size <= 0.0 {
            return Err(ConfigError::InvalidStepSize(self.step_size));
        }
        if !self.horizon.is_finite() || self.horizon <= 0.0 {
            return Err(ConfigError::InvalidHorizon(self.horizon));
        }
        if !self.gradient_step.is_finite()
            || self.gradient_step <= 0.0
            || self.gradient_step > 1.0
        {
            return Err(ConfigError::InvalidGradientStep(self.gradient_step));
        }
        if !self.gradient_minmax.is_finite() || self.gradient_minmax <= 0.0 {
            return Err(ConfigError::InvalidGradientMinmax(self.gradient_minmax));
        }
        if !self.cost_scale.is_finite() || self.cost_scale <= 0.0 {
            return Err(ConfigError::InvalidCostScale(self.cost_scale));
        }
        if !self.cost_discount_factor.is_finite()
            || self.cost_discount_factor <= 0.0
            || self.cost_discount_factor > 1.0
        {
            return Err(ConfigError::InvalidDiscountFactor(self.cost_discount_factor));
        }
        if self.covariance.nrows() != self.covariance.ncols() {
            return Err(ConfigError::MatrixShape {
                name: "covariance",
                rows: self.covariance.nrows(),
                cols: self.covariance.ncols(),
                expected_rows: self.covariance.nrows(),
                expected_cols: self.covariance.nrows(),
            });
        }
        if self.threads == 0 {
            return Err(ConfigError::InvalidThreads);
        }
        if let Some(smoothing) = self.smoothing {
            if smoothing.window < 3
                || smoothing.window % 2 == 0
                || smoothing.order >= smoothing.window
            {
                return Err(ConfigError::InvalidSmoothing {
                    window: smoothing.window,
                    order: smoothing.order,
                });
            }
        }
        Ok(())
    }

    /// Load a configuration from a TOML file and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on IO failure, parse failure, or an invalid
    /// configuration.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
