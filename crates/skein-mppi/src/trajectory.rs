//! The MPPI optimal trajectory generator.
//!
//! Maintains a nominal control trajectory as a `control_dof × steps` matrix
//! (column-major; time increases with the column index) and refines it on
//! every update cycle:
//!
//! 1. **Time-shift** the nominal so column zero corresponds to the caller's
//!    time.
//! 2. **Sample** perturbation noise for each rollout. Rollout 0 keeps zero
//!    noise (rescoring the current nominal), rollout 1 takes the negation of
//!    the previous update (the anti-optimum), the best rollouts of the
//!    previous cycle are carried over, and the rest are freshly drawn.
//! 3. **Roll out** every perturbed trajectory through the dynamics in
//!    parallel, accumulating discounted step costs.
//! 4. **Weight** each rollout by `exp(-(J - J_min) / cost_scale)`.
//! 5. **Update** the nominal with the clamped, weighted mean of the noise.
//! 6. **Publish** the result under a mutex for concurrent evaluation.
//!
//! Evaluation linearly interpolates the published trajectory at an arbitrary
//! time and never blocks on a rollout cycle.

use std::sync::{Arc, Mutex, PoisonError};

use nalgebra::{DMatrix, DMatrixView, DVector};
use rayon::prelude::*;
use tracing::warn;

use skein_core::error::{ConfigError, ValidationError};
use skein_core::seed::derive_seed;

use crate::config::TrajectoryConfig;
use crate::cost::Cost;
use crate::dynamics::Dynamics;
use crate::gaussian::Gaussian;
use crate::smooth::SavitzkyGolay;

/// The number of reserved rollouts: the zero-noise sample and the negated
/// previous optimum.
pub const RESERVED_ROLLOUTS: usize = 2;

// ---------------------------------------------------------------------------
// Published trajectory and evaluation
// ---------------------------------------------------------------------------

struct Published {
    /// The optimal control trajectory, `control_dof × steps`.
    trajectory: DMatrix<f64>,
    /// The time column zero applies at.
    rollout_time: f64,
}

/// A cheap, cloneable evaluator of the published trajectory.
///
/// Views share the publication mutex with the owning [`Trajectory`], so any
/// number of threads can evaluate concurrently with updates. An evaluator
/// always sees a complete published trajectory, never a partial mixture of
/// two cycles.
#[derive(Clone)]
pub struct ControlView {
    published: Arc<Mutex<Published>>,
    step_size: f64,
    steps: usize,
    control_dof: usize,
    control_default_last: bool,
    control_default_value: DVector<f64>,
}

impl ControlView {
    /// Degrees of freedom of the control input.
    #[must_use]
    pub const fn control_dof(&self) -> usize {
        self.control_dof
    }

    /// Evaluate the control active at `time`.
    #[must_use]
    pub fn evaluate(&self, time: f64) -> DVector<f64> {
        let mut control = DVector::zeros(self.control_dof);
        // The length matches by construction.
        let _ = self.evaluate_into(&mut control, time);
        control
    }

    /// Evaluate the control active at `time` into a caller-owned vector.
    ///
    /// Times before the published trajectory return its first column; times
    /// past the horizon return the last column or the configured default.
    /// In between, the bracketing columns are linearly interpolated.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ControlDimMismatch`] if `control` has the
    /// wrong length.
    pub fn evaluate_into(
        &self,
        control: &mut DVector<f64>,
        time: f64,
    ) -> Result<(), ValidationError> {
        if control.len() != self.control_dof {
            return Err(ValidationError::ControlDimMismatch {
                expected: self.control_dof,
                got: control.len(),
            });
        }

        let published = self
            .published
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let position = (time - published.rollout_time) / self.step_size;
        if position <= 0.0 {
            control.copy_from(&published.trajectory.column(0));
            return Ok(());
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let lower = position.floor() as usize;
        if lower >= self.steps {
            if self.control_default_last {
                control.copy_from(&published.trajectory.column(self.steps - 1));
            } else {
                control.copy_from(&self.control_default_value);
            }
            return Ok(());
        }

        let upper = lower + 1;
        if upper >= self.steps {
            control.copy_from(&published.trajectory.column(self.steps - 1));
            return Ok(());
        }

        #[allow(clippy::cast_precision_loss)]
        let fraction = position - lower as f64;
        control.copy_from(&published.trajectory.column(lower));
        *control *= 1.0 - fraction;
        control.axpy(fraction, &published.trajectory.column(upper), 1.0);
        Ok(())
    }

    /// Snapshot of the published nominal trajectory.
    #[must_use]
    pub fn current_trajectory(&self) -> DMatrix<f64> {
        let published = self
            .published
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        published.trajectory.clone()
    }

    /// The time column zero of the published trajectory applies at.
    #[must_use]
    pub fn last_rollout_time(&self) -> f64 {
        let published = self
            .published
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        published.rollout_time
    }
}

// ---------------------------------------------------------------------------
// Trajectory
// ---------------------------------------------------------------------------

/// The MPPI trajectory optimizer.
///
/// Owns the dynamics, cost, sampler, and all rollout buffers; everything is
/// allocated at construction and reused for the optimizer's life. Rollout
/// workers receive independent dynamics/cost replicas, so user
/// implementations never see concurrent calls.
pub struct Trajectory {
    config: TrajectoryConfig,
    dynamics: Box<dyn Dynamics>,
    cost: Box<dyn Cost>,
    gaussian: Gaussian,
    smoother: Option<SavitzkyGolay>,
    pool: rayon::ThreadPool,

    steps: usize,
    state_dof: usize,
    control_dof: usize,

    /// The state rollouts are simulated from, set on every update.
    rollout_state: DVector<f64>,
    /// The time column zero of the working nominal applies at.
    rollout_time: f64,

    /// The working nominal control trajectory.
    nominal: DMatrix<f64>,
    /// The update applied on the previous cycle, for the anti-optimum
    /// rollout.
    previous_update: DMatrix<f64>,

    /// Noise bank: row block r holds rollout r's noise,
    /// `rollouts·control_dof × steps`.
    rollouts: DMatrix<f64>,
    costs: DVector<f64>,
    weights: DVector<f64>,
    gradient: DMatrix<f64>,

    /// Staging buffer for warm-started rollout noise.
    kept: DMatrix<f64>,
    /// Rollout indices ordered by cost, reused across cycles.
    ordered: Vec<usize>,

    view: ControlView,
}

impl Trajectory {
    /// Create an optimizer from its capabilities, configuration, and the
    /// initial system state.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration violates its invariants
    /// or disagrees with the capability dimensions.
    pub fn new(
        dynamics: Box<dyn Dynamics>,
        cost: Box<dyn Cost>,
        config: TrajectoryConfig,
        state: &DVector<f64>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let control_dof = dynamics.control_dof();
        let state_dof = dynamics.state_dof();

        if cost.control_dof() != control_dof {
            return Err(ConfigError::CapabilityMismatch {
                what: "control_dof",
                dynamics: control_dof,
                cost: cost.control_dof(),
            });
        }
        if cost.state_dof() != state_dof {
            return Err(ConfigError::CapabilityMismatch {
                what: "state_dof",
                dynamics: state_dof,
                cost: cost.state_dof(),
            });
        }
        if state.len() != state_dof {
            return Err(ConfigError::VectorLength {
                name: "initial state",
                len: state.len(),
                expected: state_dof,
            });
        }
        if config.covariance.nrows() != control_dof {
            return Err(ConfigError::MatrixShape {
                name: "covariance",
                rows: config.covariance.nrows(),
                cols: config.covariance.ncols(),
                expected_rows: control_dof,
                expected_cols: control_dof,
            });
        }
        if config.control_bound {
            if config.control_min.len() != control_dof {
                return Err(ConfigError::VectorLength {
                    name: "control_min",
                    len: config.control_min.len(),
                    expected: control_dof,
                });
            }
            if config.control_max.len() != control_dof {
                return Err(ConfigError::VectorLength {
                    name: "control_max",
                    len: config.control_max.len(),
                    expected: control_dof,
                });
            }
            for dim in 0..control_dof {
                if config.control_min[dim] > config.control_max[dim] {
                    return Err(ConfigError::EmptyControlBound {
                        dim,
                        min: config.control_min[dim],
                        max: config.control_max[dim],
                    });
                }
            }
        }
        if !config.control_default_last && config.control_default_value.len() != control_dof {
            return Err(ConfigError::VectorLength {
                name: "control_default_value",
                len: config.control_default_value.len(),
                expected: control_dof,
            });
        }

        let steps = config.steps();
        let smoother = match config.smoothing {
            Some(smoothing) => {
                if smoothing.window > steps {
                    return Err(ConfigError::SmoothingWindowTooLarge {
                        window: smoothing.window,
                        steps,
                    });
                }
                Some(SavitzkyGolay::new(smoothing.window, smoothing.order)?)
            }
            None => None,
        };

        let gaussian = Gaussian::zero_mean(
            &config.covariance,
            config.seed.map(|seed| derive_seed(seed, "sampler")),
        )?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .build()
            .map_err(|error| ConfigError::ThreadPool(error.to_string()))?;

        let nominal = DMatrix::zeros(control_dof, steps);
        let published = Arc::new(Mutex::new(Published {
            trajectory: nominal.clone(),
            rollout_time: 0.0,
        }));
        let view = ControlView {
            published,
            step_size: config.step_size,
            steps,
            control_dof,
            control_default_last: config.control_default_last,
            control_default_value: config.control_default_value.clone(),
        };

        let rollouts = config.rollouts;
        let keep_best = config.keep_best_rollouts;

        Ok(Self {
            dynamics,
            cost,
            gaussian,
            smoother,
            pool,
            steps,
            state_dof,
            control_dof,
            rollout_state: state.clone(),
            rollout_time: 0.0,
            nominal,
            previous_update: DMatrix::zeros(control_dof, steps),
            rollouts: DMatrix::zeros(rollouts * control_dof, steps),
            costs: DVector::zeros(rollouts),
            weights: DVector::zeros(rollouts),
            gradient: DMatrix::zeros(control_dof, steps),
            kept: DMatrix::zeros(keep_best * control_dof, steps),
            ordered: Vec::with_capacity(rollouts - RESERVED_ROLLOUTS),
            view,
            config,
        })
    }

    // -- Accessors --

    /// The optimizer configuration.
    #[must_use]
    pub const fn config(&self) -> &TrajectoryConfig {
        &self.config
    }

    /// Number of columns in the control trajectory.
    #[must_use]
    pub const fn steps(&self) -> usize {
        self.steps
    }

    /// Degrees of freedom of the control input.
    #[must_use]
    pub const fn control_dof(&self) -> usize {
        self.control_dof
    }

    /// Degrees of freedom of the system state.
    #[must_use]
    pub const fn state_dof(&self) -> usize {
        self.state_dof
    }

    /// The time column zero of the working nominal applies at.
    #[must_use]
    pub const fn rollout_time(&self) -> f64 {
        self.rollout_time
    }

    /// The noise block of a rollout, for logging and introspection.
    #[must_use]
    pub fn rollout(&self, index: usize) -> Option<DMatrix<f64>> {
        (index < self.config.rollouts).then(|| {
            self.rollouts
                .view((index * self.control_dof, 0), (self.control_dof, self.steps))
                .into_owned()
        })
    }

    /// The cumulative cost of a rollout from the last cycle.
    #[must_use]
    pub fn cost(&self, index: usize) -> Option<f64> {
        (index < self.config.rollouts).then(|| self.costs[index])
    }

    /// The weight of a rollout from the last cycle.
    #[must_use]
    pub fn weight(&self, index: usize) -> Option<f64> {
        (index < self.config.rollouts).then(|| self.weights[index])
    }

    /// Snapshot of the published nominal trajectory.
    #[must_use]
    pub fn current_trajectory(&self) -> DMatrix<f64> {
        self.view.current_trajectory()
    }

    /// A cloneable evaluator sharing this optimizer's published trajectory.
    #[must_use]
    pub fn view(&self) -> ControlView {
        self.view.clone()
    }

    /// Evaluate the published trajectory at `time`. See
    /// [`ControlView::evaluate_into`].
    #[must_use]
    pub fn evaluate(&self, time: f64) -> DVector<f64> {
        self.view.evaluate(time)
    }

    /// Evaluate the published trajectory at `time` into a caller-owned
    /// vector. See [`ControlView::evaluate_into`].
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ControlDimMismatch`] if `control` has the
    /// wrong length.
    pub fn evaluate_into(
        &self,
        control: &mut DVector<f64>,
        time: f64,
    ) -> Result<(), ValidationError> {
        self.view.evaluate_into(control, time)
    }

    // -- Update cycle --

    /// Run one full optimization cycle from `state` at `time`.
    ///
    /// Recoverable faults (diverged rollouts, degenerate weights) are logged
    /// and never propagate; the previous trajectory stays published.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if `state` has the wrong length or `time`
    /// is not finite. The cycle is skipped in that case.
    pub fn update(&mut self, state: &DVector<f64>, time: f64) -> Result<(), ValidationError> {
        if state.len() != self.state_dof {
            return Err(ValidationError::StateDimMismatch {
                expected: self.state_dof,
                got: state.len(),
            });
        }
        if !time.is_finite() {
            return Err(ValidationError::NonFiniteTime);
        }

        self.rollout_state.copy_from(state);
        self.sample(time);
        self.rollout_all();
        self.optimise();
        Ok(())
    }

    /// Time-shift the nominal and fill the rollout noise bank.
    fn sample(&mut self, time: f64) {
        let step_size = self.config.step_size;
        let elapsed = (time - self.rollout_time).max(0.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let shift = ((elapsed / step_size).floor() as usize).min(self.steps);
        #[allow(clippy::cast_precision_loss)]
        {
            self.rollout_time += shift as f64 * step_size;
        }

        // Order the previous cycle's sampled rollouts by cost before the
        // bank is overwritten. Reserved slots are regenerated every cycle.
        self.ordered.clear();
        self.ordered
            .extend(RESERVED_ROLLOUTS..self.config.rollouts);
        let costs = &self.costs;
        self.ordered.sort_by(|&a, &b| {
            costs[a]
                .partial_cmp(&costs[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let keep = self.config.keep_best_rollouts;
        let control_dof = self.control_dof;
        let steps = self.steps;

        // Stage the kept noise blocks: destinations and sources may overlap.
        for (slot, &index) in self.ordered.iter().take(keep).enumerate() {
            let source = self
                .rollouts
                .view((index * control_dof, 0), (control_dof, steps));
            self.kept
                .view_mut((slot * control_dof, 0), (control_dof, steps))
                .copy_from(&source);
        }

        // Shift the nominal so column zero is the next applied control.
        let fill = if self.config.control_default_last {
            self.nominal.column(steps - 1).into_owned()
        } else {
            self.config.control_default_value.clone()
        };
        shift_columns(&mut self.nominal, shift, &fill);
        shift_columns(
            &mut self.previous_update,
            shift,
            &DVector::zeros(control_dof),
        );

        // Rollout 0 keeps zero noise. Rollout 1 negates the previous update.
        self.rollouts
            .view_mut((control_dof, 0), (control_dof, steps))
            .copy_from(&(-&self.previous_update));

        // Warm-started rollouts: aligned columns survive the shift, only the
        // horizon that has come into view is freshly sampled.
        for slot in 0..keep {
            let row = (RESERVED_ROLLOUTS + slot) * control_dof;
            if shift < steps {
                let aligned = self
                    .kept
                    .view((slot * control_dof, shift), (control_dof, steps - shift));
                self.rollouts
                    .view_mut((row, 0), (control_dof, steps - shift))
                    .copy_from(&aligned);
            }
            for column in steps - shift..steps {
                let draw = self.gaussian.sample();
                self.rollouts
                    .view_mut((row, column), (control_dof, 1))
                    .copy_from(&draw);
            }
        }

        // Everything else is resampled in full.
        for index in RESERVED_ROLLOUTS + keep..self.config.rollouts {
            let row = index * control_dof;
            for column in 0..steps {
                let draw = self.gaussian.sample();
                self.rollouts
                    .view_mut((row, column), (control_dof, 1))
                    .copy_from(&draw);
            }
        }
    }

    /// Simulate and score every rollout on the worker pool.
    fn rollout_all(&mut self) {
        let control_dof = self.control_dof;
        let steps = self.steps;
        let step_size = self.config.step_size;
        let discount = self.config.cost_discount_factor;
        let start_time = self.rollout_time;
        let total_rollouts = self.config.rollouts;

        let nominal = &self.nominal;
        let bank = &self.rollouts;
        let initial = &self.rollout_state;
        let dynamics = &self.dynamics;
        let cost = &self.cost;

        let costs = self.costs.as_mut_slice();
        self.pool.install(|| {
            costs.par_iter_mut().enumerate().for_each_init(
                || (dynamics.clone_replica(), cost.clone_replica()),
                |(dynamics, cost), (index, total)| {
                    let noise = bank.view((index * control_dof, 0), (control_dof, steps));
                    *total = simulate(
                        dynamics.as_mut(),
                        cost.as_mut(),
                        initial,
                        nominal,
                        noise,
                        start_time,
                        step_size,
                        discount,
                    );
                },
            );
        });

        let failed = self.costs.iter().filter(|cost| !cost.is_finite()).count();
        if failed > 0 {
            warn!(failed, total = total_rollouts, "rollouts diverged this cycle");
        }
    }

    /// Weight the rollouts and gradient-step the nominal trajectory.
    fn optimise(&mut self) {
        let minimum = self
            .costs
            .iter()
            .copied()
            .filter(|cost| cost.is_finite())
            .fold(f64::INFINITY, f64::min);

        if !minimum.is_finite() {
            warn!("every rollout failed; holding the nominal trajectory");
            self.weights.fill(0.0);
            self.previous_update.fill(0.0);
            self.publish();
            return;
        }

        let scale = self.config.cost_scale;
        for index in 0..self.config.rollouts {
            let cost = self.costs[index];
            self.weights[index] = if cost.is_finite() {
                (-(cost - minimum) / scale).exp()
            } else {
                0.0
            };
        }

        let total: f64 = self.weights.iter().sum();
        if total > 0.0 {
            self.weights /= total;
        } else if self.config.uniform_weight_fallback {
            let finite = self.costs.iter().filter(|cost| cost.is_finite()).count();
            #[allow(clippy::cast_precision_loss)]
            let uniform = 1.0 / finite as f64;
            for index in 0..self.config.rollouts {
                self.weights[index] = if self.costs[index].is_finite() {
                    uniform
                } else {
                    0.0
                };
            }
        } else {
            warn!("rollout weights vanished; holding the nominal trajectory");
            self.weights.fill(0.0);
            self.previous_update.fill(0.0);
            self.publish();
            return;
        }

        // The gradient is the weighted mean of the rollout noise.
        self.gradient.fill(0.0);
        for index in 0..self.config.rollouts {
            let weight = self.weights[index];
            if weight == 0.0 {
                continue;
            }
            let noise = self
                .rollouts
                .view((index * self.control_dof, 0), (self.control_dof, self.steps));
            self.gradient += noise * weight;
        }

        let limit = self.config.gradient_minmax;
        self.gradient
            .apply(|value| *value = value.clamp(-limit, limit));

        let before = self.nominal.clone();
        let step = self.config.gradient_step;
        self.nominal += &self.gradient * step;

        if let Some(smoother) = &mut self.smoother {
            smoother.smooth_rows(&mut self.nominal);
        }

        if self.config.control_bound {
            for dim in 0..self.control_dof {
                let low = self.config.control_min[dim];
                let high = self.config.control_max[dim];
                for column in 0..self.steps {
                    let value = &mut self.nominal[(dim, column)];
                    *value = value.clamp(low, high);
                }
            }
        }

        self.previous_update.copy_from(&self.nominal);
        self.previous_update -= &before;

        self.publish();
    }

    /// Copy the working nominal into the published trajectory.
    fn publish(&self) {
        let mut published = self
            .view
            .published
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        published.trajectory.copy_from(&self.nominal);
        published.rollout_time = self.rollout_time;
    }
}

/// Shift `matrix` left by `shift` columns, filling freed columns with `fill`.
fn shift_columns(matrix: &mut DMatrix<f64>, shift: usize, fill: &DVector<f64>) {
    if shift == 0 {
        return;
    }
    let columns = matrix.ncols();
    for column in 0..columns.saturating_sub(shift) {
        let shifted = matrix.column(column + shift).into_owned();
        matrix.set_column(column, &shifted);
    }
    for column in columns.saturating_sub(shift)..columns {
        matrix.set_column(column, fill);
    }
}

/// Simulate one rollout and return its cumulative discounted cost.
///
/// A non-finite or negative step cost, or a non-finite post-step state,
/// fails the rollout with an infinite cost; it then contributes zero weight.
#[allow(clippy::too_many_arguments)]
fn simulate(
    dynamics: &mut dyn Dynamics,
    cost: &mut dyn Cost,
    initial: &DVector<f64>,
    nominal: &DMatrix<f64>,
    noise: DMatrixView<'_, f64>,
    start_time: f64,
    step_size: f64,
    discount: f64,
) -> f64 {
    dynamics.set(initial);
    cost.reset();

    let mut state = initial.clone();
    let mut control = DVector::zeros(nominal.nrows());
    let mut total = 0.0;
    let mut scale = 1.0;

    for step in 0..nominal.ncols() {
        control.copy_from(&nominal.column(step));
        control += noise.column(step);

        #[allow(clippy::cast_precision_loss)]
        let time = start_time + step as f64 * step_size;
        let step_cost = cost.evaluate(&state, &control, &*dynamics, time);
        if !step_cost.is_finite() || step_cost < 0.0 {
            return f64::INFINITY;
        }
        total += scale * step_cost;
        scale *= discount;

        let next = dynamics.step(&control, step_size);
        if !next.iter().all(|value| value.is_finite()) {
            return f64::INFINITY;
        }
        state.copy_from(next);
    }

    total
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use skein_test_utils::{FnCost, SetpointCost, SingleIntegrator};

    fn base_config(control_dof: usize) -> TrajectoryConfig {
        TrajectoryConfig {
            rollouts: 16,
            keep_best_rollouts: 0,
            step_size: 0.25,
            horizon: 2.0,
            gradient_step: 1.0,
            gradient_minmax: 10.0,
            cost_scale: 1.0,
            cost_discount_factor: 1.0,
            covariance: DMatrix::identity(control_dof, control_dof) * 0.5,
            control_bound: false,
            control_min: DVector::zeros(0),
            control_max: DVector::zeros(0),
            control_default_last: true,
            control_default_value: DVector::zeros(0),
            smoothing: None,
            threads: 2,
            seed: Some(42),
            uniform_weight_fallback: false,
        }
    }

    fn setpoint_trajectory(control_dof: usize) -> Trajectory {
        let dynamics = SingleIntegrator::new(control_dof);
        let cost = SetpointCost::new(DVector::from_element(control_dof, 1.0), control_dof, 1.0);
        Trajectory::new(
            Box::new(dynamics),
            Box::new(cost),
            base_config(control_dof),
            &DVector::zeros(control_dof),
        )
        .unwrap()
    }

    // ---- Construction validation ----

    #[test]
    fn rejects_covariance_dimension_mismatch() {
        let config = TrajectoryConfig {
            covariance: DMatrix::identity(3, 3),
            ..base_config(2)
        };
        let result = Trajectory::new(
            Box::new(SingleIntegrator::new(2)),
            Box::new(SetpointCost::new(DVector::zeros(2), 2, 1.0)),
            config,
            &DVector::zeros(2),
        );
        assert!(matches!(result, Err(ConfigError::MatrixShape { .. })));
    }

    #[test]
    fn rejects_initial_state_length_mismatch() {
        let result = Trajectory::new(
            Box::new(SingleIntegrator::new(2)),
            Box::new(SetpointCost::new(DVector::zeros(2), 2, 1.0)),
            base_config(2),
            &DVector::zeros(3),
        );
        assert!(matches!(result, Err(ConfigError::VectorLength { .. })));
    }

    #[test]
    fn rejects_capability_dof_mismatch() {
        let result = Trajectory::new(
            Box::new(SingleIntegrator::new(2)),
            Box::new(SetpointCost::new(DVector::zeros(3), 3, 1.0)),
            base_config(2),
            &DVector::zeros(2),
        );
        assert!(matches!(
            result,
            Err(ConfigError::CapabilityMismatch { .. })
        ));
    }

    #[test]
    fn rejects_bound_length_mismatch() {
        let config = TrajectoryConfig {
            control_bound: true,
            control_min: DVector::zeros(1),
            control_max: DVector::zeros(2),
            ..base_config(2)
        };
        let result = Trajectory::new(
            Box::new(SingleIntegrator::new(2)),
            Box::new(SetpointCost::new(DVector::zeros(2), 2, 1.0)),
            config,
            &DVector::zeros(2),
        );
        assert!(matches!(result, Err(ConfigError::VectorLength { .. })));
    }

    #[test]
    fn rejects_empty_bound() {
        let config = TrajectoryConfig {
            control_bound: true,
            control_min: DVector::from_vec(vec![1.0, 0.0]),
            control_max: DVector::from_vec(vec![-1.0, 0.0]),
            ..base_config(2)
        };
        let result = Trajectory::new(
            Box::new(SingleIntegrator::new(2)),
            Box::new(SetpointCost::new(DVector::zeros(2), 2, 1.0)),
            config,
            &DVector::zeros(2),
        );
        assert!(matches!(
            result,
            Err(ConfigError::EmptyControlBound { dim: 0, .. })
        ));
    }

    #[test]
    fn rejects_missing_default_control() {
        let config = TrajectoryConfig {
            control_default_last: false,
            control_default_value: DVector::zeros(0),
            ..base_config(2)
        };
        let result = Trajectory::new(
            Box::new(SingleIntegrator::new(2)),
            Box::new(SetpointCost::new(DVector::zeros(2), 2, 1.0)),
            config,
            &DVector::zeros(2),
        );
        assert!(matches!(result, Err(ConfigError::VectorLength { .. })));
    }

    #[test]
    fn rejects_smoothing_window_exceeding_steps() {
        let config = TrajectoryConfig {
            step_size: 0.5,
            horizon: 2.0, // 4 steps
            smoothing: Some(crate::config::SmoothingConfig {
                window: 5,
                order: 1,
            }),
            ..base_config(1)
        };
        let result = Trajectory::new(
            Box::new(SingleIntegrator::new(1)),
            Box::new(SetpointCost::new(DVector::zeros(1), 1, 1.0)),
            config,
            &DVector::zeros(1),
        );
        assert!(matches!(
            result,
            Err(ConfigError::SmoothingWindowTooLarge { .. })
        ));
    }

    // ---- Shape invariants ----

    #[test]
    fn buffer_shapes_stable_across_cycles() {
        let mut trajectory = setpoint_trajectory(2);
        assert_eq!(trajectory.steps(), 8);

        for cycle in 0..5 {
            trajectory
                .update(&DVector::zeros(2), f64::from(cycle) * 0.25)
                .unwrap();
            let published = trajectory.current_trajectory();
            assert_eq!(published.nrows(), 2);
            assert_eq!(published.ncols(), 8);
            let bank = trajectory.rollout(7).unwrap();
            assert_eq!(bank.nrows(), 2);
            assert_eq!(bank.ncols(), 8);
        }
    }

    #[test]
    fn distinct_state_and_control_dimensions() {
        // A double integrator: two states driven by one control.
        use skein_test_utils::LinearDynamics;
        #[rustfmt::skip]
        let a = DMatrix::from_row_slice(2, 2, &[
            0.0, 1.0,
            0.0, 0.0,
        ]);
        let b = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);
        let mut trajectory = Trajectory::new(
            Box::new(LinearDynamics::new(a, b)),
            Box::new(SetpointCost::new(DVector::from_vec(vec![1.0, 0.0]), 1, 1.0)),
            base_config(1),
            &DVector::zeros(2),
        )
        .unwrap();

        assert_eq!(trajectory.state_dof(), 2);
        assert_eq!(trajectory.control_dof(), 1);

        trajectory.update(&DVector::zeros(2), 0.0).unwrap();
        let published = trajectory.current_trajectory();
        assert_eq!(published.nrows(), 1);
        assert_eq!(published.ncols(), 8);
        assert_eq!(trajectory.evaluate(0.1).len(), 1);
    }

    // ---- Reserved rollouts ----

    #[test]
    fn rollout_zero_noise_is_identically_zero() {
        let mut trajectory = setpoint_trajectory(1);
        for cycle in 0..4 {
            trajectory
                .update(&DVector::zeros(1), f64::from(cycle) * 0.25)
                .unwrap();
            let zero_block = trajectory.rollout(0).unwrap();
            assert_eq!(zero_block, DMatrix::zeros(1, 8));
        }
    }

    #[test]
    fn anti_optimum_negates_previous_update() {
        let mut trajectory = setpoint_trajectory(1);
        trajectory.update(&DVector::zeros(1), 0.0).unwrap();
        let first = trajectory.current_trajectory();

        // Second cycle at the same time: rollout 1 must negate the first
        // cycle's update (the first nominal minus the zero start).
        trajectory.update(&DVector::zeros(1), 0.0).unwrap();
        let anti = trajectory.rollout(1).unwrap();
        assert_relative_eq!(anti, -first, epsilon = 1e-12);
    }

    // ---- Weight law ----

    #[test]
    fn weights_normalize_to_one() {
        let mut trajectory = setpoint_trajectory(2);
        trajectory.update(&DVector::zeros(2), 0.0).unwrap();

        let total: f64 = (0..16).map(|i| trajectory.weight(i).unwrap()).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-12);
        for i in 0..16 {
            assert!(trajectory.weight(i).unwrap() >= 0.0);
        }
    }

    // ---- Time bookkeeping ----

    #[test]
    fn rollout_time_monotone_in_step_multiples() {
        let mut trajectory = setpoint_trajectory(1);
        let mut previous = trajectory.rollout_time();

        for (cycle, time) in [0.0, 0.3, 0.5, 0.5, 1.2, 2.0].into_iter().enumerate() {
            trajectory.update(&DVector::zeros(1), time).unwrap();
            let current = trajectory.rollout_time();
            assert!(current >= previous, "cycle {cycle} went backwards");
            let steps = (current - previous) / 0.25;
            assert_relative_eq!(steps, steps.round(), epsilon = 1e-9);
            previous = current;
        }
    }

    // ---- Boundedness ----

    #[test]
    fn published_trajectory_respects_bounds() {
        let config = TrajectoryConfig {
            control_bound: true,
            control_min: DVector::from_element(1, -0.1),
            control_max: DVector::from_element(1, 0.1),
            ..base_config(1)
        };
        let mut trajectory = Trajectory::new(
            Box::new(SingleIntegrator::new(1)),
            Box::new(SetpointCost::new(DVector::from_element(1, 5.0), 1, 1.0)),
            config,
            &DVector::zeros(1),
        )
        .unwrap();

        for cycle in 0..5 {
            trajectory
                .update(&DVector::zeros(1), f64::from(cycle) * 0.25)
                .unwrap();
        }
        for value in trajectory.current_trajectory().iter() {
            assert!((-0.1..=0.1).contains(value), "unbounded control {value}");
        }
    }

    // ---- Zero-covariance idempotence ----

    #[test]
    fn zero_covariance_never_moves_the_nominal() {
        let config = TrajectoryConfig {
            covariance: DMatrix::zeros(1, 1),
            ..base_config(1)
        };
        let mut trajectory = Trajectory::new(
            Box::new(SingleIntegrator::new(1)),
            Box::new(SetpointCost::new(DVector::from_element(1, 1.0), 1, 1.0)),
            config,
            &DVector::zeros(1),
        )
        .unwrap();

        for cycle in 0..10 {
            trajectory
                .update(&DVector::zeros(1), f64::from(cycle) * 0.25)
                .unwrap();
            assert_eq!(trajectory.current_trajectory(), DMatrix::zeros(1, 8));
            assert_eq!(trajectory.evaluate(f64::from(cycle) * 0.25), DVector::zeros(1));
        }
    }

    // ---- Degenerate cycles ----

    #[test]
    fn all_failed_rollouts_hold_the_nominal() {
        let mut trajectory = setpoint_trajectory(1);
        trajectory.update(&DVector::zeros(1), 0.0).unwrap();
        let before = trajectory.current_trajectory();

        // A NaN state makes every rollout diverge.
        trajectory
            .update(&DVector::from_element(1, f64::NAN), 0.0)
            .unwrap();
        assert_eq!(trajectory.current_trajectory(), before);
        for i in 0..16 {
            assert_eq!(trajectory.weight(i).unwrap(), 0.0);
        }
    }

    #[test]
    fn non_finite_cost_fails_rollout() {
        let cost = FnCost::new(1, 1, |state, _control, _time| {
            if state[0] > 0.5 { f64::NAN } else { 1.0 }
        });
        let mut trajectory = Trajectory::new(
            Box::new(SingleIntegrator::new(1)),
            Box::new(cost),
            base_config(1),
            &DVector::zeros(1),
        )
        .unwrap();
        trajectory.update(&DVector::zeros(1), 0.0).unwrap();

        // Weights of diverged rollouts are exactly zero.
        for i in 0..16 {
            let cost = trajectory.cost(i).unwrap();
            let weight = trajectory.weight(i).unwrap();
            if !cost.is_finite() {
                assert_eq!(weight, 0.0);
            }
        }
    }

    #[test]
    fn negative_cost_fails_rollout() {
        let cost = FnCost::new(1, 1, |_state, control, _time| control[0]);
        let mut trajectory = Trajectory::new(
            Box::new(SingleIntegrator::new(1)),
            Box::new(cost),
            base_config(1),
            &DVector::zeros(1),
        )
        .unwrap();
        trajectory.update(&DVector::zeros(1), 0.0).unwrap();

        for i in 0..16 {
            let cost = trajectory.cost(i).unwrap();
            assert!(cost.is_infinite() || cost >= 0.0);
        }
    }

    // ---- Update validation ----

    #[test]
    fn update_rejects_wrong_state_length() {
        let mut trajectory = setpoint_trajectory(2);
        let result = trajectory.update(&DVector::zeros(3), 0.0);
        assert!(matches!(
            result,
            Err(ValidationError::StateDimMismatch {
                expected: 2,
                got: 3
            })
        ));
    }

    #[test]
    fn update_rejects_non_finite_time() {
        let mut trajectory = setpoint_trajectory(1);
        assert!(matches!(
            trajectory.update(&DVector::zeros(1), f64::NAN),
            Err(ValidationError::NonFiniteTime)
        ));
    }

    // ---- Evaluation ----

    #[test]
    fn evaluation_interpolates_linearly_at_midpoints() {
        let mut trajectory = setpoint_trajectory(1);
        trajectory.update(&DVector::zeros(1), 0.0).unwrap();

        let published = trajectory.current_trajectory();
        for column in 0..6 {
            #[allow(clippy::cast_precision_loss)]
            let midpoint = (column as f64 + 0.5) * 0.25;
            let value = trajectory.evaluate(midpoint);
            let expected = 0.5 * (published[(0, column)] + published[(0, column + 1)]);
            assert_relative_eq!(value[0], expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn evaluation_before_start_returns_first_column() {
        let mut trajectory = setpoint_trajectory(1);
        trajectory.update(&DVector::zeros(1), 0.0).unwrap();
        let published = trajectory.current_trajectory();
        let value = trajectory.evaluate(-5.0);
        assert_relative_eq!(value[0], published[(0, 0)]);
    }

    #[test]
    fn evaluation_past_horizon_returns_last_column() {
        let mut trajectory = setpoint_trajectory(1);
        trajectory.update(&DVector::zeros(1), 0.0).unwrap();
        let published = trajectory.current_trajectory();
        let value = trajectory.evaluate(100.0);
        assert_relative_eq!(value[0], published[(0, 7)]);
    }

    #[test]
    fn evaluation_past_horizon_returns_default_value() {
        let config = TrajectoryConfig {
            control_default_last: false,
            control_default_value: DVector::from_element(1, 0.125),
            ..base_config(1)
        };
        let mut trajectory = Trajectory::new(
            Box::new(SingleIntegrator::new(1)),
            Box::new(SetpointCost::new(DVector::from_element(1, 1.0), 1, 1.0)),
            config,
            &DVector::zeros(1),
        )
        .unwrap();
        trajectory.update(&DVector::zeros(1), 0.0).unwrap();
        let value = trajectory.evaluate(100.0);
        assert_relative_eq!(value[0], 0.125);
    }

    #[test]
    fn evaluate_into_rejects_wrong_length() {
        let trajectory = setpoint_trajectory(2);
        let mut control = DVector::zeros(3);
        assert!(matches!(
            trajectory.evaluate_into(&mut control, 0.0),
            Err(ValidationError::ControlDimMismatch {
                expected: 2,
                got: 3
            })
        ));
    }

    #[test]
    fn view_matches_owner_evaluation() {
        let mut trajectory = setpoint_trajectory(2);
        trajectory.update(&DVector::zeros(2), 0.0).unwrap();
        let view = trajectory.view();
        for time in [0.0, 0.1, 0.25, 1.3, 5.0] {
            assert_eq!(view.evaluate(time), trajectory.evaluate(time));
        }
        assert_relative_eq!(view.last_rollout_time(), trajectory.rollout_time());
    }

    // ---- Determinism ----

    #[test]
    fn fixed_seed_reproduces_the_run() {
        let run = || {
            let mut trajectory = setpoint_trajectory(2);
            for cycle in 0..5 {
                trajectory
                    .update(&DVector::zeros(2), f64::from(cycle) * 0.25)
                    .unwrap();
            }
            trajectory.current_trajectory()
        };
        assert_eq!(run(), run());
    }

    // ---- Smoothing ----

    #[test]
    fn smoothing_keeps_shape_and_bounds() {
        let config = TrajectoryConfig {
            smoothing: Some(crate::config::SmoothingConfig {
                window: 5,
                order: 2,
            }),
            control_bound: true,
            control_min: DVector::from_element(1, -1.0),
            control_max: DVector::from_element(1, 1.0),
            ..base_config(1)
        };
        let mut trajectory = Trajectory::new(
            Box::new(SingleIntegrator::new(1)),
            Box::new(SetpointCost::new(DVector::from_element(1, 1.0), 1, 1.0)),
            config,
            &DVector::zeros(1),
        )
        .unwrap();

        for cycle in 0..4 {
            trajectory
                .update(&DVector::zeros(1), f64::from(cycle) * 0.25)
                .unwrap();
        }
        let published = trajectory.current_trajectory();
        assert_eq!(published.ncols(), 8);
        for value in published.iter() {
            assert!((-1.0..=1.0).contains(value));
        }
    }
}
