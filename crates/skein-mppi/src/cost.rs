//! The cost capability: scoring rollout steps.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::dynamics::Dynamics;

/// An objective function scoring one step of a rollout.
///
/// [`evaluate`](Self::evaluate) must be deterministic given its inputs and
/// the dynamics' current state, and must return a nonnegative value; the
/// weighting step treats negative or non-finite costs as a failed rollout.
/// Each rollout worker owns an independent replica produced by
/// [`clone_replica`](Self::clone_replica).
pub trait Cost: Send + Sync {
    /// Expected degrees of freedom of the system state.
    fn state_dof(&self) -> usize;

    /// Expected degrees of freedom of the control input.
    fn control_dof(&self) -> usize;

    /// Score a `(state, control, time)` tuple.
    ///
    /// `dynamics` is the simulator that produced `state`; implementations
    /// can downcast it to read auxiliary quantities computed by the most
    /// recent step.
    fn evaluate(
        &mut self,
        state: &DVector<f64>,
        control: &DVector<f64>,
        dynamics: &dyn Dynamics,
        time: f64,
    ) -> f64;

    /// Reset accumulated objective state. Called at the start of every
    /// rollout.
    fn reset(&mut self) {}

    /// Produce an independent replica for a rollout worker thread.
    fn clone_replica(&self) -> Box<dyn Cost>;
}

// ---------------------------------------------------------------------------
// QuadraticBarrier
// ---------------------------------------------------------------------------

/// A one-sided quadratic penalty beyond a limit.
///
/// Zero inside the limit; `constant + quadratic · excess²` beyond it. The
/// usual building block for joint-limit and reach objectives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuadraticBarrier {
    /// The boundary of the feasible region.
    pub limit: f64,
    /// Fixed penalty paid on any violation.
    pub constant: f64,
    /// Scale of the quadratic penalty on the violation distance.
    pub quadratic: f64,
}

impl QuadraticBarrier {
    /// Create a barrier at `limit`.
    #[must_use]
    pub const fn new(limit: f64, constant: f64, quadratic: f64) -> Self {
        Self {
            limit,
            constant,
            quadratic,
        }
    }

    /// Penalty for `value` falling below the limit.
    #[must_use]
    pub fn below(&self, value: f64) -> f64 {
        if value < self.limit {
            self.constant + self.quadratic * (self.limit - value).powi(2)
        } else {
            0.0
        }
    }

    /// Penalty for `value` exceeding the limit.
    #[must_use]
    pub fn above(&self, value: f64) -> f64 {
        if value > self.limit {
            self.constant + self.quadratic * (value - self.limit).powi(2)
        } else {
            0.0
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn barrier_zero_inside_limit() {
        let barrier = QuadraticBarrier::new(1.0, 1000.0, 100_000.0);
        assert_relative_eq!(barrier.above(0.5), 0.0);
        assert_relative_eq!(barrier.below(1.5), 0.0);
        assert_relative_eq!(barrier.above(1.0), 0.0);
        assert_relative_eq!(barrier.below(1.0), 0.0);
    }

    #[test]
    fn barrier_penalizes_violation() {
        let barrier = QuadraticBarrier::new(2.0, 1000.0, 100_000.0);
        // 0.1 beyond the limit: 1000 + 100000 * 0.01 = 2000.
        assert_relative_eq!(barrier.above(2.1), 2000.0, epsilon = 1e-6);
        let lower = QuadraticBarrier::new(-2.0, 1000.0, 100_000.0);
        assert_relative_eq!(lower.below(-2.1), 2000.0, epsilon = 1e-6);
    }

    #[test]
    fn barrier_penalty_grows_quadratically() {
        let barrier = QuadraticBarrier::new(0.0, 0.0, 1.0);
        assert_relative_eq!(barrier.above(3.0), 9.0);
        assert_relative_eq!(barrier.below(-4.0), 16.0);
    }
}
