//! Reference cost implementations.

use std::sync::Arc;

use nalgebra::DVector;

use skein_mppi::{Cost, Dynamics};

// ---------------------------------------------------------------------------
// SetpointCost
// ---------------------------------------------------------------------------

/// A quadratic penalty on the distance from a state setpoint:
/// `weight · ‖x − x*‖²`.
#[derive(Debug, Clone)]
pub struct SetpointCost {
    target: DVector<f64>,
    control_dof: usize,
    weight: f64,
}

impl SetpointCost {
    /// Create a cost steering the state toward `target`.
    #[must_use]
    pub const fn new(target: DVector<f64>, control_dof: usize, weight: f64) -> Self {
        Self {
            target,
            control_dof,
            weight,
        }
    }
}

impl Cost for SetpointCost {
    fn state_dof(&self) -> usize {
        self.target.len()
    }

    fn control_dof(&self) -> usize {
        self.control_dof
    }

    fn evaluate(
        &mut self,
        state: &DVector<f64>,
        _control: &DVector<f64>,
        _dynamics: &dyn Dynamics,
        _time: f64,
    ) -> f64 {
        self.weight * (state - &self.target).norm_squared()
    }

    fn clone_replica(&self) -> Box<dyn Cost> {
        Box::new(self.clone())
    }
}

// ---------------------------------------------------------------------------
// FnCost
// ---------------------------------------------------------------------------

type CostFn = dyn Fn(&DVector<f64>, &DVector<f64>, f64) -> f64 + Send + Sync;

/// A cost backed by a closure over `(state, control, time)`.
///
/// Replicas share the closure through an [`Arc`], so scenario tests can close
/// over shared interior state (for example a switchable target).
#[derive(Clone)]
pub struct FnCost {
    state_dof: usize,
    control_dof: usize,
    function: Arc<CostFn>,
}

impl FnCost {
    /// Create a cost from a closure.
    pub fn new(
        state_dof: usize,
        control_dof: usize,
        function: impl Fn(&DVector<f64>, &DVector<f64>, f64) -> f64 + Send + Sync + 'static,
    ) -> Self {
        Self {
            state_dof,
            control_dof,
            function: Arc::new(function),
        }
    }
}

impl Cost for FnCost {
    fn state_dof(&self) -> usize {
        self.state_dof
    }

    fn control_dof(&self) -> usize {
        self.control_dof
    }

    fn evaluate(
        &mut self,
        state: &DVector<f64>,
        control: &DVector<f64>,
        _dynamics: &dyn Dynamics,
        time: f64,
    ) -> f64 {
        (self.function)(state, control, time)
    }

    fn clone_replica(&self) -> Box<dyn Cost> {
        Box::new(self.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
