//! Reference dynamics implementations.

use std::any::Any;

use nalgebra::{DMatrix, DVector};

use skein_mppi::Dynamics;

// ---------------------------------------------------------------------------
// SingleIntegrator
// ---------------------------------------------------------------------------

/// The simplest controllable system: `ẋ = u` in every coordinate.
#[derive(Debug, Clone)]
pub struct SingleIntegrator {
    state: DVector<f64>,
}

impl SingleIntegrator {
    /// Create an integrator with `dof` state (and control) dimensions,
    /// starting at the origin.
    #[must_use]
    pub fn new(dof: usize) -> Self {
        Self {
            state: DVector::zeros(dof),
        }
    }

    /// The current state.
    #[must_use]
    pub const fn state(&self) -> &DVector<f64> {
        &self.state
    }
}

impl Dynamics for SingleIntegrator {
    fn state_dof(&self) -> usize {
        self.state.len()
    }

    fn control_dof(&self) -> usize {
        self.state.len()
    }

    fn set(&mut self, state: &DVector<f64>) {
        self.state.copy_from(state);
    }

    fn step(&mut self, control: &DVector<f64>, dt: f64) -> &DVector<f64> {
        self.state.axpy(dt, control, 1.0);
        &self.state
    }

    fn clone_replica(&self) -> Box<dyn Dynamics> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// LinearDynamics
// ---------------------------------------------------------------------------

/// A linear system `ẋ = A x + B u`, integrated with forward Euler.
#[derive(Debug, Clone)]
pub struct LinearDynamics {
    a: DMatrix<f64>,
    b: DMatrix<f64>,
    state: DVector<f64>,
}

impl LinearDynamics {
    /// Create a linear system from its `A` and `B` matrices, starting at the
    /// origin.
    ///
    /// # Panics
    ///
    /// Panics if `A` is not square or `B` has a different row count; the
    /// reference systems in tests are constructed from literals.
    #[must_use]
    pub fn new(a: DMatrix<f64>, b: DMatrix<f64>) -> Self {
        assert_eq!(a.nrows(), a.ncols(), "A must be square");
        assert_eq!(a.nrows(), b.nrows(), "A and B row counts must agree");
        let state = DVector::zeros(a.nrows());
        Self { a, b, state }
    }

    /// The current state.
    #[must_use]
    pub const fn state(&self) -> &DVector<f64> {
        &self.state
    }
}

impl Dynamics for LinearDynamics {
    fn state_dof(&self) -> usize {
        self.a.nrows()
    }

    fn control_dof(&self) -> usize {
        self.b.ncols()
    }

    fn set(&mut self, state: &DVector<f64>) {
        self.state.copy_from(state);
    }

    fn step(&mut self, control: &DVector<f64>, dt: f64) -> &DVector<f64> {
        let derivative = &self.a * &self.state + &self.b * control;
        self.state.axpy(dt, &derivative, 1.0);
        &self.state
    }

    fn clone_replica(&self) -> Box<dyn Dynamics> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
