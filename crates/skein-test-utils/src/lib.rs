//! Reference dynamics and cost implementations for skein tests.
//!
//! These are the smallest honest implementations of the optimizer's
//! capability traits: integrator and linear dynamics, a quadratic setpoint
//! cost, and a closure-backed cost for scenario-specific objectives. They
//! are consumed as a dev-dependency by the other crates' test suites.

pub mod cost;
pub mod dynamics;

pub use cost::{FnCost, SetpointCost};
pub use dynamics::{LinearDynamics, SingleIntegrator};
