//! Sampling-based model-predictive (MPPI) trajectory generation.
//!
//! This crate implements the controller core: given a pluggable dynamics
//! simulator and cost functional, it continuously refines a nominal control
//! trajectory toward the exponentially-weighted mean of randomly perturbed
//! candidate rollouts. The pipeline per update cycle:
//!
//! 1. **Sample** — correlated Gaussian noise per rollout ([`Gaussian`])
//! 2. **Rollout** — parallel simulation and scoring through the
//!    [`Dynamics`] and [`Cost`] capabilities
//! 3. **Optimise** — weighted-noise gradient step on the nominal
//! 4. **Publish** — lock-protected trajectory for concurrent evaluation
//!
//! # Architecture
//!
//! The optimizer ([`Trajectory`]) exclusively owns its capabilities and
//! buffers. Rollouts fan out over a fixed-size worker pool, each worker
//! holding independent dynamics/cost replicas; everything around the fan-out
//! runs on the caller's thread. Consumers evaluate the published trajectory
//! through cheap [`ControlView`] handles from any thread.
//!
//! External disturbances are forecast by the `skein-forecast` crate; cost
//! functions read predictions through its non-owning `ForecastHandle`.

pub mod config;
pub mod cost;
pub mod dynamics;
pub mod gaussian;
pub mod smooth;
pub mod trajectory;

pub use config::{SmoothingConfig, TrajectoryConfig};
pub use cost::{Cost, QuadraticBarrier};
pub use dynamics::Dynamics;
pub use gaussian::Gaussian;
pub use smooth::SavitzkyGolay;
pub use trajectory::{ControlView, RESERVED_ROLLOUTS, Trajectory};
