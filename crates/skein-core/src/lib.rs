//! Shared infrastructure for the skein controller workspace.
//!
//! Contains the workspace error taxonomy and the deterministic seed
//! derivation used by every stochastic component.

pub mod error;
pub mod seed;

pub use error::{ConfigError, SkeinError, ValidationError};
