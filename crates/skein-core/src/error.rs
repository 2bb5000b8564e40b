use thiserror::Error;

/// Top-level error type for the skein workspace.
#[derive(Debug, Error)]
pub enum SkeinError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Construction-time configuration errors.
///
/// Every variant is raised before an optimizer or sampler is produced.
/// None of them can occur during `update` or evaluation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid rollout count: {0} (must be >= 2)")]
    InvalidRollouts(usize),

    #[error("keep_best_rollouts {keep_best} exceeds rollouts - 2 = {limit}")]
    KeepBestTooLarge { keep_best: usize, limit: usize },

    #[error("Invalid step_size: {0} (must be > 0)")]
    InvalidStepSize(f64),

    #[error("Invalid horizon: {0} (must be > 0)")]
    InvalidHorizon(f64),

    #[error("Invalid gradient_step: {0} (must be in (0, 1])")]
    InvalidGradientStep(f64),

    #[error("Invalid gradient_minmax: {0} (must be > 0)")]
    InvalidGradientMinmax(f64),

    #[error("Invalid cost_scale: {0} (must be > 0)")]
    InvalidCostScale(f64),

    #[error("Invalid cost_discount_factor: {0} (must be in (0, 1])")]
    InvalidDiscountFactor(f64),

    #[error("Invalid thread count: 0 (must be >= 1)")]
    InvalidThreads,

    #[error(
        "{name} has shape ({rows}, {cols}), expected ({expected_rows}, {expected_cols})"
    )]
    MatrixShape {
        name: &'static str,
        rows: usize,
        cols: usize,
        expected_rows: usize,
        expected_cols: usize,
    },

    #[error("{name} has length {len}, expected {expected}")]
    VectorLength {
        name: &'static str,
        len: usize,
        expected: usize,
    },

    #[error("Control bound is empty at dimension {dim}: min {min} > max {max}")]
    EmptyControlBound { dim: usize, min: f64, max: f64 },

    #[error("Smoothing window {window} must be odd, >= 3, and greater than order {order}")]
    InvalidSmoothing { window: usize, order: usize },

    #[error("Smoothing window {window} exceeds trajectory steps {steps}")]
    SmoothingWindowTooLarge { window: usize, steps: usize },

    #[error("Capability mismatch on {what}: dynamics reports {dynamics}, cost reports {cost}")]
    CapabilityMismatch {
        what: &'static str,
        dynamics: usize,
        cost: usize,
    },

    #[error("Failed to build rollout thread pool: {0}")]
    ThreadPool(String),
}

/// Hot-path validation errors.
///
/// Copy + static messages for cheap propagation during update cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("State dimension mismatch: expected {expected}, got {got}")]
    StateDimMismatch { expected: usize, got: usize },

    #[error("Control dimension mismatch: expected {expected}, got {got}")]
    ControlDimMismatch { expected: usize, got: usize },

    #[error("Observation dimension mismatch: expected {expected}, got {got}")]
    ObservationDimMismatch { expected: usize, got: usize },

    #[error("Time is not finite")]
    NonFiniteTime,
}
