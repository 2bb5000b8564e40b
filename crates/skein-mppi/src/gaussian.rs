//! Multivariate Gaussian sampling for rollout noise.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use skein_core::error::ConfigError;
use skein_core::seed::rng_from_seed;

/// A multivariate Gaussian sampler.
///
/// Construction performs a self-adjoint eigendecomposition of the covariance
/// `Σ = V Λ Vᵀ` and stores the transform `T = V Λ^{1/2}`; a draw is then
/// `mean + T z` with `z` standard normal. Eigenvalues are clamped at zero
/// before the square root so a positive-semidefinite covariance with
/// roundoff-negative eigenvalues never produces NaN.
#[derive(Debug, Clone)]
pub struct Gaussian {
    mean: DVector<f64>,
    /// Transform from N(0, I) draws to the correlated distribution.
    transform: DMatrix<f64>,
    rng: ChaCha8Rng,
}

impl Gaussian {
    /// Create a zero-mean sampler for the given covariance.
    ///
    /// Pass `Some(seed)` for a reproducible stream; `None` seeds from OS
    /// entropy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MatrixShape`] if the covariance is not square.
    pub fn zero_mean(covariance: &DMatrix<f64>, seed: Option<u64>) -> Result<Self, ConfigError> {
        Self::new(&DVector::zeros(covariance.nrows()), covariance, seed)
    }

    /// Create a sampler with the given mean and covariance.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MatrixShape`] if the covariance is not square,
    /// or [`ConfigError::VectorLength`] if the mean length disagrees with it.
    pub fn new(
        mean: &DVector<f64>,
        covariance: &DMatrix<f64>,
        seed: Option<u64>,
    ) -> Result<Self, ConfigError> {
        if covariance.nrows() != covariance.ncols() {
            return Err(ConfigError::MatrixShape {
                name: "covariance",
                rows: covariance.nrows(),
                cols: covariance.ncols(),
                expected_rows: covariance.nrows(),
                expected_cols: covariance.nrows(),
            });
        }
        if mean.len() != covariance.nrows() {
            return Err(ConfigError::VectorLength {
                name: "mean",
                len: mean.len(),
                expected: covariance.nrows(),
            });
        }

        let eigen = covariance.clone().symmetric_eigen();
        let roots = eigen.eigenvalues.map(|value| value.max(0.0).sqrt());
        let transform = eigen.eigenvectors * DMatrix::from_diagonal(&roots);

        Ok(Self {
            mean: mean.clone(),
            transform,
            rng: rng_from_seed(seed),
        })
    }

    /// Dimension of the distribution.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Draw one sample.
    pub fn sample(&mut self) -> DVector<f64> {
        let rng = &mut self.rng;
        let standard =
            DVector::from_fn(self.mean.len(), |_, _| rng.sample::<f64, _>(StandardNormal));
        &self.mean + &self.transform * standard
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
