//! Savitzky–Golay smoothing of the nominal trajectory.
//!
//! Fits a least-squares polynomial over a sliding window and replaces each
//! sample with the fitted value. Interior samples use a symmetric window;
//! samples near either end reuse the full window anchored at the edge and
//! evaluate the fit at their own offset, rather than padding.

use nalgebra::{DMatrix, DVector};

use skein_core::error::ConfigError;

/// A precomputed Savitzky–Golay filter.
///
/// Construction solves the window's polynomial projection once; smoothing a
/// trajectory is then a sequence of dot products.
#[derive(Debug, Clone)]
pub struct SavitzkyGolay {
    window: usize,
    /// Projection of a window of samples onto their fitted values,
    /// `window` square.
    projection: DMatrix<f64>,
    scratch: Vec<f64>,
}

impl SavitzkyGolay {
    /// Create a filter fitting an `order` polynomial over `window` samples.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSmoothing`] unless the window is odd,
    /// at least 3, and greater than the order.
    pub fn new(window: usize, order: usize) -> Result<Self, ConfigError> {
        if window < 3 || window % 2 == 0 || order >= window {
            return Err(ConfigError::InvalidSmoothing { window, order });
        }

        // Vandermonde design matrix over offsets 0..window.
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_possible_wrap
        )]
        let design =
            DMatrix::from_fn(window, order + 1, |row, col| (row as f64).powi(col as i32));

        let normal = design.transpose() * &design;
        let Some(normal_inverse) = normal.try_inverse() else {
            // The normal equations of a Vandermonde system with window >
            // order distinct nodes are nonsingular.
            return Err(ConfigError::InvalidSmoothing { window, order });
        };
        let projection = &design * normal_inverse * design.transpose();

        Ok(Self {
            window,
            projection,
            scratch: vec![0.0; window],
        })
    }

    /// The filter window in samples.
    #[must_use]
    pub const fn window(&self) -> usize {
        self.window
    }

    /// Smooth every row of `trajectory` in place.
    ///
    /// Rows shorter than the window are left untouched.
    pub fn smooth_rows(&mut self, trajectory: &mut DMatrix<f64>) {
        let columns = trajectory.ncols();
        if columns < self.window {
            return;
        }

        let half = self.window / 2;
        let mut smoothed = DVector::zeros(columns);

        for row in 0..trajectory.nrows() {
            for target in 0..columns {
                // Window start and the target's offset within the window.
                let (start, offset) = if target < half {
                    (0, target)
                } else if target + half >= columns {
                    (columns - self.window, target - (columns - self.window))
                } else {
                    (target - half, half)
                };

                for (i, slot) in self.scratch.iter_mut().enumerate() {
                    *slot = trajectory[(row, start + i)];
                }

                let mut value = 0.0;
                for (i, sample) in self.scratch.iter().enumerate() {
                    value += self.projection[(offset, i)] * sample;
                }
                smoothed[target] = value;
            }

            for target in 0..columns {
                trajectory[(row, target)] = smoothed[target];
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
