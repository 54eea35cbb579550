// sequest_core/src/filter/time_update.rs

//! Time update: propagate the square-root covariance (and the linearization
//! offset, when active) across one step using the STM and process noise.

use nalgebra::DMatrix;

use crate::abstractions::{PropagatedStep, Propagator};
use crate::diag::WarningKind;
use crate::error::{EstimatorError, EstimatorResult};
use crate::linalg::{
    cholesky_factor, compress_zero_diagonal, expand_factor, symmetrize, thin_qr,
};
use crate::types::SQRT_COV_FLOOR;

use super::{KalmanFilter, NOISE_TIME_TOLERANCE};

impl KalmanFilter {
    /// Advances the a-priori covariance across the interval covered by
    /// `stepped`, based on Cholesky factorization of the process noise and
    /// a thin-QR combination of the candidate factors.
    pub(super) fn time_update(
        &mut self,
        stepped: &PropagatedStep,
        dt: f64,
        propagator: &dyn Propagator,
    ) -> EstimatorResult<()> {
        let n = self.state_size;

        // Process noise over the step, evaluated with |dt| so the block is
        // positive semi-definite in both run directions. Very small steps
        // skip the noise entirely.
        let mut q = DMatrix::<f64>::zeros(n, n);
        if dt.abs() >= NOISE_TIME_TOLERANCE {
            let block = self.noise_model.process_noise(dt.abs(), self.epoch + dt);
            let m = n.min(6);
            for i in 0..m {
                for j in 0..m {
                    q[(i, j)] = block[(i, j)];
                }
            }
        }

        // Conversion derivatives between the Cartesian and solve-for bases:
        // [dX/dS] from the previous step, [dS/dX] at the current one.
        let cart_to_solve = propagator.cart_to_solve_jacobian();
        let solve_from_cart =
            cart_to_solve
                .clone()
                .try_inverse()
                .ok_or_else(|| EstimatorError::Factorization {
                    context: "the Cartesian-to-solve-for conversion derivative matrix".into(),
                })?;

        let q_s = &solve_from_cart * &q * solve_from_cart.transpose();
        let stm_s = &solve_from_cart * &stepped.stm * &self.cart_to_solve_prev;

        // The offset evolves linearly through the raw STM; no noise is added
        // to the offset itself.
        if let Some(offset) = &mut self.offset {
            *offset = &stepped.stm * &*offset;
        }

        // Factor the noise, compressing exact-zero diagonal rows/columns so
        // an unexcited axis does not fail the Cholesky.
        let has_zero_diag = (0..n).any(|i| q_s[(i, i)] == 0.0);
        let sqrt_q = if !has_zero_diag {
            cholesky_factor(&q_s, "process noise")
                .map_err(|_| EstimatorError::ProcessNoiseNotPositiveDefinite)?
        } else {
            let (reduced, kept) = compress_zero_diagonal(&q_s);
            if reduced.nrows() == 0 {
                DMatrix::zeros(n, n)
            } else {
                let reduced_sqrt = cholesky_factor(&reduced, "process noise")
                    .map_err(|_| EstimatorError::ProcessNoiseNotPositiveDefinite)?;
                expand_factor(&reduced_sqrt, &kept, n)
            }
        };

        self.sqrt_cov = thin_qr(&(&stm_s * &self.sqrt_cov), &sqrt_q);

        // Warn (non-fatally) if the factor's diagonal collapsed.
        for i in 0..n {
            if self.sqrt_cov[(i, i)].abs() < SQRT_COV_FLOOR {
                let epoch = self.epoch + dt;
                self.warnings
                    .warn(WarningKind::CovarianceNotPositiveDefinite, || {
                        format!(
                            "the covariance is no longer positive definite at epoch {epoch:.6}"
                        )
                    });
                break;
            }
        }

        let mut p_bar = &self.sqrt_cov * self.sqrt_cov.transpose();
        symmetrize(&mut p_bar);
        self.covariance = p_bar;

        self.cart_to_solve_prev = cart_to_solve;
        Ok(())
    }
}
