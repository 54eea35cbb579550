// sequest_core/src/filter/measurement_update.rs

//! Measurement update: residual and partials via the external measurement
//! model, Kalman gain through square-root factors, state/covariance commit.

use nalgebra::DMatrix;

use crate::abstractions::MeasurementProvider;
use crate::config::CovarianceUpdate;
use crate::diag::WarningKind;
use crate::error::{EstimatorError, EstimatorResult};
use crate::linalg::{cholesky_factor, symmetrize, thin_qr};
use crate::obs::EditFlag;
use crate::types::SQRT_COV_FLOOR;

use super::{KalmanFilter, MeasurementStat, UpdateRecord};

impl KalmanFilter {
    /// Incorporates the current observation into the state and covariance
    /// and returns the update record to commit.
    pub(super) fn measurement_update(
        &mut self,
        measurements: &mut dyn MeasurementProvider,
    ) -> EstimatorResult<UpdateRecord> {
        let n = self.state_size;
        let obs = measurements
            .current()
            .cloned()
            .ok_or(EstimatorError::NoObservations)?;

        // --- Setup ---

        let mut edit_flag = obs.edit_flag;
        if let Some(media) = &obs.media_correction {
            if !media.in_range() {
                edit_flag = EditFlag::OutOfRange;
                let (epoch, tropo, iono) = (obs.epoch, media.troposphere, media.ionosphere);
                self.warnings
                    .warn(WarningKind::MediaCorrectionOutOfRange, || {
                        format!(
                            "media correction out of physical range at epoch {epoch:.6} \
                             (troposphere {tropo} m, ionosphere {iono} m); measurement edited out"
                        )
                    });
            }
        }

        let mut p_bar = &self.sqrt_cov * self.sqrt_cov.transpose();
        symmetrize(&mut p_bar);

        let apriori_state = self.state();
        let apriori_sqrt_cov = self.sqrt_cov.clone();

        // --- Residual and partials ---

        let computed = measurements.compute(&self.state, self.epoch);
        assert_eq!(
            computed.partials.ncols(),
            n,
            "measurement partials column count must match the state size"
        );
        assert_eq!(
            computed.value.len(),
            obs.dim(),
            "computed measurement dimension must match the observation"
        );

        let h = computed.partials.clone();
        let r = obs.noise_covariance.clone();

        let mut computed_value = computed.value.clone();
        let mut residual = &obs.value - &computed.value;

        // First-order correction for drift since the last rectification.
        if let Some(offset) = &self.offset {
            let h_x = &h * offset;
            computed_value += &h_x;
            residual -= &h_x;
        }

        // Element-by-element scaled residuals for editing and diagnostics.
        let r_bar = &h * &p_bar * h.transpose() + &r;
        let scaled_residual: Vec<f64> = (0..residual.len())
            .map(|k| residual[k] / r_bar[(k, k)].sqrt())
            .collect();

        // --- Gain and commit ---

        let mut kalman_gain = None;
        if computed.is_calculated && edit_flag.is_normal() {
            // Measurement underweighting (Lear's method): inflate the
            // effective noise when the position uncertainty is large.
            let mut sqrt_scale = 1.0;
            let pos_trace: f64 = (0..n.min(3)).map(|i| p_bar[(i, i)]).sum();
            let pos_sigma = pos_trace.sqrt();
            if pos_sigma > self.config.deweight_threshold && self.config.deweight_coeff > 0.0 {
                sqrt_scale = (1.0 + self.config.deweight_coeff).sqrt();
                let (handle, kind, epoch) = (obs.handle.0, obs.kind.clone(), obs.epoch);
                self.warnings
                    .warn(WarningKind::MeasurementUnderweighted, || {
                        format!(
                            "measurement {handle} of type {kind} at epoch {epoch:.6} was \
                             underweighted (1 sigma position uncertainty was {pos_sigma:.6})"
                        )
                    });
            }

            let sqrt_r = cholesky_factor(&r, "the measurement noise covariance")?;

            let s_w = thin_qr(&(&h * &self.sqrt_cov * sqrt_scale), &sqrt_r);
            let w = &s_w * s_w.transpose();
            let w_inv = w.try_inverse().ok_or_else(|| EstimatorError::Factorization {
                context: "the measurement information matrix".into(),
            })?;

            let gain = &p_bar * h.transpose() * w_inv;

            let identity = DMatrix::<f64>::identity(n, n);
            let i_kh = &identity - &gain * &h;
            let sqrt_p_update = thin_qr(&(&i_kh * &self.sqrt_cov), &(&gain * &sqrt_r));

            // State correction goes into the offset while delayed
            // rectification is active, into the primary state otherwise.
            let dx = &gain * &residual;
            match &mut self.offset {
                Some(offset) => *offset += &dx,
                None => self.state += &dx,
            }

            self.sqrt_cov = sqrt_p_update;
            for i in 0..n {
                if self.sqrt_cov[(i, i)].abs() < SQRT_COV_FLOOR {
                    let epoch = self.epoch;
                    self.warnings
                        .warn(WarningKind::CovarianceNotPositiveDefinite, || {
                            format!(
                                "the covariance is no longer positive definite at epoch {epoch:.6}"
                            )
                        });
                    break;
                }
            }

            // The committed factor is always the square-root path; the
            // configured strategy only selects the reported full matrix.
            let mut full = match self.config.covariance_update {
                CovarianceUpdate::SquareRoot => &self.sqrt_cov * self.sqrt_cov.transpose(),
                CovarianceUpdate::Simple => &i_kh * &p_bar,
                CovarianceUpdate::Joseph => {
                    &i_kh * &p_bar * i_kh.transpose() + &gain * &r * gain.transpose()
                }
            };
            symmetrize(&mut full);
            self.covariance = full;

            kalman_gain = Some(gain);
        } else {
            // Edited-out measurement: diagnostics only, no state or
            // covariance mutation.
            let mut full = &self.sqrt_cov * self.sqrt_cov.transpose();
            symmetrize(&mut full);
            self.covariance = full;
        }

        Ok(UpdateRecord {
            epoch: self.epoch,
            measurement_processed: true,
            state: self.state(),
            cov: self.covariance.clone(),
            sqrt_cov: self.sqrt_cov.clone(),
            meas: Some(MeasurementStat {
                handle: obs.handle,
                kind: obs.kind.clone(),
                epoch: obs.epoch,
                observed: obs.value.clone(),
                computed: computed_value,
                residual,
                scaled_residual,
                edit_flag,
                kalman_gain,
                apriori_state,
                apriori_cov: p_bar,
                apriori_sqrt_cov,
            }),
        })
    }
}
