// sequest_core/src/config.rs

//! Typed filter configuration, validated once at construction.

use serde::{Deserialize, Serialize};

use crate::error::{EstimatorError, EstimatorResult};

/// Selects how the reported full covariance is recomposed after a
/// measurement update.
///
/// The committed square-root factor always comes from the thin-QR path; the
/// `Simple` and `Joseph` forms only change the full matrix handed to
/// records and reports, and exist for diagnostic comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CovarianceUpdate {
    /// Recompose from the updated square-root factor (operative path).
    #[default]
    SquareRoot,
    /// P = (I - K*H) * Pbar
    Simple,
    /// Joseph-stabilized form: (I-KH) * Pbar * (I-KH)^T + K*R*K^T
    Joseph,
}

/// Configuration for one sequential filter instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Per-axis acceleration noise sigma for the SNC process noise model.
    /// All three values must be strictly positive.
    pub accel_noise_sigma: [f64; 3],

    /// Cadence, in seconds, at which process noise is re-evaluated during
    /// long propagation gaps. Zero re-evaluates at every step.
    pub process_noise_step: f64,

    /// Position-uncertainty threshold (same length unit as the state) above
    /// which measurements are de-weighted. De-weighting also requires a
    /// positive `deweight_coeff`.
    pub deweight_threshold: f64,

    /// Dimensionless de-weighting coefficient; the effective measurement
    /// weight is inflated by sqrt(1 + coeff). Must be >= 0.
    pub deweight_coeff: f64,

    /// Span, in seconds, over which state corrections accumulate in the
    /// linearization offset before being rectified into the primary state.
    /// Zero disables delayed rectification.
    pub delay_rectify_span: f64,

    /// Emit per-step progress lines at info level instead of debug.
    /// Never affects numeric results.
    pub verbose: bool,

    /// Strategy for the reported full covariance after a measurement update.
    pub covariance_update: CovarianceUpdate,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            accel_noise_sigma: [1e-8, 1e-8, 1e-8],
            process_noise_step: 0.0,
            deweight_threshold: f64::INFINITY,
            deweight_coeff: 0.0,
            delay_rectify_span: 0.0,
            verbose: false,
            covariance_update: CovarianceUpdate::SquareRoot,
        }
    }
}

impl FilterConfig {
    /// Fails fast on invalid settings, before any filter step executes.
    pub fn validate(&self) -> EstimatorResult<()> {
        for sigma in self.accel_noise_sigma {
            if sigma <= 0.0 {
                return Err(EstimatorError::Config(format!(
                    "a nonpositive number ({sigma}) was set as acceleration noise sigma; \
                     a valid value has to be a positive number"
                )));
            }
        }
        if self.process_noise_step < 0.0 {
            return Err(EstimatorError::Config(
                "the process noise step must be non-negative".into(),
            ));
        }
        if self.deweight_coeff < 0.0 {
            return Err(EstimatorError::Config(
                "the de-weighting coefficient must be non-negative".into(),
            ));
        }
        if self.deweight_threshold <= 0.0 {
            return Err(EstimatorError::Config(
                "the de-weighting threshold must be positive".into(),
            ));
        }
        if self.delay_rectify_span < 0.0 {
            return Err(EstimatorError::Config(
                "the delayed rectification span must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(FilterConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_sigma_and_coefficients() {
        let mut config = FilterConfig::default();
        config.accel_noise_sigma = [1e-8, -1e-8, 1e-8];
        assert!(config.validate().is_err());

        let mut config = FilterConfig::default();
        config.deweight_coeff = -0.5;
        assert!(config.validate().is_err());

        let mut config = FilterConfig::default();
        config.delay_rectify_span = -60.0;
        assert!(config.validate().is_err());
    }
}
