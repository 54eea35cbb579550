// sequest_core/src/noise.rs

//! State-noise-compensation (SNC) process noise.
//!
//! Produces the 6x6 position/velocity noise covariance block for an elapsed
//! propagation interval, rotated into the estimation working frame at the
//! evaluation epoch.

use std::fmt::Debug;

use dyn_clone::DynClone;
use nalgebra::{Matrix3, Matrix6, Vector3};

use crate::error::{EstimatorError, EstimatorResult};
use crate::types::Epoch;

// --- FRAME ROTATION TRAIT ---
/// Supplies the rotation from the frame the acceleration sigmas are expressed
/// in to the estimation working frame at a given epoch.
///
/// Implementations must be cheap to clone: each filter pass owns its own
/// process-noise model so concurrent forward/backward passes never share the
/// cached matrix.
pub trait FrameRotation: Debug + DynClone + Send + Sync {
    fn rotation_at(&self, epoch: Epoch) -> Matrix3<f64>;
}

dyn_clone::clone_trait_object!(FrameRotation);

/// The trivial rotation: sigmas are already expressed in the working frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct InertialFrame;

impl FrameRotation for InertialFrame {
    fn rotation_at(&self, _epoch: Epoch) -> Matrix3<f64> {
        Matrix3::identity()
    }
}

// --- SNC PROCESS NOISE MODEL ---
#[derive(Debug, Clone)]
struct CachedNoise {
    elapsed: f64,
    epoch: Epoch,
    matrix: Matrix6<f64>,
}

/// SNC process noise with a per-axis acceleration-noise sigma.
///
/// The last-evaluated matrix is cached; the cache is invalidated whenever the
/// elapsed time or the evaluation epoch changes.
#[derive(Debug, Clone)]
pub struct SncProcessNoise {
    accel_sigma: Vector3<f64>,
    frame: Box<dyn FrameRotation>,
    cached: Option<CachedNoise>,
}

impl SncProcessNoise {
    /// Creates the model. Every sigma must be strictly positive; anything
    /// else is a configuration error raised before the run starts.
    pub fn new(accel_sigma: Vector3<f64>) -> EstimatorResult<Self> {
        Self::with_frame(accel_sigma, Box::new(InertialFrame))
    }

    pub fn with_frame(
        accel_sigma: Vector3<f64>,
        frame: Box<dyn FrameRotation>,
    ) -> EstimatorResult<Self> {
        for i in 0..3 {
            if accel_sigma[i] <= 0.0 {
                return Err(EstimatorError::Config(format!(
                    "a nonpositive number ({}) was set as acceleration noise sigma; \
                     a valid value has to be a positive number",
                    accel_sigma[i]
                )));
            }
        }
        Ok(Self {
            accel_sigma,
            frame,
            cached: None,
        })
    }

    pub fn accel_sigma(&self) -> &Vector3<f64> {
        &self.accel_sigma
    }

    /// The noise covariance block for `elapsed` seconds, rotated into the
    /// working frame at `epoch`.
    ///
    /// Per axis i: pos-pos = sigma_i^2 * dt^3 / 3, pos-vel = sigma_i^2 * dt^2 / 2
    /// (symmetric placements), vel-vel = sigma_i^2 * dt. Off-axis cross terms
    /// are zero. The caller passes `|dt|` regardless of run direction, so the
    /// block is positive semi-definite for both forward and backward passes.
    pub fn process_noise(&mut self, elapsed: f64, epoch: Epoch) -> Matrix6<f64> {
        if let Some(cached) = &self.cached {
            if cached.elapsed == elapsed && cached.epoch == epoch {
                return cached.matrix;
            }
        }

        let dt = elapsed;
        let dt2 = dt * dt;
        let dt3 = dt * dt2;

        let mut q = Matrix6::<f64>::zeros();
        for i in 0..3 {
            let var = self.accel_sigma[i] * self.accel_sigma[i];
            q[(i, i)] = var * dt3 / 3.0;
            q[(i, i + 3)] = var * dt2 / 2.0;
            q[(i + 3, i)] = var * dt2 / 2.0;
            q[(i + 3, i + 3)] = var * dt;
        }

        let rot3 = self.frame.rotation_at(epoch);
        let mut rot6 = Matrix6::<f64>::zeros();
        rot6.view_mut((0, 0), (3, 3)).copy_from(&rot3);
        rot6.view_mut((3, 3), (3, 3)).copy_from(&rot3);

        let matrix = rot6 * q * rot6.transpose();
        self.cached = Some(CachedNoise {
            elapsed,
            epoch,
            matrix,
        });
        matrix
    }
}
