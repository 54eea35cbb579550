// sequest_core/src/types.rs

use nalgebra::DVector;

// --- Core Type Aliases ---
pub type State = DVector<f64>;

/// A point in time, expressed as seconds in the run's time scale.
pub type Epoch = f64;

/// Two epochs closer than this are treated as the same instant.
///
/// Matching tolerance for observation lookup and for the smoother's
/// forward/backward record pairing.
pub const EPOCH_TOLERANCE: f64 = 1e-6;

/// Square-root covariance diagonal magnitudes below this trip the
/// positive-definiteness warning.
pub const SQRT_COV_FLOOR: f64 = 1e-16;

// --- Core Identifier ---
/// A unique, hashable identifier for one observation record.
///
/// The smoother matches forward and backward filter steps on this handle, so
/// two observations at the same epoch are still distinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ObsHandle(pub u64);

/// The direction a filter pass runs through the observation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunDirection {
    Forward,
    Backward,
}

impl RunDirection {
    /// Sign of a time step taken in this direction.
    pub fn sign(self) -> f64 {
        match self {
            RunDirection::Forward => 1.0,
            RunDirection::Backward => -1.0,
        }
    }

    pub fn is_forward(self) -> bool {
        matches!(self, RunDirection::Forward)
    }
}
