// sequest_core/src/obs.rs

//! Observation data as seen by the filter: the raw records from the
//! measurement manager and the computed values from a measurement model.

use nalgebra::{DMatrix, DVector};

use crate::types::{Epoch, ObsHandle};

/// Acceptable physical range for a troposphere delay correction, meters.
pub const TROPOSPHERE_RANGE_M: (f64, f64) = (0.0, 60.0);
/// Acceptable physical range for an ionosphere delay correction, meters.
pub const IONOSPHERE_RANGE_M: (f64, f64) = (0.0, 20.0);

/// Edit/validity state of an observation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditFlag {
    /// Accepted; state and covariance are updated with this record.
    #[default]
    Normal,
    /// Rejected by editing; diagnostics only, no state/covariance mutation.
    Rejected,
    /// An ancillary correction was outside its physical range.
    OutOfRange,
}

impl EditFlag {
    pub fn is_normal(self) -> bool {
        matches!(self, EditFlag::Normal)
    }
}

/// Signal-path media corrections attached to an observation, meters.
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaCorrection {
    pub troposphere: f64,
    pub ionosphere: f64,
}

impl MediaCorrection {
    /// True when both delays sit inside their physical ranges.
    pub fn in_range(&self) -> bool {
        self.troposphere >= TROPOSPHERE_RANGE_M.0
            && self.troposphere <= TROPOSPHERE_RANGE_M.1
            && self.ionosphere >= IONOSPHERE_RANGE_M.0
            && self.ionosphere <= IONOSPHERE_RANGE_M.1
    }
}

/// One observation record from the measurement manager.
#[derive(Debug, Clone)]
pub struct Observation {
    /// Identity of this record; the smoother matches on it across passes.
    pub handle: ObsHandle,
    pub epoch: Epoch,
    /// Observation type label, e.g. "Range" or "Doppler". Reporting only.
    pub kind: String,
    /// Observed value(s); length is the measurement dimension.
    pub value: DVector<f64>,
    /// Measurement noise covariance R (measurement-dim square).
    pub noise_covariance: DMatrix<f64>,
    pub media_correction: Option<MediaCorrection>,
    pub edit_flag: EditFlag,
}

impl Observation {
    pub fn dim(&self) -> usize {
        self.value.len()
    }
}

/// A measurement model evaluation at the current linearization point.
#[derive(Debug, Clone)]
pub struct ComputedMeasurement {
    /// Computed (predicted) value(s), same dimension as the observation.
    pub value: DVector<f64>,
    /// Partials H = dh/dx (measurement-dim x state-dim).
    pub partials: DMatrix<f64>,
    /// False when the model could not be evaluated (e.g. no visibility);
    /// the record is then carried as diagnostics only.
    pub is_calculated: bool,
}
