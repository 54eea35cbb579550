// sequest_core/src/filter/records.rs

//! Per-step history records. The filter driver appends one record per
//! committed step; reporting and the smoother only ever read them.

use nalgebra::{DMatrix, DVector};

use crate::obs::EditFlag;
use crate::types::{Epoch, ObsHandle, RunDirection, State};

/// Measurement-step diagnostics, including the pre-update (apriori) state
/// and covariance the smoother needs.
#[derive(Debug, Clone)]
pub struct MeasurementStat {
    pub handle: ObsHandle,
    pub kind: String,
    pub epoch: Epoch,
    pub observed: DVector<f64>,
    /// Computed value at the linearization point, offset-corrected.
    pub computed: DVector<f64>,
    /// O-C residual, offset-corrected.
    pub residual: DVector<f64>,
    /// Residual per component, scaled by sqrt((H*Pbar*H^T + R) diagonal).
    pub scaled_residual: Vec<f64>,
    pub edit_flag: EditFlag,
    /// Gain actually applied; `None` when the update was skipped.
    pub kalman_gain: Option<DMatrix<f64>>,
    /// State before this measurement was applied.
    pub apriori_state: State,
    /// Full covariance before this measurement was applied.
    pub apriori_cov: DMatrix<f64>,
    /// Square-root covariance before this measurement was applied.
    pub apriori_sqrt_cov: DMatrix<f64>,
}

/// One committed filter step.
#[derive(Debug, Clone)]
pub struct UpdateRecord {
    pub epoch: Epoch,
    /// True when a measurement was processed at this step; false for
    /// pure-propagation (covariance-only) steps.
    pub measurement_processed: bool,
    /// Post-update state.
    pub state: State,
    /// Post-update full covariance, symmetrized.
    pub cov: DMatrix<f64>,
    /// Post-update square-root covariance factor.
    pub sqrt_cov: DMatrix<f64>,
    /// Present iff `measurement_processed`.
    pub meas: Option<MeasurementStat>,
}

impl UpdateRecord {
    /// Identity check used when pairing forward and backward histories:
    /// both records must be propagation-only, or must carry the same
    /// observation handle.
    pub fn same_observation(&self, other: &UpdateRecord) -> bool {
        match (&self.meas, &other.meas) {
            (None, None) => true,
            (Some(a), Some(b)) => a.handle == b.handle,
            _ => false,
        }
    }
}

/// The immutable outcome of one completed filter pass.
#[derive(Debug, Clone)]
pub struct PassHistory {
    pub direction: RunDirection,
    pub records: Vec<UpdateRecord>,
}

impl PassHistory {
    pub fn state_size(&self) -> usize {
        self.records.first().map_or(0, |r| r.state.len())
    }
}
