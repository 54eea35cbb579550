// sequest_core/src/prelude.rs

// --- Core Abstractions (The main contracts of the library) ---
pub use crate::abstractions::{MeasurementProvider, PropagatedStep, Propagator};
pub use crate::noise::{FrameRotation, InertialFrame, SncProcessNoise};
pub use crate::types::{Epoch, ObsHandle, RunDirection, State};

// --- Core Data Structures (The "nouns" of the library) ---
pub use crate::filter::{
    CovarianceInit, MeasurementStat, PassHistory, PassInit, UpdateRecord,
};
pub use crate::obs::{ComputedMeasurement, EditFlag, MediaCorrection, Observation};

// --- Configuration and Errors ---
pub use crate::config::{CovarianceUpdate, FilterConfig};
pub use crate::error::{EstimatorError, EstimatorResult};

// --- Estimation Algorithms ---
pub use crate::filter::{FilterState, KalmanFilter};
pub use crate::restart::{read_restart_file, write_restart_file, WarmStart};
pub use crate::smoother::{SmoothedRecord, Smoother};
