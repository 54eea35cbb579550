// sequest_core/src/error.rs

use thiserror::Error;

/// Fatal estimator errors. Any of these aborts the run before or at the
/// offending step; recoverable numeric conditions go through
/// [`crate::diag::WarningLog`] instead.
#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("the covariance matrix is {got}x{got} but the state has {expected} elements")]
    CovarianceDimension { expected: usize, got: usize },

    #[error("the process noise matrix is not positive definite")]
    ProcessNoiseNotPositiveDefinite,

    #[error("matrix is not positive definite and cannot be factorized: {context}")]
    Factorization { context: String },

    #[error("{0}")]
    Config(String),

    #[error("no observation data was available for estimation")]
    NoObservations,

    #[error(
        "unable to find a matching epoch between the forward and backward \
         filter data while smoothing (epoch {epoch})"
    )]
    SmootherNoMatch { epoch: f64 },

    #[error("filter history is not sorted by epoch at index {index} (epoch {epoch})")]
    HistoryNotSorted { index: usize, epoch: f64 },

    #[error("restart file error: {0}")]
    Restart(String),

    #[error("restart file I/O: {0}")]
    RestartIo(#[from] std::io::Error),
}

pub type EstimatorResult<T> = Result<T, EstimatorError>;
