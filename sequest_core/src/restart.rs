// sequest_core/src/restart.rs

//! Warm-start file contract: one row-oriented text record per committed
//! step, carrying the epoch, the state, and the lower triangle of the
//! square-root covariance under `SqrtCovariance_<i>_<j>` headers.

use std::fs;
use std::path::Path;

use nalgebra::DMatrix;

use crate::error::{EstimatorError, EstimatorResult};
use crate::filter::{CovarianceInit, PassHistory, PassInit};
use crate::linalg::cholesky_factor;
use crate::types::{Epoch, RunDirection, State};

/// The state and factorized covariance recovered from a restart file.
#[derive(Debug, Clone)]
pub struct WarmStart {
    pub epoch: Epoch,
    pub state: State,
    pub sqrt_cov: DMatrix<f64>,
}

impl WarmStart {
    /// Initial conditions for a pass resuming from this warm start.
    pub fn into_pass_init(self, direction: RunDirection) -> PassInit {
        PassInit {
            epoch: self.epoch,
            state: self.state,
            covariance: CovarianceInit::SquareRoot(self.sqrt_cov),
            direction,
            predict_to: None,
        }
    }
}

/// Writes one row per committed step of `history`.
pub fn write_restart_file(path: &Path, history: &PassHistory) -> EstimatorResult<()> {
    let n = history.state_size();
    if n == 0 {
        return Err(EstimatorError::Restart(
            "cannot write a restart file from an empty history".into(),
        ));
    }

    let mut out = String::new();

    out.push_str("Epoch");
    for i in 1..=n {
        out.push_str(&format!(",State_{i}"));
    }
    for i in 1..=n {
        for j in 1..=i {
            out.push_str(&format!(",SqrtCovariance_{i}_{j}"));
        }
    }
    out.push('\n');

    for record in &history.records {
        out.push_str(&format!("{:.12e}", record.epoch));
        for i in 0..n {
            out.push_str(&format!(",{:.15e}", record.state[i]));
        }
        for i in 0..n {
            for j in 0..=i {
                out.push_str(&format!(",{:.15e}", record.sqrt_cov[(i, j)]));
            }
        }
        out.push('\n');
    }

    fs::write(path, out)?;
    Ok(())
}

/// Reads the final committed row of a restart file.
///
/// If the `SqrtCovariance_1_1` header is absent, falls back to full
/// `Covariance_<i>_<j>` columns and factorizes on load. If the file carries
/// fewer states than `state_size`, the additional states' block of the
/// factor is seeded from a Cholesky factorization of `combined_covariance`,
/// which must then cover the full combined space.
pub fn read_restart_file(
    path: &Path,
    state_size: usize,
    combined_covariance: Option<&DMatrix<f64>>,
) -> EstimatorResult<WarmStart> {
    let contents = fs::read_to_string(path)?;
    let mut lines = contents.lines().filter(|l| !l.trim().is_empty());

    let header: Vec<&str> = lines
        .next()
        .ok_or_else(|| EstimatorError::Restart("the restart file is empty".into()))?
        .split(',')
        .map(str::trim)
        .collect();

    let last_row: Vec<f64> = lines
        .last()
        .ok_or_else(|| EstimatorError::Restart("the restart file has no data rows".into()))?
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .map_err(|e| EstimatorError::Restart(format!("unparsable value '{v}': {e}")))
        })
        .collect::<EstimatorResult<_>>()?;

    if last_row.len() != header.len() {
        return Err(EstimatorError::Restart(format!(
            "row has {} values but the header has {} columns",
            last_row.len(),
            header.len()
        )));
    }

    let epoch_idx = find_column(&header, "Epoch")?;
    let first_state_idx = find_column(&header, "State_1")?;
    let file_dim = header
        .iter()
        .filter(|h| h.starts_with("State_"))
        .count();

    if file_dim == 0 || file_dim > state_size {
        return Err(EstimatorError::Restart(format!(
            "the restart file carries {file_dim} states but the run solves for {state_size}"
        )));
    }

    let epoch = last_row[epoch_idx];
    let mut state = State::zeros(state_size);
    for i in 0..file_dim {
        state[i] = last_row[first_state_idx + i];
    }

    // Lower triangle of the file covariance, factorized or full.
    let file_factor = if let Ok(first_cov_idx) = find_column(&header, "SqrtCovariance_1_1") {
        read_lower_triangle(&last_row, first_cov_idx, file_dim)
    } else {
        // Fall back to a full (non-factorized) covariance and factor it.
        let first_cov_idx = find_column(&header, "Covariance_1_1")?;
        let lower = read_lower_triangle(&last_row, first_cov_idx, file_dim);
        let mut full = &lower + lower.transpose();
        for i in 0..file_dim {
            full[(i, i)] = lower[(i, i)];
        }
        cholesky_factor(&full, "the restart file covariance")?
    };

    let mut sqrt_cov = DMatrix::<f64>::zeros(state_size, state_size);
    sqrt_cov
        .view_mut((0, 0), (file_dim, file_dim))
        .copy_from(&file_factor);

    // Additional solve-for states missing from the file: seed their block
    // from a factorization of the combined-space covariance.
    if file_dim < state_size {
        let combined = combined_covariance.ok_or_else(|| {
            EstimatorError::Restart(format!(
                "the restart file carries {file_dim} of {state_size} states; a combined \
                 covariance is required to seed the remaining block"
            ))
        })?;
        if combined.nrows() != state_size {
            return Err(EstimatorError::CovarianceDimension {
                expected: state_size,
                got: combined.nrows(),
            });
        }

        let full_factor = cholesky_factor(combined, "the combined warm-start covariance")?;
        for i in file_dim..state_size {
            for j in 0..=i {
                sqrt_cov[(i, j)] = full_factor[(i, j)];
            }
        }
    }

    Ok(WarmStart {
        epoch,
        state,
        sqrt_cov,
    })
}

fn find_column(header: &[&str], name: &str) -> EstimatorResult<usize> {
    header
        .iter()
        .position(|h| *h == name)
        .ok_or_else(|| EstimatorError::Restart(format!("missing column '{name}'")))
}

/// Reads `dim*(dim+1)/2` packed lower-triangle values starting at `start`.
fn read_lower_triangle(row: &[f64], start: usize, dim: usize) -> DMatrix<f64> {
    let mut m = DMatrix::<f64>::zeros(dim, dim);
    let mut idx = start;
    for i in 0..dim {
        for j in 0..=i {
            m[(i, j)] = row[idx];
            idx += 1;
        }
    }
    m
}
