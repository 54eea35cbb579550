// sequest_core/src/smoother.rs

//! Combines an independently completed forward-time pass and backward-time
//! pass into one smoothed history.

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use crate::error::{EstimatorError, EstimatorResult};
use crate::filter::{PassHistory, UpdateRecord};
use crate::linalg::{symmetrize, thin_qr};
use crate::types::{Epoch, RunDirection, State, EPOCH_TOLERANCE};

/// A smoothed combination at a measurement epoch.
#[derive(Debug, Clone)]
pub struct SmoothedMeas {
    /// Smoothed-posterior state: forward apriori combined with backward
    /// posterior, so the measurement at this epoch is counted exactly once.
    pub state: State,
    pub cov: DMatrix<f64>,
    /// The covariance expressed in the VNB local orbit frame.
    pub cov_vnb: DMatrix<f64>,
}

/// One epoch of the smoothed history.
#[derive(Debug, Clone)]
pub struct SmoothedRecord {
    pub epoch: Epoch,
    pub is_obs: bool,
    /// Smoothed state. At measurement epochs this is the smoothed-apriori
    /// combination (forward posterior with backward apriori); at pure
    /// propagation epochs it is the single available combination.
    pub state: State,
    pub cov: DMatrix<f64>,
    /// The covariance expressed in the VNB local orbit frame.
    pub cov_vnb: DMatrix<f64>,
    /// Present at measurement epochs: the smoothed-posterior combination.
    pub meas: Option<SmoothedMeas>,
}

/// Fixed-interval smoother over two completed filter passes.
///
/// Both histories must be strictly epoch-ordered in their own run direction;
/// this is validated at construction and violations are fatal (they indicate
/// a setup defect, not a numeric condition).
#[derive(Debug)]
pub struct Smoother {
    forward: PassHistory,
    backward: PassHistory,
}

impl Smoother {
    pub fn new(forward: PassHistory, backward: PassHistory) -> EstimatorResult<Self> {
        if forward.records.is_empty() || backward.records.is_empty() {
            return Err(EstimatorError::NoObservations);
        }
        if forward.state_size() != backward.state_size() {
            return Err(EstimatorError::CovarianceDimension {
                expected: forward.state_size(),
                got: backward.state_size(),
            });
        }

        validate_sorted(&forward)?;
        validate_sorted(&backward)?;

        Ok(Self { forward, backward })
    }

    /// Produces the smoothed history, one record per forward filter step.
    /// Combinations at distinct epochs are independent of each other.
    pub fn smooth(&self) -> EstimatorResult<Vec<SmoothedRecord>> {
        let mut smoothed = Vec::with_capacity(self.forward.records.len());
        for record in &self.forward.records {
            smoothed.push(self.smooth_record(record)?);
        }
        Ok(smoothed)
    }

    fn smooth_record(&self, fwd: &UpdateRecord) -> EstimatorResult<SmoothedRecord> {
        let bwd = &self.backward.records[self.find_index(fwd)?];

        if fwd.measurement_processed {
            let fwd_meas = fwd.meas.as_ref().expect("measurement record without stats");
            let bwd_meas = bwd.meas.as_ref().expect("measurement record without stats");

            // Smoothed-apriori: forward posterior with backward apriori.
            let (cov, state) = smooth_cov_state(
                &fwd.sqrt_cov,
                &bwd_meas.apriori_sqrt_cov,
                &fwd.state,
                &bwd_meas.apriori_state,
            )?;

            // Smoothed-posterior: forward apriori with backward posterior.
            let (post_cov, post_state) = smooth_cov_state(
                &fwd_meas.apriori_sqrt_cov,
                &bwd.sqrt_cov,
                &fwd_meas.apriori_state,
                &bwd.state,
            )?;

            let cov_vnb = covariance_vnb(&cov, &state);
            let post_vnb = covariance_vnb(&post_cov, &post_state);

            Ok(SmoothedRecord {
                epoch: fwd.epoch,
                is_obs: true,
                state,
                cov,
                cov_vnb,
                meas: Some(SmoothedMeas {
                    state: post_state,
                    cov: post_cov,
                    cov_vnb: post_vnb,
                }),
            })
        } else {
            let (cov, state) =
                smooth_cov_state(&fwd.sqrt_cov, &bwd.sqrt_cov, &fwd.state, &bwd.state)?;
            let cov_vnb = covariance_vnb(&cov, &state);

            Ok(SmoothedRecord {
                epoch: fwd.epoch,
                is_obs: false,
                state,
                cov,
                cov_vnb,
                meas: None,
            })
        }
    }

    /// Locates the backward record matching `fwd` by epoch and measurement
    /// identity: binary search over the (direction-ordered) epochs, then a
    /// linear scan across the contiguous tolerance band to disambiguate
    /// records sharing an epoch. No match is a fatal data inconsistency.
    fn find_index(&self, fwd: &UpdateRecord) -> EstimatorResult<usize> {
        let records = &self.backward.records;
        let descending = self.backward.direction == RunDirection::Backward;

        let mut low = 0usize;
        let mut high = records.len();
        let mut band = None;

        while low < high {
            let mid = low + (high - low) / 2;
            let epoch = records[mid].epoch;

            if (epoch - fwd.epoch).abs() <= EPOCH_TOLERANCE {
                band = Some(mid);
                break;
            }

            let target_is_later = fwd.epoch > epoch;
            if target_is_later != descending {
                low = mid + 1;
            } else {
                high = mid;
            }
        }

        let anchor = band.ok_or(EstimatorError::SmootherNoMatch { epoch: fwd.epoch })?;

        // Expand to the full band of records within tolerance of the epoch,
        // then disambiguate on measurement identity.
        let mut start = anchor;
        while start > 0 && (records[start - 1].epoch - fwd.epoch).abs() <= EPOCH_TOLERANCE {
            start -= 1;
        }
        let mut end = anchor + 1;
        while end < records.len() && (records[end].epoch - fwd.epoch).abs() <= EPOCH_TOLERANCE {
            end += 1;
        }

        for idx in start..end {
            if fwd.same_observation(&records[idx]) {
                return Ok(idx);
            }
        }

        Err(EstimatorError::SmootherNoMatch { epoch: fwd.epoch })
    }
}

fn validate_sorted(history: &PassHistory) -> EstimatorResult<()> {
    let sign = history.direction.sign();
    for (index, pair) in history.records.windows(2).enumerate() {
        if (pair[1].epoch - pair[0].epoch) * sign < -EPOCH_TOLERANCE {
            return Err(EstimatorError::HistoryNotSorted {
                index: index + 1,
                epoch: pair[1].epoch,
            });
        }
    }
    Ok(())
}

/// Combines two square-root covariances and states into the smoothed pair.
///
/// With Ra, Rb the passes' factors and Xa, Xb their states:
/// Rd = thinQR(Ra, Rb); Sd = Rd^-1; Ua = Sd*Ra; Ub = Sd*Rb;
/// Mc = thinQR(Rb*Ub^T*Ua, Ra*Ua^T*Ub); P = Mc*Mc^T (symmetrized);
/// X = Xa + Ra*Ua^T*Sd*(Xb - Xa).
pub fn smooth_cov_state(
    ra: &DMatrix<f64>,
    rb: &DMatrix<f64>,
    xa: &DVector<f64>,
    xb: &DVector<f64>,
) -> EstimatorResult<(DMatrix<f64>, DVector<f64>)> {
    let rd = thin_qr(ra, rb);
    let sd = rd
        .try_inverse()
        .ok_or_else(|| EstimatorError::Factorization {
            context: "the combined square-root factor while smoothing".into(),
        })?;

    let ua = &sd * ra;
    let ub = &sd * rb;
    let mc = thin_qr(&(rb * ub.transpose() * &ua), &(ra * ua.transpose() * &ub));

    let mut cov = &mc * mc.transpose();
    symmetrize(&mut cov);

    let state = xa + ra * ua.transpose() * &sd * (xb - xa);
    Ok((cov, state))
}

/// Expresses the leading 6x6 (position/velocity) block of a covariance in
/// the VNB local orbit frame: V along velocity, N along the orbit normal
/// (r x v), B completing the triad. States with no usable position/velocity
/// geometry fall back to the working frame unchanged.
pub fn covariance_vnb(cov: &DMatrix<f64>, state: &State) -> DMatrix<f64> {
    let m = cov.nrows().min(6);
    let mut vnb = DMatrix::<f64>::zeros(6, 6);
    vnb.view_mut((0, 0), (m, m))
        .copy_from(&cov.view((0, 0), (m, m)));

    if state.len() < 6 {
        return vnb;
    }

    let r = Vector3::new(state[0], state[1], state[2]);
    let v = Vector3::new(state[3], state[4], state[5]);
    let normal = r.cross(&v);

    if v.norm() < f64::EPSILON || normal.norm() < f64::EPSILON {
        return vnb;
    }

    let v_hat = v / v.norm();
    let n_hat = normal / normal.norm();
    let b_hat = v_hat.cross(&n_hat);

    let rot = Matrix3::from_rows(&[v_hat.transpose(), n_hat.transpose(), b_hat.transpose()]);

    let mut rot6 = DMatrix::<f64>::zeros(6, 6);
    rot6.view_mut((0, 0), (3, 3)).copy_from(&rot);
    rot6.view_mut((3, 3), (3, 3)).copy_from(&rot);

    &rot6 * vnb * rot6.transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObsHandle;
    use approx::assert_abs_diff_eq;

    fn record(epoch: f64, handle: Option<u64>, sqrt_scale: f64, state_val: f64) -> UpdateRecord {
        let n = 2;
        let state = DVector::from_element(n, state_val);
        let sqrt_cov = DMatrix::<f64>::identity(n, n) * sqrt_scale;
        let cov = &sqrt_cov * sqrt_cov.transpose();

        let meas = handle.map(|h| crate::filter::MeasurementStat {
            handle: ObsHandle(h),
            kind: "Range".into(),
            epoch,
            observed: DVector::zeros(1),
            computed: DVector::zeros(1),
            residual: DVector::zeros(1),
            scaled_residual: vec![0.0],
            edit_flag: crate::obs::EditFlag::Normal,
            kalman_gain: None,
            apriori_state: state.clone(),
            apriori_cov: cov.clone(),
            apriori_sqrt_cov: sqrt_cov.clone(),
        });

        UpdateRecord {
            epoch,
            measurement_processed: meas.is_some(),
            state,
            cov: cov.clone(),
            sqrt_cov,
            meas,
        }
    }

    fn history(direction: RunDirection, records: Vec<UpdateRecord>) -> PassHistory {
        PassHistory { direction, records }
    }

    #[test]
    fn inflated_pass_reduces_to_the_other() {
        // Backward pass carries essentially no information; the smoothed
        // result must collapse to the forward estimate.
        let n = 3;
        let ra = DMatrix::<f64>::identity(n, n) * 0.5;
        let rb = DMatrix::<f64>::identity(n, n) * 1e6;
        let xa = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let xb = DVector::from_vec(vec![100.0, -50.0, 7.0]);

        let (cov, state) = smooth_cov_state(&ra, &rb, &xa, &xb).unwrap();

        assert_abs_diff_eq!(state, xa, epsilon = 1e-6);
        let pa = &ra * ra.transpose();
        assert_abs_diff_eq!(cov, pa, epsilon = 1e-6);
    }

    #[test]
    fn smoothing_is_symmetric_in_information() {
        // Equal-information passes average the states.
        let n = 2;
        let ra = DMatrix::<f64>::identity(n, n);
        let rb = DMatrix::<f64>::identity(n, n);
        let xa = DVector::from_vec(vec![0.0, 0.0]);
        let xb = DVector::from_vec(vec![2.0, 4.0]);

        let (cov, state) = smooth_cov_state(&ra, &rb, &xa, &xb).unwrap();
        assert_abs_diff_eq!(state[0], 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(state[1], 2.0, epsilon = 1e-10);
        // Combined covariance is half of either pass.
        assert_abs_diff_eq!(cov[(0, 0)], 0.5, epsilon = 1e-10);
    }

    #[test]
    fn find_index_rejects_identity_mismatch() {
        // Same epoch on both sides, different observation handles: the
        // epochs alone would match, the identities must not.
        let forward = history(
            RunDirection::Forward,
            vec![record(0.0, None, 1.0, 0.0), record(10.0, Some(1), 1.0, 0.0)],
        );
        let backward = history(
            RunDirection::Backward,
            vec![record(10.0, Some(2), 1.0, 0.0), record(0.0, None, 1.0, 0.0)],
        );

        let smoother = Smoother::new(forward, backward).unwrap();
        let err = smoother.smooth().unwrap_err();
        assert!(matches!(err, EstimatorError::SmootherNoMatch { .. }));
    }

    #[test]
    fn matches_identity_within_epoch_band() {
        // Two measurements share an epoch; matching must pick the record
        // with the same handle, not the first epoch hit.
        let forward = history(
            RunDirection::Forward,
            vec![
                record(0.0, None, 1.0, 1.0),
                record(10.0, Some(1), 1.0, 1.0),
                record(10.0, Some(2), 2.0, 1.0),
            ],
        );
        let backward = history(
            RunDirection::Backward,
            vec![
                record(10.0, Some(2), 2.0, 3.0),
                record(10.0, Some(1), 1.0, 3.0),
                record(0.0, None, 1.0, 3.0),
            ],
        );

        let smoother = Smoother::new(forward, backward).unwrap();
        let smoothed = smoother.smooth().unwrap();
        assert_eq!(smoothed.len(), 3);
        assert!(smoothed[1].is_obs);
        assert!(smoothed[1].meas.is_some());
    }

    #[test]
    fn unsorted_history_is_rejected() {
        let forward = history(
            RunDirection::Forward,
            vec![record(10.0, None, 1.0, 0.0), record(0.0, None, 1.0, 0.0)],
        );
        let backward = history(RunDirection::Backward, vec![record(0.0, None, 1.0, 0.0)]);

        let err = Smoother::new(forward, backward).unwrap_err();
        assert!(matches!(err, EstimatorError::HistoryNotSorted { .. }));
    }

    #[test]
    fn vnb_preserves_trace_of_position_block() {
        let state = DVector::from_vec(vec![7000.0, 0.0, 0.0, 0.0, 7.5, 0.0]);
        let mut cov = DMatrix::<f64>::zeros(6, 6);
        for i in 0..6 {
            cov[(i, i)] = (i + 1) as f64;
        }

        let vnb = covariance_vnb(&cov, &state);
        let trace_in: f64 = (0..3).map(|i| cov[(i, i)]).sum();
        let trace_out: f64 = (0..3).map(|i| vnb[(i, i)]).sum();
        assert_abs_diff_eq!(trace_in, trace_out, epsilon = 1e-9);
    }
}
