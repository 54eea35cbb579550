// sequest_core/src/filter/mod.rs

//! The sequential filter driver: a small state machine that alternates time
//! updates and measurement updates while walking the observation table, in
//! either time direction.

mod measurement_update;
pub mod records;
mod time_update;

use nalgebra::{DMatrix, Vector3};

use crate::abstractions::{MeasurementProvider, Propagator};
use crate::config::FilterConfig;
use crate::diag::{WarningKind, WarningLog};
use crate::error::{EstimatorError, EstimatorResult};
use crate::linalg::{cholesky_factor, symmetrize};
use crate::noise::SncProcessNoise;
use crate::types::{Epoch, RunDirection, State, EPOCH_TOLERANCE};

pub use records::{MeasurementStat, PassHistory, UpdateRecord};

/// Process noise is skipped for steps shorter than this (seconds); such
/// tiny intervals cost positive-definiteness without adding information.
const NOISE_TIME_TOLERANCE: f64 = 1e-6;

/// The driver's finite states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    /// Validating dimensions and establishing the square-root factor.
    Initializing,
    /// Stepping toward the next observation or noise-update epoch.
    Propagating,
    /// Processing a measurement at an observation epoch.
    Calculating,
    /// End of data: finish, or re-initialize for a queued second pass.
    CheckingRun,
    Finished,
}

/// Initial covariance, either in full or already-factorized form.
#[derive(Debug, Clone)]
pub enum CovarianceInit {
    /// Full covariance; factorized during initialization.
    Full(DMatrix<f64>),
    /// Square-root factor `S` with `S * S^T = P` (e.g. from a warm start).
    SquareRoot(DMatrix<f64>),
}

/// Initial conditions for one filter pass.
#[derive(Debug, Clone)]
pub struct PassInit {
    pub epoch: Epoch,
    pub state: State,
    pub covariance: CovarianceInit,
    pub direction: RunDirection,
    /// Epoch to keep predicting to after the observation table is
    /// exhausted. A final covariance-only record is committed there, which
    /// lets a backward pass cover the forward pass's anchor epoch for
    /// smoothing. `None` ends the pass at the last observation.
    pub predict_to: Option<Epoch>,
}

/// The extended Kalman filter driver.
///
/// Owns the solve-for state and square-root covariance for the duration of a
/// run. One `step` call executes one state-machine transition; a step either
/// commits a complete update record or leaves the last committed state
/// untouched, so a run can be cancelled between steps.
#[derive(Debug)]
pub struct KalmanFilter {
    config: FilterConfig,
    machine: FilterState,
    direction: RunDirection,

    state_size: usize,
    epoch: Epoch,
    state: State,
    sqrt_cov: DMatrix<f64>,
    covariance: DMatrix<f64>,

    /// Accumulated correction since the pass epoch; `Some` only while
    /// delayed rectification is active.
    offset: Option<State>,
    /// Epoch the current pass (and offset accumulation) started at.
    estimation_epoch: Epoch,

    noise_model: SncProcessNoise,
    next_noise_epoch: Epoch,
    predict_to: Option<Epoch>,

    /// Conversion derivative [dX/dS] at the previous step, for the STM and
    /// noise basis change in the time update.
    cart_to_solve_prev: DMatrix<f64>,

    warnings: WarningLog,
    records: Vec<UpdateRecord>,
    completed: Vec<PassHistory>,
    queued_pass: Option<PassInit>,

    pending_init: Option<CovarianceInit>,
}

impl KalmanFilter {
    /// Creates a filter ready to run its first pass. Fails fast on invalid
    /// configuration; dimension checks happen at initialization, before any
    /// step executes.
    pub fn new(config: FilterConfig, init: PassInit) -> EstimatorResult<Self> {
        config.validate()?;

        let noise_model = SncProcessNoise::new(Vector3::from(config.accel_noise_sigma))?;
        let state_size = init.state.len();

        Ok(Self {
            config,
            machine: FilterState::Initializing,
            direction: init.direction,
            state_size,
            epoch: init.epoch,
            state: init.state,
            sqrt_cov: DMatrix::zeros(state_size, state_size),
            covariance: DMatrix::zeros(state_size, state_size),
            offset: None,
            estimation_epoch: init.epoch,
            noise_model,
            next_noise_epoch: init.epoch,
            predict_to: init.predict_to,
            cart_to_solve_prev: DMatrix::identity(state_size, state_size),
            warnings: WarningLog::default(),
            records: Vec::new(),
            completed: Vec::new(),
            queued_pass: None,
            pending_init: Some(init.covariance),
        })
    }

    /// Replaces the default inertial-frame process noise model, e.g. to
    /// rotate the noise into a different working frame.
    pub fn set_noise_model(&mut self, model: SncProcessNoise) {
        self.noise_model = model;
    }

    /// Queues a second pass (typically backward, for smoothing). Consumed
    /// when the current pass reaches the end of its data.
    pub fn queue_pass(&mut self, init: PassInit) {
        self.queued_pass = Some(init);
    }

    // --- Accessors ---

    pub fn machine_state(&self) -> FilterState {
        self.machine
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Current solve-for state. While delayed rectification is active this
    /// includes the accumulated offset, matching what reports see.
    pub fn state(&self) -> State {
        match &self.offset {
            Some(offset) => &self.state + offset,
            None => self.state.clone(),
        }
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    pub fn sqrt_covariance(&self) -> &DMatrix<f64> {
        &self.sqrt_cov
    }

    pub fn records(&self) -> &[UpdateRecord] {
        &self.records
    }

    pub fn warnings(&self) -> &WarningLog {
        &self.warnings
    }

    /// Completed pass histories, oldest first.
    pub fn histories(&self) -> &[PassHistory] {
        &self.completed
    }

    pub fn into_histories(self) -> Vec<PassHistory> {
        self.completed
    }

    // --- State machine ---

    /// Executes one state-machine transition and returns the new state.
    pub fn step(
        &mut self,
        propagator: &mut dyn Propagator,
        measurements: &mut dyn MeasurementProvider,
    ) -> EstimatorResult<FilterState> {
        match self.machine {
            FilterState::Initializing => self.complete_initialization(propagator, measurements)?,
            FilterState::Propagating => self.propagate_step(propagator, measurements)?,
            FilterState::Calculating => self.measurement_step(propagator, measurements)?,
            FilterState::CheckingRun => self.check_completion(),
            FilterState::Finished => {}
        }
        Ok(self.machine)
    }

    /// Runs the state machine until the current pass completes and returns
    /// its history. The filter is left ready for a queued next pass, or
    /// `Finished` if none was queued.
    pub fn run_pass(
        &mut self,
        propagator: &mut dyn Propagator,
        measurements: &mut dyn MeasurementProvider,
    ) -> EstimatorResult<&PassHistory> {
        if self.machine == FilterState::Finished {
            return Err(EstimatorError::Config(
                "the filter run is already finished".into(),
            ));
        }

        let done = self.completed.len();
        while self.completed.len() == done {
            self.step(propagator, measurements)?;
        }
        Ok(&self.completed[done])
    }

    /// Validates dimensions, establishes the square-root factor, loads the
    /// first observation and commits the initial record.
    fn complete_initialization(
        &mut self,
        propagator: &mut dyn Propagator,
        measurements: &mut dyn MeasurementProvider,
    ) -> EstimatorResult<()> {
        let covariance = self
            .pending_init
            .take()
            .expect("initialization entered twice without a queued pass");

        let (sqrt_cov, full) = match covariance {
            CovarianceInit::Full(p) => {
                if p.nrows() != self.state_size || p.ncols() != self.state_size {
                    return Err(EstimatorError::CovarianceDimension {
                        expected: self.state_size,
                        got: p.nrows(),
                    });
                }
                let s = cholesky_factor(&p, "the initial covariance matrix")?;
                (s, p)
            }
            CovarianceInit::SquareRoot(s) => {
                if s.nrows() != self.state_size || s.ncols() != self.state_size {
                    return Err(EstimatorError::CovarianceDimension {
                        expected: self.state_size,
                        got: s.nrows(),
                    });
                }
                let mut p = &s * s.transpose();
                symmetrize(&mut p);
                (s, p)
            }
        };

        if propagator.state_dim() != self.state_size {
            return Err(EstimatorError::CovarianceDimension {
                expected: self.state_size,
                got: propagator.state_dim(),
            });
        }

        if measurements.current().is_none() {
            return Err(EstimatorError::NoObservations);
        }
        if measurements.is_forward() != self.direction.is_forward() {
            return Err(EstimatorError::Config(format!(
                "the measurement provider walks {} but the pass runs {:?}",
                if measurements.is_forward() {
                    "forward"
                } else {
                    "backward"
                },
                self.direction
            )));
        }

        self.sqrt_cov = sqrt_cov;
        self.covariance = full;
        self.estimation_epoch = self.epoch;
        self.next_noise_epoch =
            self.epoch + self.direction.sign() * self.config.process_noise_step;
        self.cart_to_solve_prev = propagator.cart_to_solve_jacobian();

        // Delayed rectification starts with an empty offset and stays off
        // entirely when the span is zero.
        self.offset = (self.config.delay_rectify_span > 0.0)
            .then(|| State::zeros(self.state_size));

        self.records.push(UpdateRecord {
            epoch: self.epoch,
            measurement_processed: false,
            state: self.state(),
            cov: self.covariance.clone(),
            sqrt_cov: self.sqrt_cov.clone(),
            meas: None,
        });

        self.progress(format_args!(
            "filter pass initialized at epoch {:.6} ({} states)",
            self.epoch, self.state_size
        ));

        self.machine = FilterState::Propagating;
        Ok(())
    }

    /// One propagation transition: either we are already at the observation
    /// epoch (switch to Calculating), out of data (predict to the anchor
    /// epoch or go to CheckingRun), or we step toward the nearer of the
    /// next target and noise-update epochs.
    fn propagate_step(
        &mut self,
        propagator: &mut dyn Propagator,
        measurements: &mut dyn MeasurementProvider,
    ) -> EstimatorResult<()> {
        let (target_epoch, predicting) = match measurements.current() {
            Some(obs) => (obs.epoch, false),
            None => match self.predict_to {
                Some(anchor) if (anchor - self.epoch).abs() > EPOCH_TOLERANCE => (anchor, true),
                _ => {
                    self.machine = FilterState::CheckingRun;
                    return Ok(());
                }
            },
        };

        if !predicting && (target_epoch - self.epoch).abs() <= EPOCH_TOLERANCE {
            self.machine = FilterState::Calculating;
            return Ok(());
        }

        let mut dt = target_epoch - self.epoch;
        let mut noise_cadence_step = false;

        if self.config.process_noise_step > 0.0 {
            let dt_noise = self.next_noise_epoch - self.epoch;
            if dt_noise.abs() < dt.abs() && dt_noise.abs() > EPOCH_TOLERANCE {
                dt = dt_noise;
                noise_cadence_step = true;
            }
        }

        let stepped = propagator.step(dt);
        self.time_update(&stepped, dt, propagator)?;
        self.state = stepped.state;
        self.epoch += dt;

        let reached_anchor = predicting && (target_epoch - self.epoch).abs() <= EPOCH_TOLERANCE;

        if noise_cadence_step || reached_anchor {
            // Pure-propagation step at the reporting cadence or the anchor
            // epoch: commit a covariance-only record.
            self.records.push(UpdateRecord {
                epoch: self.epoch,
                measurement_processed: false,
                state: self.state(),
                cov: self.covariance.clone(),
                sqrt_cov: self.sqrt_cov.clone(),
                meas: None,
            });
            self.progress(format_args!(
                "propagated to {} epoch {:.6}",
                if reached_anchor { "anchor" } else { "noise-update" },
                self.epoch
            ));
        }

        if noise_cadence_step {
            self.next_noise_epoch += self.direction.sign() * self.config.process_noise_step;
        }

        Ok(())
    }

    /// One measurement transition: run the measurement update, feed the
    /// corrected state back to the propagator, commit the record, then
    /// advance the observation cursor.
    fn measurement_step(
        &mut self,
        propagator: &mut dyn Propagator,
        measurements: &mut dyn MeasurementProvider,
    ) -> EstimatorResult<()> {
        let record = self.measurement_update(measurements)?;

        self.progress(format_args!(
            "processed measurement at epoch {:.6} (edit flag {:?})",
            record.epoch,
            record.meas.as_ref().map(|m| m.edit_flag)
        ));

        // While delayed rectification is active the correction lives in the
        // offset and the reference trajectory is left alone.
        if self.offset.is_none() {
            propagator.set_state(&self.state);
        }

        self.records.push(record);
        self.advance_epoch(propagator, measurements);
        Ok(())
    }

    /// Moves the observation cursor and performs the bookkeeping that
    /// follows a processed measurement: delayed-rectification check and the
    /// sign-aware reset of the next noise-update epoch.
    fn advance_epoch(
        &mut self,
        propagator: &mut dyn Propagator,
        measurements: &mut dyn MeasurementProvider,
    ) {
        if !measurements.advance() {
            // Out of data; Propagating finishes any requested prediction
            // span before the run check.
            self.machine = FilterState::Propagating;
            return;
        }

        let next_epoch = measurements
            .current()
            .map(|obs| obs.epoch)
            .unwrap_or(self.epoch);

        // End delayed rectification once the next observation falls outside
        // the configured span: fold the offset into the primary state and
        // turn the offset off for the rest of the run.
        if let Some(offset) = self.offset.take() {
            let elapsed = next_epoch - self.estimation_epoch;
            if elapsed.abs() > self.config.delay_rectify_span {
                self.state += &offset;
                propagator.set_state(&self.state);
                self.warnings.warn(WarningKind::RectificationEnded, || {
                    format!(
                        "exiting the delayed rectification span at epoch {:.6}",
                        self.epoch
                    )
                });
            } else {
                self.offset = Some(offset);
            }
        }

        // If the filter has passed the noise epoch, push it one cadence
        // step further in the run direction.
        if self.config.process_noise_step > 0.0 {
            let dt_noise = self.next_noise_epoch - self.epoch;
            match self.direction {
                RunDirection::Forward if dt_noise < EPOCH_TOLERANCE => {
                    self.next_noise_epoch += self.config.process_noise_step;
                }
                RunDirection::Backward if dt_noise > -EPOCH_TOLERANCE => {
                    self.next_noise_epoch -= self.config.process_noise_step;
                }
                _ => {}
            }
        }

        self.machine = FilterState::Propagating;
    }

    /// End of data: archive the pass, then either re-initialize for a
    /// queued second pass or finish.
    fn check_completion(&mut self) {
        let records = std::mem::take(&mut self.records);
        self.completed.push(PassHistory {
            direction: self.direction,
            records,
        });

        match self.queued_pass.take() {
            Some(init) => {
                self.progress(format_args!(
                    "pass complete; re-initializing a {:?} pass at epoch {:.6}",
                    init.direction, init.epoch
                ));

                self.state_size = init.state.len();
                self.epoch = init.epoch;
                self.state = init.state;
                self.direction = init.direction;
                self.offset = None;
                self.predict_to = init.predict_to;
                self.pending_init = Some(init.covariance);
                self.machine = FilterState::Initializing;
            }
            None => {
                self.progress(format_args!("filter run finished at epoch {:.6}", self.epoch));
                self.machine = FilterState::Finished;
            }
        }
    }

    /// Per-step progress line; info level in verbose mode, debug otherwise.
    /// Has no effect on numeric results.
    fn progress(&self, args: std::fmt::Arguments<'_>) {
        if self.config.verbose {
            tracing::info!("{}", args);
        } else {
            tracing::debug!("{}", args);
        }
    }
}
