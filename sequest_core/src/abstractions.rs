// sequest_core/src/abstractions.rs

use nalgebra::DMatrix;
use std::fmt::Debug;

use crate::obs::{ComputedMeasurement, Observation};
use crate::types::{Epoch, State};

// --- PROPAGATOR TRAIT ---
// The orbit/attitude propagator that carries the trajectory between epochs.
// The estimator never integrates dynamics itself; it only consumes the
// propagated state and the state-transition matrix over each step.
pub trait Propagator: Debug {
    /// Advances the internal trajectory by `dt` seconds (negative for
    /// backward-time runs) and returns the new state together with the STM
    /// over the interval.
    fn step(&mut self, dt: f64) -> PropagatedStep;

    /// Resets the reference trajectory to a corrected state. Called after a
    /// committed measurement update and when a linearization offset is
    /// rectified into the state; subsequent steps continue from here.
    fn set_state(&mut self, state: &State);

    /// Conversion derivative matrix [dX/dS] from Cartesian to the solve-for
    /// basis at the current epoch. Identity when solving in Cartesian.
    fn cart_to_solve_jacobian(&self) -> DMatrix<f64> {
        DMatrix::identity(self.state_dim(), self.state_dim())
    }

    /// Number of solve-for states carried by this propagator.
    fn state_dim(&self) -> usize;
}

/// The result of one propagation step.
#[derive(Debug, Clone)]
pub struct PropagatedStep {
    /// State at the end of the interval.
    pub state: State,
    /// State-transition matrix mapping deviations across the interval.
    pub stm: DMatrix<f64>,
}

// --- MEASUREMENT PROVIDER TRAIT ---
// A cursor over the observation table plus the measurement models needed to
// compute residual inputs. The estimator never computes residuals itself.
pub trait MeasurementProvider: Debug {
    /// The observation the cursor currently points at, or `None` once the
    /// table is exhausted.
    fn current(&self) -> Option<&Observation>;

    /// Moves the cursor to the next feasible observation. Returns `false`
    /// when the end of the table is reached.
    fn advance(&mut self) -> bool;

    /// Whether this provider walks the table forward in time.
    fn is_forward(&self) -> bool;

    /// Evaluates the measurement model for the current observation at the
    /// supplied linearization point: computed value and H partials.
    fn compute(&mut self, state: &State, epoch: Epoch) -> ComputedMeasurement;
}
