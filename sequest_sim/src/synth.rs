// sequest_sim/src/synth.rs

//! The synthetic world: a constant-velocity truth trajectory, an exact
//! propagator over the estimated trajectory, and seeded range observations.

use nalgebra::{DMatrix, DVector, Vector3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use sequest_core::prelude::*;

use crate::scenario::{ObservationConfig, TrajectoryConfig};

/// The true constant-velocity trajectory.
#[derive(Debug, Clone)]
pub struct Truth {
    position: Vector3<f64>,
    velocity: Vector3<f64>,
}

impl Truth {
    pub fn new(config: &TrajectoryConfig) -> Self {
        Self {
            position: Vector3::from(config.position),
            velocity: Vector3::from(config.velocity),
        }
    }

    pub fn state_at(&self, epoch: Epoch) -> State {
        let r = self.position + self.velocity * epoch;
        DVector::from_vec(vec![
            r[0],
            r[1],
            r[2],
            self.velocity[0],
            self.velocity[1],
            self.velocity[2],
        ])
    }

    pub fn position_at(&self, epoch: Epoch) -> Vector3<f64> {
        self.position + self.velocity * epoch
    }
}

// --- Propagator over the estimated trajectory ---

/// Constant-velocity dynamics are linear, so the STM is exact and no
/// numerical integration is involved.
#[derive(Debug)]
pub struct LinearPropagator {
    state: State,
}

impl LinearPropagator {
    pub fn new(state: State) -> Self {
        Self { state }
    }
}

impl Propagator for LinearPropagator {
    fn step(&mut self, dt: f64) -> PropagatedStep {
        let mut stm = DMatrix::<f64>::identity(6, 6);
        for i in 0..3 {
            stm[(i, i + 3)] = dt;
        }
        self.state = &stm * &self.state;
        PropagatedStep {
            state: self.state.clone(),
            stm,
        }
    }

    fn set_state(&mut self, state: &State) {
        self.state = state.clone();
    }

    fn state_dim(&self) -> usize {
        6
    }
}

// --- Synthetic range observations ---

/// A pre-generated table of range observations, walked in either direction.
#[derive(Debug)]
pub struct RangeTable {
    entries: Vec<(Observation, Vector3<f64>)>,
    cursor: usize,
    forward: bool,
}

impl RangeTable {
    /// Synthesizes `config.count` range observations cycling through the
    /// ground stations, with seeded Gaussian noise.
    pub fn generate(truth: &Truth, config: &ObservationConfig, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let entries = (1..=config.count)
            .map(|k| {
                let epoch = config.cadence * k as f64;
                let station = Vector3::from(config.stations[k % config.stations.len()]);
                let noise: f64 = rng.sample(StandardNormal);
                let range = (truth.position_at(epoch) - station).norm()
                    + config.noise_sigma * noise;

                // The filter needs a nonsingular R; floor the variance for
                // noiseless scenarios.
                let variance = (config.noise_sigma * config.noise_sigma).max(1e-12);

                let obs = Observation {
                    handle: ObsHandle(k as u64),
                    epoch,
                    kind: "Range".into(),
                    value: DVector::from_element(1, range),
                    noise_covariance: DMatrix::from_element(1, 1, variance),
                    media_correction: None,
                    edit_flag: EditFlag::Normal,
                };
                (obs, station)
            })
            .collect();

        Self {
            entries,
            cursor: 0,
            forward: true,
        }
    }

    /// The same table, walked from the last observation to the first.
    pub fn reversed(&self) -> Self {
        let mut entries = self.entries.clone();
        entries.reverse();
        Self {
            entries,
            cursor: 0,
            forward: false,
        }
    }

    pub fn first_epoch(&self) -> Option<Epoch> {
        self.entries.first().map(|(obs, _)| obs.epoch)
    }

    pub fn last_epoch(&self) -> Option<Epoch> {
        self.entries.last().map(|(obs, _)| obs.epoch)
    }
}

impl MeasurementProvider for RangeTable {
    fn current(&self) -> Option<&Observation> {
        self.entries.get(self.cursor).map(|(obs, _)| obs)
    }

    fn advance(&mut self) -> bool {
        self.cursor += 1;
        self.cursor < self.entries.len()
    }

    fn is_forward(&self) -> bool {
        self.forward
    }

    fn compute(&mut self, state: &State, _epoch: Epoch) -> ComputedMeasurement {
        let station = self.entries[self.cursor].1;
        let rel = Vector3::new(
            state[0] - station[0],
            state[1] - station[1],
            state[2] - station[2],
        );
        let range = rel.norm();

        let mut partials = DMatrix::<f64>::zeros(1, 6);
        for i in 0..3 {
            partials[(0, i)] = rel[i] / range;
        }

        ComputedMeasurement {
            value: DVector::from_element(1, range),
            partials,
            is_calculated: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn noiseless_ranges_match_the_geometry() {
        let truth = Truth::new(&TrajectoryConfig::default());
        let mut config = ObservationConfig::default();
        config.noise_sigma = 0.0;
        config.count = 3;

        let table = RangeTable::generate(&truth, &config, 42);
        for (obs, station) in &table.entries {
            let expected = (truth.position_at(obs.epoch) - station).norm();
            assert_abs_diff_eq!(obs.value[0], expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn same_seed_reproduces_the_table() {
        let truth = Truth::new(&TrajectoryConfig::default());
        let config = ObservationConfig::default();

        let a = RangeTable::generate(&truth, &config, 7);
        let b = RangeTable::generate(&truth, &config, 7);
        for (ea, eb) in a.entries.iter().zip(&b.entries) {
            assert_eq!(ea.0.value[0], eb.0.value[0]);
        }

        let c = RangeTable::generate(&truth, &config, 8);
        assert_ne!(a.entries[0].0.value[0], c.entries[0].0.value[0]);
    }

    #[test]
    fn range_partials_point_along_the_line_of_sight() {
        let truth = Truth::new(&TrajectoryConfig::default());
        let mut config = ObservationConfig::default();
        config.noise_sigma = 0.0;
        let mut table = RangeTable::generate(&truth, &config, 0);

        let state = truth.state_at(table.first_epoch().unwrap());
        let computed = table.compute(&state, 0.0);

        let h = &computed.partials;
        let norm: f64 = (0..3).map(|i| h[(0, i)] * h[(0, i)]).sum::<f64>().sqrt();
        assert_abs_diff_eq!(norm, 1.0, epsilon = 1e-12);
        // velocity partials of an instantaneous range are zero
        assert_eq!(h[(0, 3)], 0.0);
        assert_eq!(h[(0, 5)], 0.0);
    }
}
