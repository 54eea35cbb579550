// sequest_sim/src/runner.rs

//! Drives the estimation pipeline for one scenario: forward pass, optional
//! backward pass and smoothing, restart file, summary.

use std::path::Path;

use nalgebra::DMatrix;

use sequest_core::prelude::*;

use crate::scenario::ScenarioConfig;
use crate::synth::{LinearPropagator, RangeTable, Truth};

/// Inflation applied to the forward pass's final square-root covariance when
/// seeding the backward pass, so the two passes stay nearly independent.
const BACKWARD_COV_INFLATION: f64 = 1e3;

/// The pipeline products handed back to the caller.
pub struct RunOutcome {
    pub forward: PassHistory,
    pub backward: Option<PassHistory>,
    pub smoothed: Option<Vec<SmoothedRecord>>,
}

pub fn run_scenario(
    config: &ScenarioConfig,
    output_dir: &Path,
) -> Result<RunOutcome, EstimatorError> {
    if config.smooth && config.filter.process_noise_step > 0.0 {
        // Forward and backward noise-cadence epochs are counted from each
        // pass's own start, so their pure-propagation records would not
        // pair up for smoothing.
        return Err(EstimatorError::Config(
            "smoothing with a nonzero process noise step is not supported by the \
             scenario runner; set process_noise_step = 0 or smooth = false"
                .into(),
        ));
    }

    let truth = Truth::new(&config.trajectory);
    let table = RangeTable::generate(&truth, &config.observations, config.seed);
    let last_obs_epoch = table.last_epoch().expect("scenario has observations");

    // Initial estimate: the truth plus the configured bias.
    let mut initial_state = truth.state_at(0.0);
    for i in 0..3 {
        initial_state[i] += config.estimate.position_bias[i];
        initial_state[i + 3] += config.estimate.velocity_bias[i];
    }

    let mut initial_cov = DMatrix::<f64>::zeros(6, 6);
    for i in 0..3 {
        initial_cov[(i, i)] = config.estimate.position_variance;
        initial_cov[(i + 3, i + 3)] = config.estimate.velocity_variance;
    }

    // --- Forward pass ---

    let mut filter = KalmanFilter::new(
        config.filter.clone(),
        PassInit {
            epoch: 0.0,
            state: initial_state.clone(),
            covariance: CovarianceInit::Full(initial_cov),
            direction: RunDirection::Forward,
            predict_to: None,
        },
    )?;

    let mut propagator = LinearPropagator::new(initial_state);
    let mut forward_table = table;
    let forward = filter
        .run_pass(&mut propagator, &mut forward_table)?
        .clone();

    let final_record = forward.records.last().expect("forward pass has records");
    log_state_errors("forward pass final", &truth, final_record.epoch, &final_record.state);

    let restart_path = output_dir.join(format!("{}_restart.csv", config.name));
    write_restart_file(&restart_path, &forward)?;
    tracing::info!("wrote restart file {}", restart_path.display());

    if !config.smooth {
        return Ok(RunOutcome {
            forward,
            backward: None,
            smoothed: None,
        });
    }

    // --- Backward pass, seeded from the forward result ---

    let backward_init = PassInit {
        epoch: final_record.epoch,
        state: final_record.state.clone(),
        covariance: CovarianceInit::SquareRoot(
            &final_record.sqrt_cov * BACKWARD_COV_INFLATION,
        ),
        direction: RunDirection::Backward,
        // Cover the forward anchor so every forward record can be paired.
        predict_to: Some(forward.records[0].epoch),
    };

    let mut backward_filter = KalmanFilter::new(config.filter.clone(), backward_init)?;
    let mut backward_prop = LinearPropagator::new(final_record.state.clone());
    let mut backward_table = forward_table.reversed();

    // The backward table starts at the last observation; the pass starts
    // at the same epoch, so the first transition is a measurement update.
    debug_assert!((last_obs_epoch - final_record.epoch).abs() < 1e-6);

    let backward = backward_filter
        .run_pass(&mut backward_prop, &mut backward_table)?
        .clone();

    // --- Smoothing ---

    let smoother = Smoother::new(forward.clone(), backward.clone())?;
    let smoothed = smoother.smooth()?;

    if let Some(first) = smoothed.first() {
        log_state_errors("smoothed initial", &truth, first.epoch, &first.state);
    }

    Ok(RunOutcome {
        forward,
        backward: Some(backward),
        smoothed: Some(smoothed),
    })
}

fn log_state_errors(label: &str, truth: &Truth, epoch: Epoch, state: &State) {
    let truth_state = truth.state_at(epoch);
    let pos_err = ((0..3)
        .map(|i| (state[i] - truth_state[i]).powi(2))
        .sum::<f64>())
    .sqrt();
    let vel_err = ((3..6)
        .map(|i| (state[i] - truth_state[i]).powi(2))
        .sum::<f64>())
    .sqrt();

    tracing::info!(
        "{label} at epoch {epoch:.1}: position error {pos_err:.3e} km, \
         velocity error {vel_err:.3e} km/s"
    );
}
