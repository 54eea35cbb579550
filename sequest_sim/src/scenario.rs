// sequest_sim/src/scenario.rs

//! Scenario configuration: loading, defaults, and validation.

use std::path::Path;

use figment::{
    providers::{Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use sequest_core::prelude::FilterConfig;

/// Truth trajectory: a constant-velocity target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrajectoryConfig {
    /// Initial position, km.
    pub position: [f64; 3],
    /// Constant velocity, km/s.
    pub velocity: [f64; 3],
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            position: [7000.0, 100.0, 50.0],
            velocity: [1.0, 2.0, 0.5],
        }
    }
}

/// Observation synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservationConfig {
    /// Number of range observations to synthesize.
    pub count: usize,
    /// Seconds between observations.
    pub cadence: f64,
    /// 1-sigma range noise, km. Zero produces noiseless observations.
    pub noise_sigma: f64,
    /// Ground station positions, km.
    pub stations: Vec<[f64; 3]>,
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            count: 20,
            cadence: 60.0,
            noise_sigma: 1e-4,
            stations: vec![
                [0.0, 0.0, 0.0],
                [5000.0, 3000.0, 1000.0],
                [2000.0, -4000.0, 6000.0],
            ],
        }
    }
}

/// Initial estimate handed to the filter (the truth plus a deliberate bias).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimateConfig {
    /// Bias added to the true initial position, km.
    pub position_bias: [f64; 3],
    /// Bias added to the true initial velocity, km/s.
    pub velocity_bias: [f64; 3],
    /// Initial position variance, km^2.
    pub position_variance: f64,
    /// Initial velocity variance, (km/s)^2.
    pub velocity_variance: f64,
}

impl Default for EstimateConfig {
    fn default() -> Self {
        Self {
            position_bias: [1e-2, -5e-3, 2e-3],
            velocity_bias: [1e-5, -1e-5, 5e-6],
            position_variance: 1.0,
            velocity_variance: 1e-6,
        }
    }
}

/// The complete scenario file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Scenario name, used for output file naming.
    pub name: String,
    /// RNG seed for the measurement noise.
    pub seed: u64,
    /// Run a backward pass and smooth the two histories.
    pub smooth: bool,
    pub trajectory: TrajectoryConfig,
    pub observations: ObservationConfig,
    pub estimate: EstimateConfig,
    pub filter: FilterConfig,
}

impl ScenarioConfig {
    /// Loads and validates a scenario TOML file.
    pub fn load(path: &Path) -> Result<Self, String> {
        let mut config: ScenarioConfig = Figment::new()
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| format!("failed to load scenario file {}: {e}", path.display()))?;

        if config.name.is_empty() {
            config.name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "scenario".into());
        }

        if config.observations.count == 0 {
            return Err("the scenario must request at least one observation".into());
        }
        if config.observations.cadence <= 0.0 {
            return Err("the observation cadence must be positive".into());
        }
        if config.observations.stations.is_empty() {
            return Err("the scenario must define at least one ground station".into());
        }
        if config.observations.noise_sigma < 0.0 {
            return Err("the range noise sigma must be non-negative".into());
        }

        config
            .filter
            .validate()
            .map_err(|e| format!("invalid filter configuration: {e}"))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_a_valid_scenario() {
        let config = ScenarioConfig::default();
        assert!(config.filter.validate().is_ok());
        assert_eq!(config.observations.stations.len(), 3);
    }

    #[test]
    fn load_rejects_zero_observations() {
        let dir = std::env::temp_dir();
        let path = dir.join("sequest_bad_scenario.toml");
        std::fs::write(&path, "[observations]\ncount = 0\n").unwrap();
        assert!(ScenarioConfig::load(&path).is_err());
    }

    #[test]
    fn load_applies_overrides_over_defaults() {
        let dir = std::env::temp_dir();
        let path = dir.join("sequest_override_scenario.toml");
        std::fs::write(
            &path,
            "seed = 7\nsmooth = true\n\n[observations]\ncount = 5\ncadence = 30.0\n",
        )
        .unwrap();

        let config = ScenarioConfig::load(&path).unwrap();
        assert_eq!(config.seed, 7);
        assert!(config.smooth);
        assert_eq!(config.observations.count, 5);
        assert_eq!(config.observations.cadence, 30.0);
        // untouched sections keep their defaults
        assert_eq!(config.trajectory.position, [7000.0, 100.0, 50.0]);
    }
}
