// sequest_sim/src/cli.rs

use clap::Parser;
use std::path::PathBuf;

/// Sequest: sequential orbit estimation on synthetic tracking scenarios.
///
/// Runs a forward (and optionally backward) extended Kalman filter pass over
/// synthetic range observations, smooths the passes, and writes the
/// warm-start file.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The path to the scenario TOML file to run.
    #[arg(short, long, default_value = "scenarios/leo_ranging.toml")]
    pub scenario: PathBuf,

    /// Directory the restart file and summaries are written to.
    #[arg(short, long, default_value = "output")]
    pub output: PathBuf,

    /// Per-step filter progress at info level.
    #[arg(long, default_value_t = false)]
    pub verbose: bool,
}
