// sequest_sim/src/main.rs

mod cli;
mod runner;
mod scenario;
mod synth;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::Cli;
use scenario::ScenarioConfig;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = ScenarioConfig::load(&cli.scenario)?;
    if cli.verbose {
        config.filter.verbose = true;
    }

    std::fs::create_dir_all(&cli.output)?;

    // Keep the fully-resolved configuration beside the run products.
    let resolved = toml::to_string_pretty(&config)?;
    std::fs::write(
        cli.output.join(format!("{}_resolved.toml", config.name)),
        resolved,
    )?;

    tracing::info!(
        "running scenario '{}' ({} observations, smoothing {})",
        config.name,
        config.observations.count,
        if config.smooth { "on" } else { "off" }
    );

    let outcome = runner::run_scenario(&config, &cli.output)?;

    tracing::info!(
        "scenario '{}' complete: {} forward records{}",
        config.name,
        outcome.forward.records.len(),
        match &outcome.smoothed {
            Some(s) => format!(", {} smoothed records", s.len()),
            None => String::new(),
        }
    );

    Ok(())
}
