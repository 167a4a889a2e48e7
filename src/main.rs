//! Lifecourse - synthetic patient population generator
//!
//! Loads every module under the configured directory, simulates the
//! configured population and writes one JSON summary per agent to stdout.

use lifecourse::config::SimulationConfig;
use lifecourse::module::Registry;
use lifecourse::population;
use std::io::Write;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lifecourse=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = SimulationConfig::from_env();
    tracing::info!(
        modules = %config.modules_dir.display(),
        population = config.population,
        seed = config.seed,
        years = config.years,
        "Starting simulation"
    );

    let registry = Arc::new(Registry::load_all(&config.modules_dir)?);
    if registry.top_level_modules().next().is_none() {
        tracing::warn!("No top-level modules found; agents will have empty records");
    }

    let reports = population::simulate(&config, registry).await?;

    let mut out = std::io::stdout().lock();
    let mut failed = 0usize;
    let mut deaths = 0usize;
    for report in &reports {
        match &report.outcome {
            Ok(summary) => {
                deaths += usize::from(summary.death.is_some());
                serde_json::to_writer(&mut out, summary)?;
                writeln!(out)?;
            }
            Err(_) => failed += 1,
        }
    }
    tracing::info!(agents = reports.len(), deaths, failed, "Simulation finished");

    if failed > 0 {
        return Err(format!("{failed} agents failed").into());
    }
    Ok(())
}
