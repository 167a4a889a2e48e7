//! Simulation settings read from the environment

use crate::engine::DEFAULT_MAX_SUBMODULE_DEPTH;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub modules_dir: PathBuf,
    pub population: usize,
    /// Agent `i` is seeded with `seed + i`.
    pub seed: u64,
    pub start_year: i32,
    pub years: u32,
    pub step_days: u32,
    pub wellness_interval_days: u32,
    pub max_submodule_depth: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            modules_dir: PathBuf::from("modules"),
            population: 100,
            seed: 0,
            start_year: 1950,
            years: 70,
            step_days: 7,
            wellness_interval_days: 365,
            max_submodule_depth: DEFAULT_MAX_SUBMODULE_DEPTH,
        }
    }
}

impl SimulationConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; unset or invalid values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            modules_dir: lookup("LIFECOURSE_MODULES_DIR").map_or(defaults.modules_dir, PathBuf::from),
            population: parse(&lookup, "LIFECOURSE_POPULATION", defaults.population),
            seed: parse(&lookup, "LIFECOURSE_SEED", defaults.seed),
            start_year: parse(&lookup, "LIFECOURSE_START_YEAR", defaults.start_year),
            years: parse(&lookup, "LIFECOURSE_YEARS", defaults.years),
            step_days: parse(&lookup, "LIFECOURSE_STEP_DAYS", defaults.step_days).max(1),
            wellness_interval_days: parse(
                &lookup,
                "LIFECOURSE_WELLNESS_INTERVAL_DAYS",
                defaults.wellness_interval_days,
            ),
            max_submodule_depth: parse(
                &lookup,
                "LIFECOURSE_MAX_SUBMODULE_DEPTH",
                defaults.max_submodule_depth,
            )
            .max(1),
        }
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    let Some(raw) = lookup(name) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, default = %default, "Ignoring invalid setting");
            default
        }
    }
}
