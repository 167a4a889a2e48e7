//! Population fan-out
//!
//! Agents share nothing but the read-only registry. Each one runs on
//! tokio's blocking pool and is reported back in index order.

use crate::agent::{
    Agent, AttributeValue, EntryKind, Person, RandomSource, GENDER, RACE, SOCIOECONOMIC_CATEGORY,
};
use crate::config::SimulationConfig;
use crate::driver::Lifecycle;
use crate::engine::EngineError;
use crate::module::Registry;
use crate::time::{start_of_year, year_of, TimeUnit, DAY};
use crate::Timestamp;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};

const RACES: [(&str, f64); 5] = [
    ("white", 0.60),
    ("hispanic", 0.18),
    ("black", 0.13),
    ("asian", 0.06),
    ("other", 0.03),
];

const SOCIOECONOMIC_CATEGORIES: [(&str, f64); 3] = [("High", 0.2), ("Middle", 0.5), ("Low", 0.3)];

/// What one finished agent looked like at the end of its run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSummary {
    pub index: usize,
    pub id: String,
    pub gender: String,
    pub birth_year: i32,
    pub death: Option<Timestamp>,
    pub entries: usize,
    pub active_conditions: Vec<String>,
    pub unfinished_modules: Vec<String>,
}

#[derive(Debug)]
pub struct AgentReport {
    pub index: usize,
    pub outcome: Result<AgentSummary, EngineError>,
}

/// Seeded demographics for agent `index`.
pub fn generate_person(config: &SimulationConfig, index: usize) -> Person {
    let seed = config.seed.wrapping_add(index as u64);
    let mut demographics = RandomSource::seeded(!seed);
    let birth = start_of_year(config.start_year)
        + i64::from(demographics.bounded_int(365)) * DAY;
    let gender = if demographics.uniform() < 0.5 { "M" } else { "F" };
    let race = pick(&mut demographics, &RACES);
    let category = pick(&mut demographics, &SOCIOECONOMIC_CATEGORIES);

    Person::new(seed, birth)
        .with_attribute(GENDER, gender)
        .with_attribute(RACE, race)
        .with_attribute(SOCIOECONOMIC_CATEGORY, category)
}

fn pick<'a>(random: &mut RandomSource, table: &[(&'a str, f64)]) -> &'a str {
    let weights: Vec<f64> = table.iter().map(|(_, w)| *w).collect();
    random
        .weighted_choice(&weights)
        .ok()
        .and_then(|i| table.get(i))
        .map_or("other", |(name, _)| *name)
}

/// Run one agent from birth for the configured number of years.
pub fn simulate_agent(
    config: &SimulationConfig,
    registry: Arc<Registry>,
    index: usize,
) -> Result<AgentSummary, EngineError> {
    let person = generate_person(config, index);
    let start = person.birth_time();
    let end = start.saturating_add(TimeUnit::Years.to_millis(f64::from(config.years)));

    let mut lifecycle = Lifecycle::new(person, registry)
        .with_max_submodule_depth(config.max_submodule_depth)
        .with_wellness_interval(i64::from(config.wellness_interval_days) * DAY);
    lifecycle.run(start, end, i64::from(config.step_days) * DAY)?;
    Ok(summarize(index, &lifecycle))
}

fn summarize(index: usize, lifecycle: &Lifecycle<Person>) -> AgentSummary {
    let agent = lifecycle.agent();
    let record = agent.record();
    AgentSummary {
        index,
        id: agent.id().to_string(),
        gender: agent
            .attribute(GENDER)
            .and_then(AttributeValue::as_text)
            .unwrap_or_default()
            .to_string(),
        birth_year: year_of(agent.birth_time()),
        death: agent.death_time(),
        entries: record.entries().len(),
        active_conditions: record
            .entries()
            .iter()
            .filter(|e| e.kind == EntryKind::Condition && e.is_active())
            .map(|e| e.codes.first().map_or_else(|| e.name.clone(), |c| c.display.clone()))
            .collect(),
        unfinished_modules: lifecycle.active_modules().to_vec(),
    }
}

/// Simulate the whole population, one blocking task per agent.
pub async fn simulate(
    config: &SimulationConfig,
    registry: Arc<Registry>,
) -> Result<Vec<AgentReport>, JoinError> {
    let shared = Arc::new(config.clone());
    let mut tasks = JoinSet::new();
    for index in 0..config.population {
        let config = Arc::clone(&shared);
        let registry = Arc::clone(&registry);
        tasks.spawn_blocking(move || AgentReport {
            index,
            outcome: simulate_agent(&config, registry, index),
        });
    }

    let mut reports = Vec::with_capacity(config.population);
    while let Some(report) = tasks.join_next().await {
        let report = report?;
        if let Err(e) = &report.outcome {
            tracing::error!(index = report.index, error = %e, "Agent failed");
        }
        reports.push(report);
    }
    reports.sort_by_key(|r| r.index);
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{code, module, registry};
    use serde_json::json;

    fn config(population: usize) -> SimulationConfig {
        SimulationConfig {
            population,
            seed: 42,
            start_year: 2000,
            years: 2,
            step_days: 7,
            wellness_interval_days: 365,
            ..SimulationConfig::default()
        }
    }

    fn flu() -> crate::module::Module {
        module(
            "flu",
            json!({
                "Initial": {"type": "Initial", "direct_transition": "Wait"},
                "Wait": {"type": "Delay", "range": {"low": 10, "high": 200, "unit": "days"}, "direct_transition": "Maybe"},
                "Maybe": {
                    "type": "Simple",
                    "distributed_transition": [
                        {"distribution": 0.5, "transition": "Flu"},
                        {"distribution": 0.5, "transition": "Terminal"}
                    ]
                },
                "Flu": {"type": "ConditionOnset", "codes": [code("flu")], "direct_transition": "Terminal"},
                "Terminal": {"type": "Terminal"}
            }),
        )
    }

    #[test]
    fn demographics_are_seeded() {
        let c = config(1);
        let a = generate_person(&c, 3);
        let b = generate_person(&c, 3);
        assert_eq!(a.id(), b.id());
        assert_eq!(a.birth_time(), b.birth_time());
        assert_eq!(a.attributes(), b.attributes());
        assert_ne!(a.id(), generate_person(&c, 4).id());
        assert_eq!(year_of(a.birth_time()), 2000);
    }

    #[tokio::test]
    async fn reports_every_agent_in_order() {
        let shared = registry([flu()]);
        let reports = simulate(&config(8), Arc::clone(&shared)).await.unwrap();
        assert_eq!(reports.len(), 8);
        for (i, report) in reports.iter().enumerate() {
            assert_eq!(report.index, i);
            let summary = report.outcome.as_ref().unwrap();
            assert!(summary.unfinished_modules.is_empty());
            assert!(summary.active_conditions.len() <= 1);
        }

        let again = simulate(&config(8), shared).await.unwrap();
        let summaries = |reports: &[AgentReport]| -> Vec<AgentSummary> {
            reports.iter().map(|r| r.outcome.clone().unwrap()).collect()
        };
        assert_eq!(summaries(&reports), summaries(&again));
    }

    #[tokio::test]
    async fn agent_errors_are_reported_per_agent() {
        let broken = module(
            "broken",
            json!({
                "Initial": {"type": "Initial", "direct_transition": "Call"},
                "Call": {"type": "CallSubmodule", "submodule": "missing/sub", "direct_transition": "Terminal"},
                "Terminal": {"type": "Terminal"}
            }),
        );
        let reports = simulate(&config(2), registry([broken])).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.outcome.is_err()));
    }
}
