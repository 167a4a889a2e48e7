//! Property-based tests for the step loop
//!
//! These check history invariants and seeded determinism over arbitrary
//! delay chains and step schedules.

use super::testing::{code, days, module, person, registry};
use super::*;
use crate::agent::{Agent, Person};
use crate::module::Module;
use proptest::prelude::*;
use serde_json::{json, Map, Value};

// ============================================================================
// Test Helpers
// ============================================================================

/// `Initial -> D0 -> D1 -> ... -> Terminal`, each Dn waiting `delays[n]` days.
fn delay_chain(delays: &[u32]) -> Module {
    let mut states = Map::new();
    let name = |i: usize| format!("D{i}");
    states.insert(
        "Initial".into(),
        json!({"type": "Initial", "direct_transition": name(0)}),
    );
    for (i, delay) in delays.iter().enumerate() {
        let next = if i + 1 == delays.len() {
            "Terminal".to_string()
        } else {
            name(i + 1)
        };
        states.insert(
            name(i),
            json!({
                "type": "Delay",
                "exact": {"quantity": delay, "unit": "days"},
                "direct_transition": next
            }),
        );
    }
    states.insert("Terminal".into(), json!({"type": "Terminal"}));
    module("chain", Value::Object(states))
}

/// A looping module that draws randomness at every turn.
fn noisy() -> Module {
    module(
        "noisy",
        json!({
            "Initial": {"type": "Initial", "direct_transition": "Branch"},
            "Branch": {
                "type": "Simple",
                "distributed_transition": [
                    {"distribution": 0.5, "transition": "Sick"},
                    {"distribution": 0.5, "transition": "Well"}
                ]
            },
            "Sick": {"type": "ConditionOnset", "codes": [code("flu")], "direct_transition": "Wait"},
            "Well": {"type": "Symptom", "symptom": "cough", "range": {"low": 1, "high": 10}, "direct_transition": "Wait"},
            "Wait": {"type": "Delay", "range": {"low": 1, "high": 30, "unit": "days"}, "direct_transition": "Measure"},
            "Measure": {
                "type": "Observation",
                "codes": [code("temp")],
                "distribution": {"kind": "GAUSSIAN", "parameters": {"mean": 37, "standardDeviation": 0.5}},
                "direct_transition": "Branch"
            }
        }),
    )
}

fn run(seed: u64, m: &Module, interval: i64, steps: i64) -> (Person, Executor) {
    let mut executor = Executor::new(registry([]));
    let mut agent = person(seed);
    for i in 0..steps {
        executor.step(&mut agent, m, days(i * interval)).unwrap();
    }
    (agent, executor)
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    // Exactly one live instance; everything in the past has entered and exited in order.
    #[test]
    fn prop_history_is_well_formed(
        delays in proptest::collection::vec(1u32..20, 1..6),
        interval in 1i64..15,
        steps in 1i64..20,
    ) {
        let m = delay_chain(&delays);
        let mut executor = Executor::new(registry([]));
        let mut agent = person(1);

        for i in 0..steps {
            let time = days(i * interval);
            let done = executor.step(&mut agent, &m, time).unwrap();
            let history = executor.history("chain").unwrap();

            prop_assert_eq!(history.current().exited(), None);
            prop_assert_eq!(done, history.current().name() == "Terminal");
            let mut last_exit = 0;
            for past in history.past() {
                let entered = past.entered().unwrap();
                let exited = past.exited().unwrap();
                prop_assert!(entered <= exited);
                prop_assert!(last_exit <= entered);
                prop_assert!(exited <= time);
                last_exit = exited;
            }
        }
    }

    // A chain of delays finishes exactly when the total wait has elapsed.
    #[test]
    fn prop_delays_finish_on_schedule(
        delays in proptest::collection::vec(1u32..20, 1..6),
        interval in 1i64..15,
    ) {
        let m = delay_chain(&delays);
        let total: i64 = delays.iter().map(|d| i64::from(*d)).sum();
        let steps = total / interval + 2;
        let (_, executor) = run(1, &m, interval, steps);
        let history = executor.history("chain").unwrap();

        prop_assert!(history.current().is_terminal());
        let last = history.past().last().unwrap();
        prop_assert_eq!(last.exited(), Some(days(total)));
    }

    // Same seed, same module, same schedule: same record and same path.
    #[test]
    fn prop_seeded_runs_are_identical(seed in any::<u64>(), interval in 1i64..10) {
        let m = noisy();
        let (a, first) = run(seed, &m, interval, 40);
        let (b, second) = run(seed, &m, interval, 40);

        prop_assert_eq!(a.id(), b.id());
        prop_assert_eq!(
            serde_json::to_string(a.record().entries()).unwrap(),
            serde_json::to_string(b.record().entries()).unwrap()
        );
        let path = |executor: &Executor| -> Vec<(String, Option<i64>)> {
            executor
                .history("noisy")
                .unwrap()
                .iter()
                .map(|i| (i.name().to_string(), i.entered()))
                .collect()
        };
        prop_assert_eq!(path(&first), path(&second));
    }

    // Once terminal, further steps leave the history untouched.
    #[test]
    fn prop_terminal_is_absorbing(
        delays in proptest::collection::vec(1u32..5, 1..3),
        extra in 1i64..10,
    ) {
        let m = delay_chain(&delays);
        let total: i64 = delays.iter().map(|d| i64::from(*d)).sum();
        let mut executor = Executor::new(registry([]));
        let mut agent = person(2);
        prop_assert!(!executor.step(&mut agent, &m, 0).unwrap());
        prop_assert!(executor.step(&mut agent, &m, days(total)).unwrap());
        let before = executor.history("chain").unwrap().len();

        for i in 1..=extra {
            prop_assert!(executor.step(&mut agent, &m, days(total + i)).unwrap());
        }
        prop_assert_eq!(executor.history("chain").unwrap().len(), before);
    }
}
