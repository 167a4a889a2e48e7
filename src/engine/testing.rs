//! Fixtures shared by engine tests

use crate::agent::Person;
use crate::module::{Module, Registry};
use crate::time::DAY;
use crate::Timestamp;
use serde_json::{json, Value};
use std::sync::Arc;

/// Build a module from a `states` object.
pub fn module(key: &str, states: Value) -> Module {
    Module::from_value(key, json!({ "name": key, "states": states }), false).unwrap()
}

pub fn submodule(key: &str, states: Value) -> Module {
    Module::from_value(key, json!({ "name": key, "states": states }), true).unwrap()
}

pub fn registry(modules: impl IntoIterator<Item = Module>) -> Arc<Registry> {
    Arc::new(Registry::from_modules(modules))
}

pub fn person(seed: u64) -> Person {
    Person::new(seed, 0)
}

pub fn code(code: &str) -> Value {
    json!({ "system": "SNOMED-CT", "code": code, "display": code })
}

pub fn days(n: i64) -> Timestamp {
    n * DAY
}
