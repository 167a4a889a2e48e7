//! Immutable workflow modules
//!
//! A [`Module`] is a named graph of [`StateTemplate`]s built once from a
//! JSON definition and validated up front: exactly one `Initial` state,
//! every transition target present, and every state that can fall through
//! given somewhere to go.

mod quantity;
mod registry;
mod state;
mod transition;

pub use quantity::{Amount, Distribution, DistributionKind, Duration};
pub use registry::{Registry, RegistryError};
pub use state::{
    AttributeSource, CarePlanStart, Counter, CounterAction, Death, Delay, Encounter, EncounterEnd,
    EndTarget, Immunization, MedicationOrder, Observation, ObservationGroup, ObservationValue,
    Onset, Procedure, SetAttribute, StateKind, StateTemplate, Symptom,
};
pub use transition::{
    ComplexOption, ConditionalOption, DistributedOption, Outcome, Transition, TransitionError,
    Weight,
};

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use transition::TransitionFields;

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("module {module}: invalid definition: {source}")]
    Definition {
        module: String,
        source: serde_json::Error,
    },
    #[error("{module}/{state}: invalid state: {source}")]
    State {
        module: String,
        state: String,
        source: serde_json::Error,
    },
    #[error("{module}/{state}: {reason}")]
    InvalidState {
        module: String,
        state: String,
        reason: String,
    },
    #[error("module {module} has no Initial state")]
    MissingInitialState { module: String },
    #[error("module {module} has more than one Initial state: {states:?}")]
    MultipleInitialStates { module: String, states: Vec<String> },
    #[error("{module}/{state}: state has no transition")]
    MissingTransition { module: String, state: String },
    #[error("{module}/{state}: Terminal states cannot have a transition")]
    TerminalTransition { module: String, state: String },
    #[error("{module}/{state}: transition targets unknown state {target}")]
    UnknownTarget {
        module: String,
        state: String,
        target: String,
    },
}

/// The serialized shape of a module.
#[derive(Debug, Deserialize)]
pub struct ModuleDefinition {
    pub name: String,
    /// Each state stays raw until it is parsed with its own error context.
    pub states: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug)]
pub struct Module {
    key: String,
    name: String,
    submodule: bool,
    states: BTreeMap<String, Arc<StateTemplate>>,
    initial: Arc<StateTemplate>,
}

impl Module {
    /// Parse and validate a module from JSON text.
    pub fn from_json(key: &str, text: &str, submodule: bool) -> Result<Self, ModuleError> {
        let definition = serde_json::from_str(text).map_err(|source| ModuleError::Definition {
            module: key.to_string(),
            source,
        })?;
        Self::from_definition(key, definition, submodule)
    }

    /// Parse and validate a module from an already-parsed JSON value.
    pub fn from_value(
        key: &str,
        value: serde_json::Value,
        submodule: bool,
    ) -> Result<Self, ModuleError> {
        let definition = serde_json::from_value(value).map_err(|source| ModuleError::Definition {
            module: key.to_string(),
            source,
        })?;
        Self::from_definition(key, definition, submodule)
    }

    pub fn from_definition(
        key: &str,
        definition: ModuleDefinition,
        submodule: bool,
    ) -> Result<Self, ModuleError> {
        let mut states = BTreeMap::new();
        for (state_name, raw) in definition.states {
            let template = build_state(key, &definition.name, &state_name, raw)?;
            states.insert(state_name, Arc::new(template));
        }

        let initials: Vec<&Arc<StateTemplate>> = states
            .values()
            .filter(|s| matches!(s.kind(), StateKind::Initial))
            .collect();
        let initial = match initials.as_slice() {
            [] => {
                return Err(ModuleError::MissingInitialState {
                    module: key.to_string(),
                })
            }
            [only] => Arc::clone(only),
            many => {
                return Err(ModuleError::MultipleInitialStates {
                    module: key.to_string(),
                    states: many.iter().map(|s| s.name().to_string()).collect(),
                })
            }
        };

        for state in states.values() {
            if let Some(transition) = state.transition() {
                for target in transition.targets() {
                    if !states.contains_key(target) {
                        return Err(ModuleError::UnknownTarget {
                            module: key.to_string(),
                            state: state.name().to_string(),
                            target: target.to_string(),
                        });
                    }
                }
            }
        }

        Ok(Self {
            key: key.to_string(),
            name: definition.name,
            submodule,
            states,
            initial,
        })
    }

    /// Registry key (root-relative path without extension).
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_submodule(&self) -> bool {
        self.submodule
    }

    pub fn state(&self, name: &str) -> Option<&Arc<StateTemplate>> {
        self.states.get(name)
    }

    pub fn initial_state(&self) -> &Arc<StateTemplate> {
        &self.initial
    }

    pub fn states(&self) -> impl Iterator<Item = &Arc<StateTemplate>> {
        self.states.values()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// States no transition path from `Initial` can reach, in name order.
    pub fn unreachable_states(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([self.initial.name()]);
        while let Some(name) = queue.pop_front() {
            if !seen.insert(name) {
                continue;
            }
            if let Some(transition) = self.states.get(name).and_then(|s| s.transition()) {
                queue.extend(transition.targets());
            }
        }
        self.states
            .keys()
            .map(String::as_str)
            .filter(|name| !seen.contains(name))
            .collect()
    }

    /// `(state, submodule path)` for every CallSubmodule in this module.
    pub fn submodule_calls(&self) -> Vec<(&str, &str)> {
        self.states
            .values()
            .filter_map(|s| match s.kind() {
                StateKind::CallSubmodule { submodule } => Some((s.name(), submodule.as_str())),
                _ => None,
            })
            .collect()
    }
}

fn build_state(
    module: &str,
    module_name: &str,
    state: &str,
    raw: serde_json::Value,
) -> Result<StateTemplate, ModuleError> {
    let invalid = |reason: String| ModuleError::InvalidState {
        module: module.to_string(),
        state: state.to_string(),
        reason,
    };
    let parse_error = |source| ModuleError::State {
        module: module.to_string(),
        state: state.to_string(),
        source,
    };

    let fields: TransitionFields = serde_json::from_value(raw.clone()).map_err(parse_error)?;
    let kind: StateKind = serde_json::from_value(raw).map_err(parse_error)?;
    kind.validate().map_err(invalid)?;
    let transition = fields.into_transition().map_err(invalid)?;

    if matches!(kind, StateKind::Terminal) && transition.is_some() {
        return Err(ModuleError::TerminalTransition {
            module: module.to_string(),
            state: state.to_string(),
        });
    }
    if transition.is_none() && !kind.may_end_module() {
        return Err(ModuleError::MissingTransition {
            module: module.to_string(),
            state: state.to_string(),
        });
    }
    Ok(StateTemplate::new(module, module_name, state, kind, transition))
}
