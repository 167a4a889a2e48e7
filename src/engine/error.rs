use crate::logic::LogicError;
use crate::module::TransitionError;
use thiserror::Error;

/// What went wrong while stepping a module.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineErrorKind {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Logic(#[from] LogicError),
    #[error("transition chose unknown state {0}")]
    UnknownState(String),
    #[error("submodule {0} is not in the registry")]
    UnknownSubmodule(String),
    #[error("submodule call cycle: {}", .0.join(" -> "))]
    SubmoduleCycle(Vec<String>),
    #[error("submodule nesting exceeded {limit} levels")]
    SubmoduleDepthExceeded { limit: usize },
    #[error("attribute {0} is not set")]
    MissingReference(String),
    #[error("attribute {attribute} holds a {found}, expected {expected}")]
    AttributeType {
        attribute: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// A fatal error for one agent, located by module and state.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{module}/{state} (agent {agent}): {kind}")]
pub struct EngineError {
    pub agent: String,
    pub module: String,
    pub state: String,
    #[source]
    pub kind: EngineErrorKind,
}

impl EngineError {
    pub fn new(
        agent: impl Into<String>,
        module: impl Into<String>,
        state: impl Into<String>,
        kind: EngineErrorKind,
    ) -> Self {
        Self {
            agent: agent.into(),
            module: module.into(),
            state: state.into(),
            kind,
        }
    }
}
