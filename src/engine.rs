//! Per-agent module execution
//!
//! An [`Executor`] owns one [`History`] per module an agent has entered and
//! advances them against the shared, immutable registry. Everything that
//! changes while an agent sits in a state lives on a [`StateInstance`];
//! templates are never mutated.

mod error;
mod executor;
mod history;
mod instance;
mod process;

#[cfg(test)]
mod proptests;
#[cfg(test)]
pub(crate) mod testing;

pub use error::{EngineError, EngineErrorKind};
pub use executor::{Executor, DEFAULT_MAX_SUBMODULE_DEPTH};
pub use history::{History, Past};
pub use instance::StateInstance;
