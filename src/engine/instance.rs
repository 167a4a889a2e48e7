use crate::agent::EntryRef;
use crate::module::{StateKind, StateTemplate};
use crate::Timestamp;
use std::sync::Arc;

/// One agent's visit to one state.
///
/// Holds a shared handle to the immutable template plus everything that
/// changes while the agent sits in the state. A second visit to the same
/// state always gets a fresh instance.
#[derive(Debug, Clone)]
pub struct StateInstance {
    template: Arc<StateTemplate>,
    entered: Option<Timestamp>,
    exited: Option<Timestamp>,
    /// Wake time for Delay and timed Procedure states.
    pub(super) wake: Option<Timestamp>,
    /// Entry recorded by this visit, if any.
    pub(super) entry: Option<EntryRef>,
    /// Onset states: whether the entry has been recorded yet.
    pub(super) diagnosed: bool,
    /// Set when a transition-less Death state has ended the module.
    finished: bool,
}

impl StateInstance {
    pub fn instantiate(template: &Arc<StateTemplate>) -> Self {
        Self {
            template: Arc::clone(template),
            entered: None,
            exited: None,
            wake: None,
            entry: None,
            diagnosed: false,
            finished: false,
        }
    }

    pub fn template(&self) -> &Arc<StateTemplate> {
        &self.template
    }

    pub fn name(&self) -> &str {
        self.template.name()
    }

    pub fn kind(&self) -> &StateKind {
        self.template.kind()
    }

    pub fn entered(&self) -> Option<Timestamp> {
        self.entered
    }

    pub fn exited(&self) -> Option<Timestamp> {
        self.exited
    }

    pub fn entry(&self) -> Option<&EntryRef> {
        self.entry.as_ref()
    }

    /// Whether this visit ended the module.
    pub fn is_terminal(&self) -> bool {
        self.finished || matches!(self.kind(), StateKind::Terminal)
    }

    /// First processing sets `entered`; later calls keep it.
    pub(super) fn enter(&mut self, time: Timestamp) {
        self.entered.get_or_insert(time);
    }

    /// Timed states exit at their wake time, everything else now.
    pub(super) fn exit(&mut self, time: Timestamp) {
        if self.exited.is_none() {
            self.exited = Some(self.wake.unwrap_or(time));
        }
    }

    pub(super) fn finish(&mut self) {
        self.finished = true;
    }
}
