use super::StateInstance;
use crate::logic::PriorStates;
use crate::Timestamp;

/// One agent's path through one module.
///
/// The current instance is held apart from the past ones, so there is
/// always exactly one of it. Past instances are kept oldest first.
#[derive(Debug, Clone)]
pub struct History {
    current: StateInstance,
    past: Vec<StateInstance>,
}

impl History {
    pub fn new(initial: StateInstance) -> Self {
        Self {
            current: initial,
            past: Vec::new(),
        }
    }

    pub fn current(&self) -> &StateInstance {
        &self.current
    }

    pub(super) fn current_mut(&mut self) -> &mut StateInstance {
        &mut self.current
    }

    /// Past instances, oldest first.
    pub fn past(&self) -> &[StateInstance] {
        &self.past
    }

    /// Every instance, most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &StateInstance> {
        std::iter::once(&self.current).chain(self.past.iter().rev())
    }

    pub fn len(&self) -> usize {
        self.past.len() + 1
    }

    /// Never true; a history always has a current state.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Split borrow: the current instance mutably, the past as a unit.
    pub(super) fn parts_mut(&mut self) -> (&mut StateInstance, Past<'_>) {
        (&mut self.current, Past(&mut self.past))
    }

    /// Make `next` current and move the old current into the past.
    pub(super) fn advance(&mut self, next: StateInstance) {
        let previous = std::mem::replace(&mut self.current, next);
        self.past.push(previous);
    }

    /// Append a finished submodule's history to the past.
    pub(super) fn absorb(&mut self, other: History) {
        self.past.extend(other.past);
        self.past.push(other.current);
    }
}

impl PriorStates for History {
    fn had_prior_state(
        &self,
        name: &str,
        since: Option<&str>,
        exited_after: Option<Timestamp>,
    ) -> bool {
        search(self.iter(), name, since, exited_after)
    }
}

/// The past portion of a history, handed to states while they process.
pub struct Past<'h>(&'h mut Vec<StateInstance>);

impl Past<'_> {
    /// Most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &StateInstance> {
        self.0.iter().rev()
    }

    /// Most recent first.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut StateInstance> {
        self.0.iter_mut().rev()
    }
}

impl PriorStates for Past<'_> {
    fn had_prior_state(
        &self,
        name: &str,
        since: Option<&str>,
        exited_after: Option<Timestamp>,
    ) -> bool {
        search(self.0.iter().rev(), name, since, exited_after)
    }
}

fn search<'a>(
    states: impl Iterator<Item = &'a StateInstance>,
    name: &str,
    since: Option<&str>,
    exited_after: Option<Timestamp>,
) -> bool {
    for state in states {
        if let (Some(after), Some(exited)) = (exited_after, state.exited()) {
            if exited <= after {
                return false;
            }
        }
        if state.name() == name {
            return true;
        }
        if since == Some(state.name()) {
            return false;
        }
    }
    false
}
