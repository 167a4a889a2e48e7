//! Step loop
//!
//! The executor owns every module history for one agent. A step processes
//! the current state, follows transitions while states fall through, and
//! stops at the first state that blocks or ends the module.

use super::history::History;
use super::instance::StateInstance;
use super::process::{Frame, Progress};
use super::{EngineError, EngineErrorKind};
use crate::agent::Agent;
use crate::module::{Module, Registry, StateTemplate};
use crate::Timestamp;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const DEFAULT_MAX_SUBMODULE_DEPTH: usize = 32;

/// Per-agent execution context.
#[derive(Debug)]
pub struct Executor {
    registry: Arc<Registry>,
    /// Keyed by module key; a finished submodule's entry is removed.
    histories: BTreeMap<String, History>,
    /// Modules being stepped right now, outermost first.
    call_stack: Vec<String>,
    max_depth: usize,
}

impl Executor {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            histories: BTreeMap::new(),
            call_stack: Vec::new(),
            max_depth: DEFAULT_MAX_SUBMODULE_DEPTH,
        }
    }

    #[must_use]
    pub fn with_max_submodule_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.max(1);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn history(&self, module: &str) -> Option<&History> {
        self.histories.get(module)
    }

    /// Advance `agent` through `module` up to `time`.
    ///
    /// Returns `Ok(true)` once the module has reached a terminal state;
    /// further steps are no-ops that keep returning `true`.
    pub fn step(
        &mut self,
        agent: &mut dyn Agent,
        module: &Module,
        time: Timestamp,
    ) -> Result<bool, EngineError> {
        let key = module.key().to_string();
        let mut history = self
            .histories
            .remove(&key)
            .unwrap_or_else(|| History::new(StateInstance::instantiate(module.initial_state())));
        let mut wellness = agent.record().active_wellness_encounter().is_some();

        self.call_stack.push(key.clone());
        let result = self.run(agent, module, &mut history, time, &mut wellness);
        self.call_stack.pop();
        self.histories.insert(key, history);
        result
    }

    fn run(
        &mut self,
        agent: &mut dyn Agent,
        module: &Module,
        history: &mut History,
        time: Timestamp,
        wellness: &mut bool,
    ) -> Result<bool, EngineError> {
        loop {
            if history.current().is_terminal() {
                return Ok(true);
            }
            if !self.process_current(agent, history, time, wellness)? {
                return Ok(history.current().is_terminal());
            }

            let template = Arc::clone(history.current().template());
            let Some(transition) = template.transition() else {
                history.current_mut().finish();
                return Ok(true);
            };
            history.current_mut().exit(time);
            let exited = history.current().exited().unwrap_or(time);

            let next = transition
                .resolve(agent, time, &*history)
                .map_err(|e| fail(&*agent, &template, e.into()))?;
            let Some(next_template) = module.state(next) else {
                return Err(fail(
                    &*agent,
                    &template,
                    EngineErrorKind::UnknownState(next.to_string()),
                ));
            };
            tracing::trace!(
                agent = agent.id(),
                module = module.key(),
                from = template.name(),
                to = next,
                time,
                "Transition"
            );
            history.advance(StateInstance::instantiate(next_template));

            // A timed state that woke before `time` hands over at its wake time.
            if exited < time {
                self.run(agent, module, history, exited, wellness)?;
            }
        }
    }

    /// Process the current instance once; `true` means it fell through.
    fn process_current(
        &mut self,
        agent: &mut dyn Agent,
        history: &mut History,
        time: Timestamp,
        wellness: &mut bool,
    ) -> Result<bool, EngineError> {
        if !agent.alive(time) {
            return Ok(false);
        }
        history.current_mut().enter(time);
        let template = Arc::clone(history.current().template());

        let progress = {
            let (current, past) = history.parts_mut();
            let mut frame = Frame {
                agent: &mut *agent,
                time,
                past,
                wellness: &mut *wellness,
            };
            current.process(&mut frame)
        }
        .map_err(|kind| fail(&*agent, &template, kind))?;

        match progress {
            Progress::FallThrough => Ok(true),
            Progress::Blocked => Ok(false),
            Progress::Call(path) => self.call_submodule(agent, history, &template, &path, time),
        }
    }

    /// Step the callee on behalf of `caller`; `true` once it has finished.
    fn call_submodule(
        &mut self,
        agent: &mut dyn Agent,
        caller: &mut History,
        template: &StateTemplate,
        path: &str,
        time: Timestamp,
    ) -> Result<bool, EngineError> {
        let registry = Arc::clone(&self.registry);
        let Some(callee) = registry.lookup(path) else {
            return Err(fail(
                &*agent,
                template,
                EngineErrorKind::UnknownSubmodule(path.to_string()),
            ));
        };
        if self.call_stack.iter().any(|key| key == callee.key()) {
            let mut chain = self.call_stack.clone();
            chain.push(callee.key().to_string());
            return Err(fail(&*agent, template, EngineErrorKind::SubmoduleCycle(chain)));
        }
        if self.call_stack.len() >= self.max_depth {
            return Err(fail(
                &*agent,
                template,
                EngineErrorKind::SubmoduleDepthExceeded {
                    limit: self.max_depth,
                },
            ));
        }

        let caller_key = template.module();
        let record = agent.record_mut();
        if let Some(encounter) = record.current_encounter(caller_key) {
            record.set_current_encounter(callee.key(), Some(encounter));
        }

        let finished = self.step(agent, callee, time)?;
        if finished {
            if let Some(inner) = self.histories.remove(callee.key()) {
                caller.absorb(inner);
            }
            let record = agent.record_mut();
            let encounter = record.current_encounter(callee.key());
            record.set_current_encounter(caller_key, encounter);
            record.set_current_encounter(callee.key(), None);
            tracing::trace!(
                agent = agent.id(),
                module = caller_key,
                submodule = callee.key(),
                "Submodule finished"
            );
        }
        Ok(finished)
    }
}

fn fail(agent: &dyn Agent, template: &StateTemplate, kind: EngineErrorKind) -> EngineError {
    EngineError::new(agent.id(), template.module(), template.name(), kind)
}
