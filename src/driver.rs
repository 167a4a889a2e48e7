//! Per-agent lifecycle
//!
//! Steps every top-level module for one agent on a fixed clock, opening
//! the periodic wellness encounter that `wellness` Encounter states wait
//! on.

use crate::agent::Agent;
use crate::engine::{EngineError, Executor};
use crate::module::Registry;
use crate::Timestamp;
use std::sync::Arc;

pub struct Lifecycle<A: Agent> {
    agent: A,
    executor: Executor,
    /// Top-level modules that have not yet finished, in registry order.
    active: Vec<String>,
    wellness_interval: Option<Timestamp>,
    next_wellness: Timestamp,
}

impl<A: Agent> Lifecycle<A> {
    pub fn new(agent: A, registry: Arc<Registry>) -> Self {
        let active = registry
            .top_level_modules()
            .map(|m| m.key().to_string())
            .collect();
        let next_wellness = agent.birth_time();
        Self {
            agent,
            executor: Executor::new(registry),
            active,
            wellness_interval: None,
            next_wellness,
        }
    }

    #[must_use]
    pub fn with_max_submodule_depth(mut self, depth: usize) -> Self {
        self.executor = self.executor.with_max_submodule_depth(depth);
        self
    }

    /// Open a wellness encounter every `interval`, starting at birth.
    #[must_use]
    pub fn with_wellness_interval(mut self, interval: Timestamp) -> Self {
        self.wellness_interval = (interval > 0).then_some(interval);
        self
    }

    pub fn agent(&self) -> &A {
        &self.agent
    }

    pub fn into_agent(self) -> A {
        self.agent
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn active_modules(&self) -> &[String] {
        &self.active
    }

    /// Step every active module once at `time`.
    pub fn tick(&mut self, time: Timestamp) -> Result<(), EngineError> {
        let wellness = self.wellness_due(time);
        if wellness {
            self.agent.record_mut().begin_wellness_encounter(time);
        }
        let result = self.step_modules(time);
        if wellness {
            self.agent.record_mut().end_wellness_encounter(time);
        }
        result
    }

    /// Tick from `start` to `end` inclusive, stopping early once the agent
    /// has died or every module has finished.
    pub fn run(
        &mut self,
        start: Timestamp,
        end: Timestamp,
        step: Timestamp,
    ) -> Result<(), EngineError> {
        let step = step.max(1);
        let mut time = start;
        while time <= end && self.agent.alive(time) && !self.active.is_empty() {
            self.tick(time)?;
            let Some(next) = time.checked_add(step) else {
                break;
            };
            time = next;
        }
        tracing::debug!(
            agent = self.agent.id(),
            until = time.min(end),
            alive = self.agent.alive(time.min(end)),
            unfinished = self.active.len(),
            "Lifecycle stopped"
        );
        Ok(())
    }

    fn wellness_due(&mut self, time: Timestamp) -> bool {
        let Some(interval) = self.wellness_interval else {
            return false;
        };
        if time < self.next_wellness || !self.agent.alive(time) {
            return false;
        }
        while self.next_wellness <= time && self.next_wellness < Timestamp::MAX {
            self.next_wellness = self.next_wellness.saturating_add(interval);
        }
        true
    }

    fn step_modules(&mut self, time: Timestamp) -> Result<(), EngineError> {
        let registry = Arc::clone(self.executor.registry());
        let mut index = 0;
        while index < self.active.len() {
            let Some(module) = registry.lookup(&self.active[index]) else {
                self.active.remove(index);
                continue;
            };
            if self.executor.step(&mut self.agent, module, time)? {
                tracing::debug!(agent = self.agent.id(), module = module.key(), time, "Module finished");
                self.active.remove(index);
            } else {
                index += 1;
            }
        }
        Ok(())
    }
}
