//! Per-kind processing rules
//!
//! Each rule either falls through (the transition is taken this step) or
//! blocks (the same instance is retried next step). Submodule calls are
//! handed back to the executor, which owns the other histories.

use super::history::Past;
use super::{EngineErrorKind, StateInstance};
use crate::agent::{Agent, AttributeValue, Code, EntryId, EntryKind, EntryRef, NewEntry};
use crate::logic::Scope;
use crate::module::{
    AttributeSource, Counter, CounterAction, Death, Encounter, EndTarget, Observation,
    ObservationGroup, ObservationValue, Onset, StateKind, StateTemplate,
};
use crate::Timestamp;
use serde_json::json;
use std::sync::Arc;

/// Outcome of processing one instance once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Progress {
    FallThrough,
    Blocked,
    /// A CallSubmodule state; the executor drives the named callee.
    Call(String),
}

impl Progress {
    fn from_bool(fell_through: bool) -> Self {
        if fell_through {
            Self::FallThrough
        } else {
            Self::Blocked
        }
    }
}

/// What a state may touch while it processes.
pub(super) struct Frame<'a> {
    pub agent: &'a mut dyn Agent,
    pub time: Timestamp,
    pub past: Past<'a>,
    /// A wellness encounter is open and not yet taken by this module this step.
    pub wellness: &'a mut bool,
}

impl StateInstance {
    pub(super) fn process(&mut self, frame: &mut Frame<'_>) -> Result<Progress, EngineErrorKind> {
        let template = Arc::clone(self.template());
        let time = frame.time;
        let module = template.module();

        let fell_through = match template.kind() {
            StateKind::Initial | StateKind::Simple => true,
            StateKind::Terminal => false,
            StateKind::CallSubmodule { submodule } => return Ok(Progress::Call(submodule.clone())),

            // ================================================================
            // Timing and control
            // ================================================================
            StateKind::Delay(delay) => {
                let agent = &mut *frame.agent;
                let wake = *self.wake.get_or_insert_with(|| {
                    time.saturating_add(delay.duration.sample_millis(agent.random()))
                });
                time >= wake
            }
            StateKind::Guard { allow } => {
                allow.evaluate(&Scope::new(&*frame.agent, time, &frame.past))?
            }

            // ================================================================
            // Agent attributes
            // ================================================================
            StateKind::SetAttribute(set) => {
                let value = match &set.value {
                    AttributeSource::Clear => None,
                    AttributeSource::Value(value) => Some(value.clone()),
                    AttributeSource::Sampled(amount) => {
                        Some(AttributeValue::Number(amount.sample(frame.agent.random())))
                    }
                };
                match value {
                    Some(value) => frame.agent.set_attribute(&set.attribute, value),
                    None => {
                        frame.agent.remove_attribute(&set.attribute);
                    }
                }
                true
            }
            StateKind::Counter(counter) => {
                count(counter, frame.agent)?;
                true
            }
            StateKind::Symptom(symptom) => {
                if frame.agent.random().uniform() < symptom.probability {
                    let value = symptom.severity.sample(frame.agent.random());
                    let cause = symptom.cause.as_deref().unwrap_or(template.module_name());
                    frame.agent.set_symptom(cause, &symptom.symptom, time, value);
                }
                true
            }

            // ================================================================
            // Encounters
            // ================================================================
            StateKind::Encounter(encounter) => self.start_encounter(&template, encounter, frame)?,
            StateKind::EncounterEnd(end) => {
                let record = frame.agent.record_mut();
                if let Some(id) = record.current_encounter(module) {
                    if record.active_wellness_encounter() != Some(id) {
                        record.end(id, time);
                        if let (Some(disposition), Some(entry)) =
                            (&end.discharge_disposition, record.entry_mut(id))
                        {
                            entry.details = json!({ "discharge_disposition": disposition });
                        }
                    }
                    record.set_current_encounter(module, None);
                }
                true
            }

            // ================================================================
            // Clinical entries
            // ================================================================
            StateKind::ConditionOnset(onset) => {
                self.onset(&template, onset, EntryKind::Condition, frame);
                true
            }
            StateKind::AllergyOnset(onset) => {
                self.onset(&template, onset, EntryKind::Allergy, frame);
                true
            }
            StateKind::ConditionEnd(target) => {
                end_entries(EntryKind::Condition, target, frame.agent, time)?;
                true
            }
            StateKind::AllergyEnd(target) => {
                end_entries(EntryKind::Allergy, target, frame.agent, time)?;
                true
            }
            StateKind::MedicationEnd(target) => {
                end_entries(EntryKind::Medication, target, frame.agent, time)?;
                true
            }
            StateKind::CarePlanEnd(target) => {
                end_entries(EntryKind::CarePlan, target, frame.agent, time)?;
                true
            }
            StateKind::MedicationOrder(order) => {
                let reason = resolve_reason(&*frame.agent, order.reason.as_deref())?;
                let mut details = serde_json::Map::new();
                details.insert("chronic".into(), order.chronic.into());
                details.insert("administration".into(), order.administration.into());
                if let Some(prescription) = &order.prescription {
                    details.insert("prescription".into(), prescription.clone());
                }
                let entry = frame.agent.record_mut().record(NewEntry::new(
                    EntryKind::Medication,
                    module,
                    template.name(),
                    time,
                    order.codes.clone(),
                ));
                entry.reasons.extend(reason);
                entry.details = serde_json::Value::Object(details);
                let reference = entry.reference();
                self.keep(reference, order.assign_to_attribute.as_deref(), frame.agent);
                true
            }
            StateKind::CarePlanStart(plan) => {
                let reason = resolve_reason(&*frame.agent, plan.reason.as_deref())?;
                let entry = frame.agent.record_mut().record(NewEntry::new(
                    EntryKind::CarePlan,
                    module,
                    template.name(),
                    time,
                    plan.codes.clone(),
                ));
                entry.reasons.extend(reason);
                if !plan.activities.is_empty() {
                    entry.details = json!({ "activities": plan.activities });
                }
                let reference = entry.reference();
                self.keep(reference, plan.assign_to_attribute.as_deref(), frame.agent);
                true
            }
            StateKind::Procedure(procedure) => {
                if self.wake.is_none() {
                    let reason = resolve_reason(&*frame.agent, procedure.reason.as_deref())?;
                    let stop = time.saturating_add(
                        procedure
                            .duration()
                            .map_or(0, |d| d.sample_millis(frame.agent.random())),
                    );
                    let entry = frame.agent.record_mut().record(NewEntry::new(
                        EntryKind::Procedure,
                        module,
                        template.name(),
                        time,
                        procedure.codes.clone(),
                    ));
                    entry.reasons.extend(reason);
                    entry.stop = Some(stop);
                    let reference = entry.reference();
                    self.wake = Some(stop);
                    self.keep(reference, procedure.assign_to_attribute.as_deref(), frame.agent);
                }
                self.wake.is_some_and(|stop| time >= stop)
            }
            StateKind::Observation(observation) => {
                let reference = observe(observation, &template, frame.agent, time);
                self.entry = Some(reference);
                true
            }
            StateKind::MultiObservation(group) => {
                self.record_group(&template, group, EntryKind::Observation, frame);
                true
            }
            StateKind::DiagnosticReport(group) => {
                self.record_group(&template, group, EntryKind::Report, frame);
                true
            }
            StateKind::Immunization(immunization) => {
                let reference = frame
                    .agent
                    .record_mut()
                    .record(NewEntry::new(
                        EntryKind::Immunization,
                        module,
                        template.name(),
                        time,
                        immunization.codes.clone(),
                    ))
                    .reference();
                self.entry = Some(reference);
                true
            }
            StateKind::Death(death) => {
                die(death, frame.agent, time)?;
                true
            }
        };
        Ok(Progress::from_bool(fell_through))
    }

    /// Remember a recorded entry and optionally expose it as an attribute.
    fn keep(&mut self, reference: EntryRef, attribute: Option<&str>, agent: &mut dyn Agent) {
        if let Some(attribute) = attribute {
            agent.set_attribute(attribute, reference.clone().into());
        }
        self.entry = Some(reference);
    }

    fn start_encounter(
        &mut self,
        template: &StateTemplate,
        encounter: &Encounter,
        frame: &mut Frame<'_>,
    ) -> Result<bool, EngineErrorKind> {
        let module = template.module();
        if encounter.wellness {
            // Only the driver opens wellness encounters; each module takes one per step.
            let open = frame.agent.record().active_wellness_encounter();
            let Some(id) = open.filter(|_| *frame.wellness) else {
                return Ok(false);
            };
            *frame.wellness = false;
            let record = frame.agent.record_mut();
            record.set_current_encounter(module, Some(id));
            self.entry = record.entry(id).map(crate::agent::Entry::reference);
        } else {
            let reason = resolve_reason(&*frame.agent, encounter.reason.as_deref())?;
            let record = frame.agent.record_mut();
            let entry = record.record(NewEntry::new(
                EntryKind::Encounter,
                module,
                template.name(),
                frame.time,
                encounter.codes.clone(),
            ));
            entry.category.clone_from(&encounter.encounter_class);
            entry.reasons.extend(reason);
            let reference = entry.reference();
            record.set_current_encounter(module, Some(reference.id));
            self.entry = Some(reference);
        }

        // Onsets waiting for this encounter are diagnosed now.
        let Frame { agent, past, time, .. } = frame;
        for previous in past.iter_mut() {
            if previous.name() == template.name() {
                break;
            }
            let previous_template = Arc::clone(previous.template());
            let (onset, kind) = match previous_template.kind() {
                StateKind::ConditionOnset(onset) => (onset, EntryKind::Condition),
                StateKind::AllergyOnset(onset) => (onset, EntryKind::Allergy),
                _ => continue,
            };
            if !previous.diagnosed && onset.target_encounter.as_deref() == Some(template.name()) {
                previous.diagnose(&previous_template, onset, kind, &mut **agent, *time);
            }
        }
        Ok(true)
    }

    fn onset(&mut self, template: &StateTemplate, onset: &Onset, kind: EntryKind, frame: &mut Frame<'_>) {
        let in_target = match onset.target_encounter.as_deref() {
            None => true,
            Some(target) => current_encounter_state(&frame.past, &*frame.agent, template.module())
                .is_some_and(|current| current == target),
        };
        if in_target {
            self.diagnose(template, onset, kind, frame.agent, frame.time);
        } else if let (Some(attribute), Some(code)) =
            (onset.assign_to_attribute.as_deref(), onset.codes.first())
        {
            // Provisional until the target encounter records the entry.
            frame.agent.set_attribute(attribute, AttributeValue::Code(code.clone()));
        }
    }

    fn diagnose(
        &mut self,
        template: &StateTemplate,
        onset: &Onset,
        kind: EntryKind,
        agent: &mut dyn Agent,
        time: Timestamp,
    ) {
        let reference = agent
            .record_mut()
            .record(NewEntry::new(
                kind,
                template.module(),
                template.name(),
                time,
                onset.codes.clone(),
            ))
            .reference();
        self.diagnosed = true;
        self.keep(reference, onset.assign_to_attribute.as_deref(), agent);
    }

    fn record_group(
        &mut self,
        template: &StateTemplate,
        group: &ObservationGroup,
        kind: EntryKind,
        frame: &mut Frame<'_>,
    ) {
        let components: Vec<EntryId> = group
            .observations
            .iter()
            .map(|observation| observe(observation, template, frame.agent, frame.time).id)
            .collect();
        let entry = frame.agent.record_mut().record(NewEntry::new(
            kind,
            template.module(),
            template.name(),
            frame.time,
            group.codes.clone(),
        ));
        entry.category.clone_from(&group.category);
        entry.details = json!({ "components": components });
        self.entry = Some(entry.reference());
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn count(counter: &Counter, agent: &mut dyn Agent) -> Result<(), EngineErrorKind> {
    let current = match agent.attribute(&counter.attribute) {
        None => 0.0,
        Some(AttributeValue::Number(n)) => *n,
        Some(other) => {
            return Err(EngineErrorKind::AttributeType {
                attribute: counter.attribute.clone(),
                expected: "number",
                found: other.type_name(),
            })
        }
    };
    let next = match counter.action {
        CounterAction::Increment => current + counter.amount,
        CounterAction::Decrement => current - counter.amount,
    };
    agent.set_attribute(&counter.attribute, AttributeValue::Number(next));
    Ok(())
}

/// Name of the Encounter state behind the module's current encounter.
fn current_encounter_state<'p>(
    past: &'p Past<'_>,
    agent: &'p dyn Agent,
    module: &str,
) -> Option<&'p str> {
    let current = agent.record().current_encounter(module)?;
    past.iter()
        .find(|i| {
            matches!(i.kind(), StateKind::Encounter(_)) && i.entry().map(|e| e.id) == Some(current)
        })
        .map(StateInstance::name)
        .or_else(|| agent.record().entry(current).map(|e| e.name.as_str()))
}

/// Code for an encounter/order reason: an attribute holding a code or entry,
/// else the active condition recorded by a state of that name.
fn resolve_reason(agent: &dyn Agent, reason: Option<&str>) -> Result<Option<Code>, EngineErrorKind> {
    let Some(reason) = reason else {
        return Ok(None);
    };
    match agent.attribute(reason) {
        Some(value) => value
            .as_code()
            .cloned()
            .map(Some)
            .ok_or_else(|| EngineErrorKind::AttributeType {
                attribute: reason.to_string(),
                expected: "code or entry",
                found: value.type_name(),
            }),
        None => Ok(agent
            .record()
            .active_by_name(EntryKind::Condition, reason)
            .and_then(|entry| entry.codes.first().cloned())),
    }
}

fn end_entries(
    kind: EntryKind,
    target: &EndTarget,
    agent: &mut dyn Agent,
    time: Timestamp,
) -> Result<(), EngineErrorKind> {
    let record_end = |agent: &mut dyn Agent, codes: &[Code]| {
        agent
            .record_mut()
            .end_where(kind, time, |e| codes.iter().any(|c| e.has_code(c)));
    };

    if let Some(attribute) = &target.referenced_by_attribute {
        match agent.attribute(attribute).cloned() {
            None => return Err(EngineErrorKind::MissingReference(attribute.clone())),
            Some(AttributeValue::Entry(entry)) => {
                agent.record_mut().end(entry.id, time);
            }
            Some(AttributeValue::Code(code)) => record_end(agent, &[code]),
            Some(other) => {
                return Err(EngineErrorKind::AttributeType {
                    attribute: attribute.clone(),
                    expected: "entry",
                    found: other.type_name(),
                })
            }
        }
    } else if let Some(state) = &target.state {
        agent
            .record_mut()
            .end_where(kind, time, |e| e.name == *state);
    } else {
        record_end(agent, &target.codes);
    }
    Ok(())
}

fn observe(
    observation: &Observation,
    template: &StateTemplate,
    agent: &mut dyn Agent,
    time: Timestamp,
) -> EntryRef {
    let value = match &observation.value {
        ObservationValue::None => None,
        ObservationValue::Sampled(amount) => Some(AttributeValue::Number(amount.sample(agent.random()))),
        ObservationValue::Attribute(attribute) => agent.attribute(attribute).cloned(),
        ObservationValue::VitalSign(name) => agent.vital_sign(name, time).map(AttributeValue::Number),
        ObservationValue::Code(code) => Some(AttributeValue::Code(code.clone())),
    };
    let entry = agent.record_mut().record(NewEntry::new(
        EntryKind::Observation,
        template.module(),
        template.name(),
        time,
        observation.codes.clone(),
    ));
    entry.value = value;
    entry.unit.clone_from(&observation.unit);
    entry.category.clone_from(&observation.category);
    entry.reference()
}

fn die(death: &Death, agent: &mut dyn Agent, time: Timestamp) -> Result<(), EngineErrorKind> {
    let reason = if let Some(code) = death.codes.first() {
        Some(code.clone())
    } else if let Some(state) = &death.condition_onset {
        agent
            .record()
            .active_by_name(EntryKind::Condition, state)
            .and_then(|entry| entry.codes.first().cloned())
    } else if let Some(attribute) = &death.referenced_by_attribute {
        let value = agent
            .attribute(attribute)
            .ok_or_else(|| EngineErrorKind::MissingReference(attribute.clone()))?;
        let code = value.as_code().ok_or_else(|| EngineErrorKind::AttributeType {
            attribute: attribute.clone(),
            expected: "code or entry",
            found: value.type_name(),
        })?;
        Some(code.clone())
    } else {
        None
    };
    let when = match &death.delay {
        Some(delay) => time.saturating_add(delay.sample_millis(agent.random())),
        None => time,
    };
    tracing::debug!(agent = agent.id(), time = when, "Death recorded");
    agent.record_death(when, reason);
    Ok(())
}
