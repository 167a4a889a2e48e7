//! In-memory health record
//!
//! Append-only list of clinical entries. States record onto it and logic
//! predicates query it; nothing here knows about modules beyond the name of
//! the one that produced an entry.

use super::value::{AttributeValue, Code, EntryRef};
use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stable identifier of an entry within one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Encounter,
    Condition,
    Allergy,
    Medication,
    CarePlan,
    Procedure,
    Observation,
    Report,
    Immunization,
}

/// One recorded clinical fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub kind: EntryKind,
    /// Module that recorded the entry.
    pub module: String,
    /// State that recorded the entry.
    pub name: String,
    pub start: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Timestamp>,
    pub codes: Vec<Code>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<Code>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<AttributeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Encounter this entry was recorded under, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter: Option<EntryId>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl Entry {
    pub fn is_active(&self) -> bool {
        self.stop.is_none()
    }

    pub fn has_code(&self, code: &Code) -> bool {
        self.codes.iter().any(|c| c.matches(code))
    }

    /// Handle for storing this entry in an attribute.
    pub fn reference(&self) -> EntryRef {
        EntryRef {
            id: self.id,
            kind: self.kind,
            code: self.codes.first().cloned().unwrap_or_else(|| Code::new("", "", "")),
        }
    }
}

/// Fields of a new entry; everything else is filled in by the record.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub kind: EntryKind,
    pub module: String,
    pub name: String,
    pub time: Timestamp,
    pub codes: Vec<Code>,
}

impl NewEntry {
    pub fn new(
        kind: EntryKind,
        module: impl Into<String>,
        name: impl Into<String>,
        time: Timestamp,
        codes: Vec<Code>,
    ) -> Self {
        Self {
            kind,
            module: module.into(),
            name: name.into(),
            time,
            codes,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthRecord {
    entries: Vec<Entry>,
    /// Current encounter per module key.
    current_encounters: BTreeMap<String, EntryId>,
    /// Wellness encounter opened by the driver, if one is in progress.
    wellness_encounter: Option<EntryId>,
    death: Option<Death>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Death {
    pub time: Timestamp,
    pub reason: Option<Code>,
}

impl HealthRecord {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Append an entry, linking it to the module's current encounter.
    pub fn record(&mut self, new: NewEntry) -> &mut Entry {
        let id = EntryId(self.entries.len() as u64);
        let encounter = match new.kind {
            EntryKind::Encounter => None,
            _ => self.current_encounters.get(&new.module).copied(),
        };
        self.entries.push(Entry {
            id,
            kind: new.kind,
            module: new.module,
            name: new.name,
            start: new.time,
            stop: None,
            codes: new.codes,
            reasons: Vec::new(),
            value: None,
            unit: None,
            category: None,
            encounter,
            details: serde_json::Value::Null,
        });
        let last = self.entries.len() - 1;
        &mut self.entries[last]
    }

    /// Stop an entry. Already-stopped entries keep their original stop time.
    pub fn end(&mut self, id: EntryId, time: Timestamp) -> bool {
        match self.entry_mut(id) {
            Some(entry) if entry.is_active() => {
                entry.stop = Some(time);
                true
            }
            _ => false,
        }
    }

    /// Stop every active entry of `kind` matching `predicate`; returns how many.
    pub fn end_where(
        &mut self,
        kind: EntryKind,
        time: Timestamp,
        mut predicate: impl FnMut(&Entry) -> bool,
    ) -> usize {
        let mut ended = 0;
        for entry in &mut self.entries {
            if entry.kind == kind && entry.is_active() && predicate(entry) {
                entry.stop = Some(time);
                ended += 1;
            }
        }
        ended
    }

    // ========================================================================
    // Encounters
    // ========================================================================

    pub fn current_encounter(&self, module: &str) -> Option<EntryId> {
        self.current_encounters.get(module).copied()
    }

    pub fn set_current_encounter(&mut self, module: &str, encounter: Option<EntryId>) {
        match encounter {
            Some(id) => {
                self.current_encounters.insert(module.to_string(), id);
            }
            None => {
                self.current_encounters.remove(module);
            }
        }
    }

    /// Open the driver's wellness encounter.
    pub fn begin_wellness_encounter(&mut self, time: Timestamp) -> EntryId {
        let code = Code::new("SNOMED-CT", "185349003", "Encounter for check up (procedure)");
        let entry = self.record(NewEntry::new(
            EntryKind::Encounter,
            "",
            "Wellness Encounter",
            time,
            vec![code],
        ));
        entry.category = Some("wellness".to_string());
        let id = entry.id;
        self.wellness_encounter = Some(id);
        id
    }

    pub fn end_wellness_encounter(&mut self, time: Timestamp) {
        if let Some(id) = self.wellness_encounter.take() {
            self.end(id, time);
        }
    }

    pub fn active_wellness_encounter(&self) -> Option<EntryId> {
        self.wellness_encounter
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        usize::try_from(id.0).ok().and_then(|i| self.entries.get(i))
    }

    pub fn entry_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        usize::try_from(id.0).ok().and_then(|i| self.entries.get_mut(i))
    }

    /// Whether an active entry of `kind` carries `code`.
    pub fn is_active(&self, kind: EntryKind, code: &Code) -> bool {
        self.entries
            .iter()
            .any(|e| e.kind == kind && e.is_active() && e.has_code(code))
    }

    /// Most recent active entry of `kind` recorded by a state named `name`.
    pub fn active_by_name(&self, kind: EntryKind, name: &str) -> Option<&Entry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.kind == kind && e.is_active() && e.name == name)
    }

    /// Most recent entry of `kind` carrying `code`, active or not.
    pub fn latest(&self, kind: EntryKind, code: &Code) -> Option<&Entry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.kind == kind && e.has_code(code))
    }

    // ========================================================================
    // Death
    // ========================================================================

    /// Record a death. An earlier recorded death wins.
    pub fn record_death(&mut self, time: Timestamp, reason: Option<Code>) {
        match &self.death {
            Some(existing) if existing.time <= time => {}
            _ => self.death = Some(Death { time, reason }),
        }
    }

    pub fn death(&self) -> Option<&Death> {
        self.death.as_ref()
    }
}
