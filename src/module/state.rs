//! State templates
//!
//! A [`StateTemplate`] is one node of a module graph. Templates are
//! immutable and shared by every agent; per-agent progress lives in
//! `engine::StateInstance`.

use super::quantity::{Amount, AmountFields, Duration};
use super::transition::Transition;
use crate::agent::{AttributeValue, Code};
use crate::logic::Logic;
use crate::time::TimeUnit;
use serde::Deserialize;

/// An immutable workflow node.
#[derive(Debug)]
pub struct StateTemplate {
    module: String,
    module_name: String,
    name: String,
    kind: StateKind,
    transition: Option<Transition>,
}

impl StateTemplate {
    pub(crate) fn new(
        module: &str,
        module_name: &str,
        name: &str,
        kind: StateKind,
        transition: Option<Transition>,
    ) -> Self {
        Self {
            module: module.to_string(),
            module_name: module_name.to_string(),
            name: name.to_string(),
            kind,
            transition,
        }
    }

    /// Registry key of the owning module.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Display name of the owning module.
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &StateKind {
        &self.kind
    }

    pub fn transition(&self) -> Option<&Transition> {
        self.transition.as_ref()
    }
}

// ============================================================================
// Kinds
// ============================================================================

/// The closed set of state kinds, tagged by `type` in definitions.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum StateKind {
    Initial,
    Simple,
    Terminal,
    Delay(Delay),
    Guard { allow: Logic },
    SetAttribute(SetAttribute),
    Counter(Counter),
    Symptom(Symptom),
    Encounter(Encounter),
    EncounterEnd(EncounterEnd),
    ConditionOnset(Onset),
    ConditionEnd(EndTarget),
    AllergyOnset(Onset),
    AllergyEnd(EndTarget),
    MedicationOrder(MedicationOrder),
    MedicationEnd(EndTarget),
    CarePlanStart(CarePlanStart),
    CarePlanEnd(EndTarget),
    Procedure(Procedure),
    Observation(Observation),
    MultiObservation(ObservationGroup),
    DiagnosticReport(ObservationGroup),
    Immunization(Immunization),
    Death(Death),
    CallSubmodule { submodule: String },
}

impl StateKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Initial => "Initial",
            Self::Simple => "Simple",
            Self::Terminal => "Terminal",
            Self::Delay(_) => "Delay",
            Self::Guard { .. } => "Guard",
            Self::SetAttribute(_) => "SetAttribute",
            Self::Counter(_) => "Counter",
            Self::Symptom(_) => "Symptom",
            Self::Encounter(_) => "Encounter",
            Self::EncounterEnd(_) => "EncounterEnd",
            Self::ConditionOnset(_) => "ConditionOnset",
            Self::ConditionEnd(_) => "ConditionEnd",
            Self::AllergyOnset(_) => "AllergyOnset",
            Self::AllergyEnd(_) => "AllergyEnd",
            Self::MedicationOrder(_) => "MedicationOrder",
            Self::MedicationEnd(_) => "MedicationEnd",
            Self::CarePlanStart(_) => "CarePlanStart",
            Self::CarePlanEnd(_) => "CarePlanEnd",
            Self::Procedure(_) => "Procedure",
            Self::Observation(_) => "Observation",
            Self::MultiObservation(_) => "MultiObservation",
            Self::DiagnosticReport(_) => "DiagnosticReport",
            Self::Immunization(_) => "Immunization",
            Self::Death(_) => "Death",
            Self::CallSubmodule { .. } => "CallSubmodule",
        }
    }

    /// Kinds allowed to have no outgoing transition.
    pub fn may_end_module(&self) -> bool {
        matches!(self, Self::Terminal | Self::Death(_))
    }

    /// Cross-field checks serde cannot express.
    pub(crate) fn validate(&self) -> Result<(), String> {
        match self {
            Self::ConditionOnset(onset) | Self::AllergyOnset(onset) if onset.codes.is_empty() => {
                Err("onset needs at least one code".to_string())
            }
            Self::ConditionEnd(target)
            | Self::AllergyEnd(target)
            | Self::MedicationEnd(target)
            | Self::CarePlanEnd(target)
                if target.is_empty() =>
            {
                Err("end state needs codes, an onset state or referenced_by_attribute".to_string())
            }
            Self::MedicationOrder(MedicationOrder { codes, .. })
            | Self::CarePlanStart(CarePlanStart { codes, .. })
            | Self::Procedure(Procedure { codes, .. })
            | Self::Immunization(Immunization { codes })
                if codes.is_empty() =>
            {
                Err(format!("{} needs at least one code", self.type_name()))
            }
            Self::Counter(counter) if counter.amount < 0.0 => {
                Err("counter amount must not be negative".to_string())
            }
            Self::CallSubmodule { submodule } if submodule.is_empty() => {
                Err("CallSubmodule needs a submodule path".to_string())
            }
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Timing
// ============================================================================

/// Waits a sampled amount of time measured from first entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawTimed")]
pub struct Delay {
    pub duration: Duration,
}

#[derive(Deserialize)]
struct RawTimed {
    #[serde(flatten)]
    amount: AmountFields,
    #[serde(default)]
    unit: Option<TimeUnit>,
}

impl TryFrom<RawTimed> for Delay {
    type Error = String;

    fn try_from(raw: RawTimed) -> Result<Self, Self::Error> {
        let duration = Duration::from_fields(raw.amount, raw.unit)?
            .ok_or_else(|| "Delay needs exact, range or distribution".to_string())?;
        Ok(Self { duration })
    }
}

// ============================================================================
// Attributes and symptoms
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeSource {
    /// Remove the attribute.
    Clear,
    Value(AttributeValue),
    Sampled(Amount),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawSetAttribute")]
pub struct SetAttribute {
    pub attribute: String,
    pub value: AttributeSource,
}

#[derive(Deserialize)]
struct RawSetAttribute {
    attribute: String,
    #[serde(default)]
    value: Option<AttributeValue>,
    #[serde(flatten)]
    amount: AmountFields,
}

impl TryFrom<RawSetAttribute> for SetAttribute {
    type Error = String;

    fn try_from(raw: RawSetAttribute) -> Result<Self, Self::Error> {
        let sampled = raw.amount.resolve()?;
        let value = match (raw.value, sampled) {
            (None, None) => AttributeSource::Clear,
            (Some(value), None) => AttributeSource::Value(value),
            (None, Some((amount, _))) => AttributeSource::Sampled(amount),
            (Some(_), Some(_)) => {
                return Err("SetAttribute takes either a value or a sampled amount".to_string())
            }
        };
        Ok(Self {
            attribute: raw.attribute,
            value,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterAction {
    Increment,
    Decrement,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Counter {
    pub attribute: String,
    pub action: CounterAction,
    #[serde(default = "one")]
    pub amount: f64,
}

fn one() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawSymptom")]
pub struct Symptom {
    pub symptom: String,
    /// Defaults to the owning module's name.
    pub cause: Option<String>,
    pub probability: f64,
    pub severity: Amount,
}

#[derive(Deserialize)]
struct RawSymptom {
    symptom: String,
    #[serde(default)]
    cause: Option<String>,
    #[serde(default)]
    probability: Option<f64>,
    #[serde(flatten)]
    amount: AmountFields,
}

impl TryFrom<RawSymptom> for Symptom {
    type Error = String;

    fn try_from(raw: RawSymptom) -> Result<Self, Self::Error> {
        let probability = match raw.probability {
            Some(p) if (0.0..=1.0).contains(&p) => p,
            _ => 1.0,
        };
        let severity = raw
            .amount
            .resolve()?
            .map_or(Amount::Exact(0.0), |(amount, _)| amount);
        Ok(Self {
            symptom: raw.symptom,
            cause: raw.cause,
            probability,
            severity,
        })
    }
}

// ============================================================================
// Encounters
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct Encounter {
    #[serde(default)]
    pub wellness: bool,
    #[serde(default)]
    pub encounter_class: Option<String>,
    #[serde(default)]
    pub codes: Vec<Code>,
    /// Attribute or prior state naming the condition that caused the visit.
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EncounterEnd {
    #[serde(default)]
    pub discharge_disposition: Option<Code>,
}

// ============================================================================
// Clinical entries
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct Onset {
    pub codes: Vec<Code>,
    #[serde(default)]
    pub assign_to_attribute: Option<String>,
    /// Encounter state that diagnoses this onset, if not diagnosed right away.
    #[serde(default)]
    pub target_encounter: Option<String>,
}

/// Which previously recorded entry an end state stops.
#[derive(Debug, Clone, Deserialize)]
pub struct EndTarget {
    #[serde(default)]
    pub codes: Vec<Code>,
    #[serde(
        default,
        alias = "condition_onset",
        alias = "allergy_onset",
        alias = "medication_order",
        alias = "careplan"
    )]
    pub state: Option<String>,
    #[serde(default)]
    pub referenced_by_attribute: Option<String>,
}

impl EndTarget {
    fn is_empty(&self) -> bool {
        self.codes.is_empty() && self.state.is_none() && self.referenced_by_attribute.is_none()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MedicationOrder {
    pub codes: Vec<Code>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub assign_to_attribute: Option<String>,
    #[serde(default)]
    pub chronic: bool,
    #[serde(default)]
    pub administration: bool,
    #[serde(default)]
    pub prescription: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CarePlanStart {
    pub codes: Vec<Code>,
    #[serde(default)]
    pub activities: Vec<Code>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub assign_to_attribute: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DurationRange {
    pub low: f64,
    pub high: f64,
    pub unit: TimeUnit,
}

impl DurationRange {
    fn duration(&self) -> Duration {
        Duration {
            amount: Amount::Range {
                low: self.low,
                high: self.high,
                decimals: None,
            },
            unit: self.unit,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Procedure {
    pub codes: Vec<Code>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub assign_to_attribute: Option<String>,
    #[serde(default)]
    duration: Option<DurationRange>,
}

impl Procedure {
    pub fn duration(&self) -> Option<Duration> {
        self.duration.as_ref().map(DurationRange::duration)
    }
}

/// Where an observation's value comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservationValue {
    None,
    Sampled(Amount),
    Attribute(String),
    VitalSign(String),
    Code(Code),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawObservation")]
pub struct Observation {
    pub codes: Vec<Code>,
    pub unit: Option<String>,
    pub category: Option<String>,
    pub value: ObservationValue,
}

#[derive(Deserialize)]
struct RawObservation {
    codes: Vec<Code>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    attribute: Option<String>,
    #[serde(default)]
    vital_sign: Option<String>,
    #[serde(default)]
    value_code: Option<Code>,
    #[serde(flatten)]
    amount: AmountFields,
}

impl TryFrom<RawObservation> for Observation {
    type Error = String;

    fn try_from(raw: RawObservation) -> Result<Self, Self::Error> {
        if raw.codes.is_empty() {
            return Err("Observation needs at least one code".to_string());
        }
        let sampled = raw.amount.resolve()?.map(|(amount, _)| amount);
        let mut sources = Vec::new();
        if let Some(amount) = sampled {
            sources.push(ObservationValue::Sampled(amount));
        }
        if let Some(attribute) = raw.attribute {
            sources.push(ObservationValue::Attribute(attribute));
        }
        if let Some(vital_sign) = raw.vital_sign {
            sources.push(ObservationValue::VitalSign(vital_sign));
        }
        if let Some(code) = raw.value_code {
            sources.push(ObservationValue::Code(code));
        }
        if sources.len() > 1 {
            return Err("Observation takes a single value source".to_string());
        }
        Ok(Self {
            codes: raw.codes,
            unit: raw.unit,
            category: raw.category,
            value: sources.pop().unwrap_or(ObservationValue::None),
        })
    }
}

/// Child observations recorded together under one grouping entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservationGroup {
    pub codes: Vec<Code>,
    #[serde(default)]
    pub category: Option<String>,
    pub observations: Vec<Observation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Immunization {
    pub codes: Vec<Code>,
}

// ============================================================================
// Death
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawDeath")]
pub struct Death {
    pub codes: Vec<Code>,
    pub condition_onset: Option<String>,
    pub referenced_by_attribute: Option<String>,
    /// Time until death; immediate when absent.
    pub delay: Option<Duration>,
}

#[derive(Deserialize)]
struct RawDeath {
    #[serde(default)]
    codes: Vec<Code>,
    #[serde(default)]
    condition_onset: Option<String>,
    #[serde(default)]
    referenced_by_attribute: Option<String>,
    #[serde(default)]
    unit: Option<TimeUnit>,
    #[serde(flatten)]
    amount: AmountFields,
}

impl TryFrom<RawDeath> for Death {
    type Error = String;

    fn try_from(raw: RawDeath) -> Result<Self, Self::Error> {
        Ok(Self {
            delay: Duration::from_fields(raw.amount, raw.unit)?,
            codes: raw.codes,
            condition_onset: raw.condition_onset,
            referenced_by_attribute: raw.referenced_by_attribute,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kind(value: serde_json::Value) -> Result<StateKind, String> {
        serde_json::from_value::<StateKind>(value)
            .map_err(|e| e.to_string())
            .and_then(|k| k.validate().map(|()| k))
    }

    #[test]
    fn parses_kinds_ignoring_transition_keys() {
        let initial = kind(json!({"type": "Initial", "direct_transition": "Next"})).unwrap();
        assert!(matches!(initial, StateKind::Initial));

        let delay = kind(json!({"type": "Delay", "exact": {"quantity": 3, "unit": "days"}})).unwrap();
        assert!(matches!(delay, StateKind::Delay(_)));

        let guard = kind(json!({"type": "Guard", "allow": {"condition_type": "True"}})).unwrap();
        assert!(matches!(guard, StateKind::Guard { .. }));

        let call = kind(json!({"type": "CallSubmodule", "submodule": "medications/statin"})).unwrap();
        assert!(matches!(call, StateKind::CallSubmodule { ref submodule } if submodule == "medications/statin"));
    }

    #[test]
    fn set_attribute_sources() {
        let StateKind::SetAttribute(set) =
            kind(json!({"type": "SetAttribute", "attribute": "smoker", "value": true})).unwrap()
        else {
            panic!("expected SetAttribute");
        };
        assert_eq!(set.value, AttributeSource::Value(AttributeValue::Bool(true)));

        let StateKind::SetAttribute(clear) = kind(json!({"type": "SetAttribute", "attribute": "smoker"})).unwrap()
        else {
            panic!("expected SetAttribute");
        };
        assert_eq!(clear.value, AttributeSource::Clear);

        assert!(kind(json!({
            "type": "SetAttribute",
            "attribute": "x",
            "value": 1,
            "range": {"low": 0, "high": 1}
        }))
        .is_err());
    }

    #[test]
    fn symptom_probability_clamps_to_one() {
        let StateKind::Symptom(symptom) = kind(json!({
            "type": "Symptom",
            "symptom": "Cough",
            "probability": 1.5,
            "range": {"low": 10, "high": 20}
        }))
        .unwrap() else {
            panic!("expected Symptom");
        };
        assert!((symptom.probability - 1.0).abs() < f64::EPSILON);
        assert!(symptom.cause.is_none());
    }

    #[test]
    fn end_targets_accept_kind_specific_keys() {
        let StateKind::ConditionEnd(end) =
            kind(json!({"type": "ConditionEnd", "condition_onset": "Diabetes"})).unwrap()
        else {
            panic!("expected ConditionEnd");
        };
        assert_eq!(end.state.as_deref(), Some("Diabetes"));
        assert!(kind(json!({"type": "MedicationEnd"})).is_err());
    }

    #[test]
    fn clinical_kinds_need_codes() {
        assert!(kind(json!({"type": "ConditionOnset", "codes": []})).is_err());
        assert!(kind(json!({"type": "Immunization", "codes": []})).is_err());
        assert!(kind(json!({"type": "Observation", "codes": [], "exact": {"quantity": 1}})).is_err());
        assert!(kind(json!({"type": "Delay"})).is_err());
        assert!(kind(json!({"type": "NotAKind"})).is_err());
    }

    #[test]
    fn death_delay_is_optional() {
        let StateKind::Death(now) = kind(json!({"type": "Death"})).unwrap() else {
            panic!("expected Death");
        };
        assert!(now.delay.is_none());
        let StateKind::Death(later) =
            kind(json!({"type": "Death", "range": {"low": 1, "high": 2, "unit": "years"}})).unwrap()
        else {
            panic!("expected Death");
        };
        assert!(later.delay.is_some());
    }
}
