//! Boolean condition language
//!
//! Condition trees guard transitions and `Guard` states. Evaluation is pure:
//! it reads the agent, the clock and the module's state history and never
//! writes to any of them. Combinators evaluate every child so that counts
//! and errors do not depend on child order.

mod compare;

pub use compare::{compare, Operator};

use crate::agent::{Agent, AttributeValue, Code, EntryKind, GENDER, RACE, SOCIOECONOMIC_CATEGORY};
use crate::time::{self, TimeUnit};
use crate::Timestamp;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while evaluating a condition tree.
///
/// All of these indicate a malformed module, never a transient fault.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LogicError {
    #[error("cannot compare {lhs} {operator} {rhs}")]
    TypeMismatch {
        lhs: &'static str,
        operator: Operator,
        rhs: &'static str,
    },
    #[error("operator {operator} is not supported for {operand} values")]
    UnsupportedOperator {
        operator: Operator,
        operand: &'static str,
    },
    #[error("operator {operator} requires a value to compare against")]
    MissingOperand { operator: Operator },
    #[error("attribute {attribute} holds a {found}, expected {expected}")]
    AttributeType {
        attribute: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("{condition} needs either codes or referenced_by_attribute")]
    MissingTarget { condition: &'static str },
}

/// Read access to the state history of the module being evaluated.
pub trait PriorStates {
    /// Whether a state named `name` appears in the history, most recent
    /// first, before any state named `since` and exited after `exited_after`.
    fn had_prior_state(&self, name: &str, since: Option<&str>, exited_after: Option<Timestamp>)
        -> bool;
}

/// History for evaluations that happen outside any module.
pub struct NoHistory;

impl PriorStates for NoHistory {
    fn had_prior_state(&self, _: &str, _: Option<&str>, _: Option<Timestamp>) -> bool {
        false
    }
}

/// Everything a condition can look at.
pub struct Scope<'a> {
    pub agent: &'a dyn Agent,
    pub time: Timestamp,
    pub history: &'a dyn PriorStates,
}

impl<'a> Scope<'a> {
    pub fn new(agent: &'a dyn Agent, time: Timestamp, history: &'a dyn PriorStates) -> Self {
        Self {
            agent,
            time,
            history,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgeUnit {
    Years,
    Months,
}

/// Clinical record lookup shared by the `Active *` and `Observation` leaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordTarget {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codes: Vec<Code>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_by_attribute: Option<String>,
}

/// Window for `PriorState` expressed as a duration before now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub quantity: f64,
    pub unit: TimeUnit,
}

/// A condition tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "condition_type")]
pub enum Logic {
    And {
        conditions: Vec<Logic>,
    },
    Or {
        conditions: Vec<Logic>,
    },
    Not {
        condition: Box<Logic>,
    },
    #[serde(rename = "At Least")]
    AtLeast {
        minimum: usize,
        conditions: Vec<Logic>,
    },
    #[serde(rename = "At Most")]
    AtMost {
        maximum: usize,
        conditions: Vec<Logic>,
    },
    Gender {
        gender: String,
    },
    Age {
        operator: Operator,
        quantity: f64,
        unit: AgeUnit,
    },
    Date {
        operator: Operator,
        year: i32,
    },
    #[serde(rename = "Socioeconomic Status")]
    SocioeconomicStatus {
        category: String,
    },
    Race {
        race: String,
    },
    Symptom {
        symptom: String,
        operator: Operator,
        value: f64,
    },
    Attribute {
        attribute: String,
        operator: Operator,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<AttributeValue>,
    },
    #[serde(rename = "Vital Sign")]
    VitalSign {
        vital_sign: String,
        operator: Operator,
        value: f64,
    },
    #[serde(rename = "Active Condition")]
    ActiveCondition(RecordTarget),
    #[serde(rename = "Active Medication")]
    ActiveMedication(RecordTarget),
    #[serde(rename = "Active CarePlan")]
    ActiveCarePlan(RecordTarget),
    Observation {
        operator: Operator,
        #[serde(flatten)]
        target: RecordTarget,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<AttributeValue>,
    },
    PriorState {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        since: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        within: Option<Window>,
    },
    #[serde(rename = "True")]
    True,
    #[serde(rename = "False")]
    False,
}

impl Logic {
    pub fn evaluate(&self, scope: &Scope<'_>) -> Result<bool, LogicError> {
        match self {
            // ================================================================
            // Combinators
            // ================================================================
            Self::And { conditions } => Ok(evaluate_all(conditions, scope)?.iter().all(|b| *b)),
            Self::Or { conditions } => Ok(evaluate_all(conditions, scope)?.iter().any(|b| *b)),
            Self::Not { condition } => Ok(!condition.evaluate(scope)?),
            Self::AtLeast {
                minimum,
                conditions,
            } => Ok(count_true(conditions, scope)? >= *minimum),
            Self::AtMost {
                maximum,
                conditions,
            } => Ok(count_true(conditions, scope)? <= *maximum),
            Self::True => Ok(true),
            Self::False => Ok(false),

            // ================================================================
            // Demographics
            // ================================================================
            Self::Gender { gender } => Ok(text_attribute_is(scope, GENDER, gender)),
            Self::Race { race } => Ok(text_attribute_is(scope, RACE, race)),
            Self::SocioeconomicStatus { category } => {
                Ok(text_attribute_is(scope, SOCIOECONOMIC_CATEGORY, category))
            }
            Self::Age {
                operator,
                quantity,
                unit,
            } => {
                let birth = scope.agent.birth_time();
                let age = match unit {
                    AgeUnit::Years => time::years_between(birth, scope.time),
                    AgeUnit::Months => time::months_between(birth, scope.time),
                };
                #[allow(clippy::cast_precision_loss)]
                let age = AttributeValue::Number(age as f64);
                compare(Some(&age), *operator, Some(&AttributeValue::Number(*quantity)))
            }
            Self::Date { operator, year } => {
                let now = AttributeValue::Number(f64::from(time::year_of(scope.time)));
                compare(Some(&now), *operator, Some(&AttributeValue::Number(f64::from(*year))))
            }

            // ================================================================
            // Agent state
            // ================================================================
            Self::Symptom {
                symptom,
                operator,
                value,
            } => {
                let severity = AttributeValue::Number(scope.agent.symptom(symptom));
                compare(Some(&severity), *operator, Some(&AttributeValue::Number(*value)))
            }
            Self::Attribute {
                attribute,
                operator,
                value,
            } => compare(scope.agent.attribute(attribute), *operator, value.as_ref()),
            Self::VitalSign {
                vital_sign,
                operator,
                value,
            } => {
                let current = scope
                    .agent
                    .vital_sign(vital_sign, scope.time)
                    .map(AttributeValue::Number);
                compare(current.as_ref(), *operator, Some(&AttributeValue::Number(*value)))
            }

            // ================================================================
            // Health record
            // ================================================================
            Self::ActiveCondition(target) => {
                is_active(scope, target, EntryKind::Condition, "Active Condition")
            }
            Self::ActiveMedication(target) => {
                is_active(scope, target, EntryKind::Medication, "Active Medication")
            }
            Self::ActiveCarePlan(target) => {
                is_active(scope, target, EntryKind::CarePlan, "Active CarePlan")
            }
            Self::Observation {
                operator,
                target,
                value,
            } => {
                let latest = latest_observation(scope, target)?;
                compare(latest.as_ref(), *operator, value.as_ref())
            }

            // ================================================================
            // Module history
            // ================================================================
            Self::PriorState {
                name,
                since,
                within,
            } => {
                let exited_after = within
                    .as_ref()
                    .map(|w| scope.time.saturating_sub(w.unit.to_millis(w.quantity)));
                Ok(scope
                    .history
                    .had_prior_state(name, since.as_deref(), exited_after))
            }
        }
    }
}

fn evaluate_all(conditions: &[Logic], scope: &Scope<'_>) -> Result<Vec<bool>, LogicError> {
    conditions.iter().map(|c| c.evaluate(scope)).collect()
}

fn count_true(conditions: &[Logic], scope: &Scope<'_>) -> Result<usize, LogicError> {
    Ok(evaluate_all(conditions, scope)?.into_iter().filter(|b| *b).count())
}

fn text_attribute_is(scope: &Scope<'_>, attribute: &str, expected: &str) -> bool {
    scope
        .agent
        .attribute(attribute)
        .and_then(AttributeValue::as_text)
        .is_some_and(|value| value == expected)
}

/// Code of the entry an attribute points at, if the attribute is set.
fn referenced_code<'a>(scope: &Scope<'a>, attribute: &str) -> Result<Option<&'a Code>, LogicError> {
    match scope.agent.attribute(attribute) {
        None => Ok(None),
        Some(value) => value
            .as_code()
            .map(Some)
            .ok_or_else(|| LogicError::AttributeType {
                attribute: attribute.to_string(),
                expected: "entry",
                found: value.type_name(),
            }),
    }
}

fn is_active(
    scope: &Scope<'_>,
    target: &RecordTarget,
    kind: EntryKind,
    condition: &'static str,
) -> Result<bool, LogicError> {
    let record = scope.agent.record();
    if let Some(attribute) = &target.referenced_by_attribute {
        return Ok(referenced_code(scope, attribute)?.is_some_and(|code| record.is_active(kind, code)));
    }
    if target.codes.is_empty() {
        return Err(LogicError::MissingTarget { condition });
    }
    Ok(target.codes.iter().any(|code| record.is_active(kind, code)))
}

fn latest_observation(
    scope: &Scope<'_>,
    target: &RecordTarget,
) -> Result<Option<AttributeValue>, LogicError> {
    let record = scope.agent.record();
    if let Some(attribute) = &target.referenced_by_attribute {
        let Some(value) = scope.agent.attribute(attribute) else {
            return Ok(None);
        };
        let entry = value.as_entry().ok_or_else(|| LogicError::AttributeType {
            attribute: attribute.clone(),
            expected: "entry",
            found: value.type_name(),
        })?;
        return Ok(record.entry(entry.id).and_then(|e| e.value.clone()));
    }
    if target.codes.is_empty() {
        return Err(LogicError::MissingTarget {
            condition: "Observation",
        });
    }
    let latest = target
        .codes
        .iter()
        .filter_map(|code| record.latest(EntryKind::Observation, code))
        .max_by_key(|entry| (entry.start, entry.id));
    Ok(latest.and_then(|entry| entry.value.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{NewEntry, Person};
    use crate::time::{start_of_year, DAY};
    use serde_json::json;

    fn logic(value: serde_json::Value) -> Logic {
        serde_json::from_value(value).expect("valid logic")
    }

    fn eval(node: &Logic, person: &Person, time: Timestamp) -> Result<bool, LogicError> {
        node.evaluate(&Scope::new(person, time, &NoHistory))
    }

    fn attr(name: &str, operator: &str, value: serde_json::Value) -> Logic {
        logic(json!({"condition_type": "Attribute", "attribute": name, "operator": operator, "value": value}))
    }

    #[test]
    fn empty_combinators() {
        let person = Person::new(1, 0);
        assert!(eval(&logic(json!({"condition_type": "And", "conditions": []})), &person, 0).unwrap());
        assert!(!eval(&logic(json!({"condition_type": "Or", "conditions": []})), &person, 0).unwrap());
    }

    #[test]
    fn combinators_evaluate_every_child() {
        let person = Person::new(1, 0).with_attribute("flag", true);
        // A false first child must not hide the type error in the second.
        let node = logic(json!({
            "condition_type": "And",
            "conditions": [
                {"condition_type": "False"},
                {"condition_type": "Attribute", "attribute": "flag", "operator": ">", "value": 3}
            ]
        }));
        assert!(matches!(eval(&node, &person, 0), Err(LogicError::TypeMismatch { .. })));

        let node = logic(json!({
            "condition_type": "Or",
            "conditions": [
                {"condition_type": "True"},
                {"condition_type": "Attribute", "attribute": "flag", "operator": "==", "value": "yes"}
            ]
        }));
        assert!(eval(&node, &person, 0).is_err());
    }

    #[test]
    fn at_least_and_at_most_count() {
        let person = Person::new(1, 0);
        let children = json!([
            {"condition_type": "True"},
            {"condition_type": "False"},
            {"condition_type": "True"}
        ]);
        let at_least = |n: usize| logic(json!({"condition_type": "At Least", "minimum": n, "conditions": children}));
        let at_most = |n: usize| logic(json!({"condition_type": "At Most", "maximum": n, "conditions": children}));

        assert!(eval(&at_least(2), &person, 0).unwrap());
        assert!(!eval(&at_least(3), &person, 0).unwrap());
        assert!(eval(&at_most(2), &person, 0).unwrap());
        assert!(!eval(&at_most(1), &person, 0).unwrap());
    }

    #[test]
    fn not_inverts() {
        let person = Person::new(1, 0);
        let node = logic(json!({"condition_type": "Not", "condition": {"condition_type": "False"}}));
        assert!(eval(&node, &person, 0).unwrap());
    }

    #[test]
    fn demographics() {
        let person = Person::new(1, 0)
            .with_attribute(GENDER, "F")
            .with_attribute(RACE, "hispanic")
            .with_attribute(SOCIOECONOMIC_CATEGORY, "Low");

        assert!(eval(&logic(json!({"condition_type": "Gender", "gender": "F"})), &person, 0).unwrap());
        assert!(!eval(&logic(json!({"condition_type": "Gender", "gender": "M"})), &person, 0).unwrap());
        assert!(eval(&logic(json!({"condition_type": "Race", "race": "hispanic"})), &person, 0).unwrap());
        assert!(eval(
            &logic(json!({"condition_type": "Socioeconomic Status", "category": "Low"})),
            &person,
            0
        )
        .unwrap());
        // Missing attribute is simply false
        let blank = Person::new(2, 0);
        assert!(!eval(&logic(json!({"condition_type": "Gender", "gender": "F"})), &blank, 0).unwrap());
    }

    #[test]
    fn age_and_date() {
        let birth = start_of_year(1990);
        let person = Person::new(1, birth);
        let now = start_of_year(2020) + DAY;

        let age = |op: &str, q: f64, unit: &str| {
            logic(json!({"condition_type": "Age", "operator": op, "quantity": q, "unit": unit}))
        };
        assert!(eval(&age(">=", 30.0, "years"), &person, now).unwrap());
        assert!(!eval(&age(">", 30.0, "years"), &person, now).unwrap());
        assert!(eval(&age("==", 360.0, "months"), &person, now).unwrap());

        let date = logic(json!({"condition_type": "Date", "operator": "<", "year": 2021}));
        assert!(eval(&date, &person, now).unwrap());
    }

    #[test]
    fn attribute_comparisons() {
        let person = Person::new(1, 0)
            .with_attribute("count", 3.0)
            .with_attribute("name", "bob")
            .with_attribute("code", Code::new("SNOMED-CT", "1", ""));

        assert!(eval(&attr("count", ">", json!(2)), &person, 0).unwrap());
        assert!(eval(&attr("count", "<=", json!(3)), &person, 0).unwrap());
        assert!(!eval(&attr("count", "!=", json!(3)), &person, 0).unwrap());
        assert!(eval(&attr("name", "==", json!("bob")), &person, 0).unwrap());
        assert!(eval(
            &attr("code", "==", json!({"system": "SNOMED-CT", "code": "1"})),
            &person,
            0
        )
        .unwrap());
        assert!(matches!(
            eval(&attr("code", "<", json!({"system": "SNOMED-CT", "code": "1"})), &person, 0),
            Err(LogicError::UnsupportedOperator { .. })
        ));
        assert!(matches!(
            eval(&attr("count", "==", json!("3")), &person, 0),
            Err(LogicError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn nil_checks_only_look_at_the_attribute() {
        let person = Person::new(1, 0).with_attribute("set", 1.0);
        let nil = |name: &str, op: &str| logic(json!({"condition_type": "Attribute", "attribute": name, "operator": op}));

        assert!(eval(&nil("missing", "is nil"), &person, 0).unwrap());
        assert!(!eval(&nil("set", "is nil"), &person, 0).unwrap());
        assert!(eval(&nil("set", "is not nil"), &person, 0).unwrap());
        // Ordering against an unset attribute is false, not an error
        assert!(!eval(&attr("missing", ">", json!(1)), &person, 0).unwrap());
    }

    #[test]
    fn symptom_and_vital_sign() {
        let mut person = Person::new(1, 0).with_vital_sign("Systolic Blood Pressure", 145.0);
        person.set_symptom("Flu", "Fever", 0, 60.0);

        let symptom = logic(json!({"condition_type": "Symptom", "symptom": "Fever", "operator": ">=", "value": 50}));
        assert!(eval(&symptom, &person, 0).unwrap());

        let vital = logic(json!({
            "condition_type": "Vital Sign",
            "vital_sign": "Systolic Blood Pressure",
            "operator": ">",
            "value": 140
        }));
        assert!(eval(&vital, &person, 0).unwrap());

        let missing = logic(json!({"condition_type": "Vital Sign", "vital_sign": "BMI", "operator": ">", "value": 30}));
        assert!(!eval(&missing, &person, 0).unwrap());
    }

    #[test]
    fn record_queries() {
        let diabetes = Code::new("SNOMED-CT", "44054006", "Diabetes");
        let a1c = Code::new("LOINC", "4548-4", "Hemoglobin A1c");
        let mut person = Person::new(1, 0);
        let condition = person
            .record_mut()
            .record(NewEntry::new(EntryKind::Condition, "m", "Onset", 0, vec![diabetes.clone()]))
            .reference();
        person.set_attribute("diabetes", condition.into());
        let reading = person
            .record_mut()
            .record(NewEntry::new(EntryKind::Observation, "m", "A1c", 10, vec![a1c.clone()]));
        reading.value = Some(AttributeValue::Number(7.5));
        let reading = reading.reference();
        person.set_attribute("a1c", reading.into());

        let by_code = logic(json!({"condition_type": "Active Condition", "codes": [diabetes]}));
        let by_attribute = logic(json!({"condition_type": "Active Condition", "referenced_by_attribute": "diabetes"}));
        assert!(eval(&by_code, &person, 20).unwrap());
        assert!(eval(&by_attribute, &person, 20).unwrap());

        let medication = logic(json!({"condition_type": "Active Medication", "codes": [diabetes]}));
        assert!(!eval(&medication, &person, 20).unwrap());

        let observation = logic(json!({"condition_type": "Observation", "codes": [a1c], "operator": ">", "value": 6.5}));
        assert!(eval(&observation, &person, 20).unwrap());

        let referenced = logic(json!({"condition_type": "Observation", "referenced_by_attribute": "a1c", "operator": "<", "value": 8}));
        assert!(eval(&referenced, &person, 20).unwrap());
        person.set_attribute("a1c", AttributeValue::Code(a1c.clone()));
        assert!(matches!(
            eval(&referenced, &person, 20),
            Err(LogicError::AttributeType { expected: "entry", found: "code", .. })
        ));

        let untargeted = logic(json!({"condition_type": "Active CarePlan"}));
        assert!(matches!(
            eval(&untargeted, &person, 20),
            Err(LogicError::MissingTarget { .. })
        ));
    }

    #[test]
    fn prior_state_defers_to_history() {
        struct Seen;
        impl PriorStates for Seen {
            fn had_prior_state(&self, name: &str, since: Option<&str>, after: Option<Timestamp>) -> bool {
                name == "Visited" && since.is_none() && after.map_or(true, |t| t < 100)
            }
        }
        let person = Person::new(1, 0);
        let node = logic(json!({"condition_type": "PriorState", "name": "Visited"}));
        assert!(node.evaluate(&Scope::new(&person, 0, &Seen)).unwrap());

        let windowed = logic(json!({
            "condition_type": "PriorState",
            "name": "Visited",
            "within": {"quantity": 1, "unit": "days"}
        }));
        assert!(!windowed.evaluate(&Scope::new(&person, 10 * DAY, &Seen)).unwrap());
        assert!(!node.evaluate(&Scope::new(&person, 0, &NoHistory)).unwrap());
    }
}
