//! Next-state selection
//!
//! A transition is chosen after a state falls through. Ordered forms are
//! first-declared-wins; weighted forms draw from the agent's own random
//! source so a seeded agent always takes the same path.

use crate::agent::{Agent, AttributeValue};
use crate::logic::{Logic, LogicError, PriorStates, Scope};
use crate::Timestamp;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransitionError {
    #[error("no conditional branch matched and no default was declared")]
    NoMatchingBranch,
    #[error("weight {weight} for {target} is not a non-negative number")]
    InvalidWeight { target: String, weight: f64 },
    #[error("weight attribute {attribute} holds a {found}, expected number")]
    WeightAttribute {
        attribute: String,
        found: &'static str,
    },
    #[error("every distributed target has zero weight")]
    NoSelectableTarget,
    #[error(transparent)]
    Logic(#[from] LogicError),
}

// ============================================================================
// Definitions
// ============================================================================

/// How much probability mass a distributed target receives.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawWeight")]
pub enum Weight {
    Fixed(f64),
    /// Read from a numeric attribute, falling back to `default` when unset.
    Attribute { attribute: String, default: f64 },
    /// Whatever the other entries leave unallocated.
    Remaining,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawWeight {
    Fixed(f64),
    Attribute { attribute: String, default: f64 },
    Keyword(WeightKeyword),
}

#[derive(Deserialize)]
enum WeightKeyword {
    #[serde(rename = "remaining")]
    Remaining,
}

impl From<RawWeight> for Weight {
    fn from(raw: RawWeight) -> Self {
        match raw {
            RawWeight::Fixed(weight) => Self::Fixed(weight),
            RawWeight::Attribute { attribute, default } => Self::Attribute { attribute, default },
            RawWeight::Keyword(WeightKeyword::Remaining) => Self::Remaining,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DistributedOption {
    #[serde(rename = "transition")]
    pub target: String,
    #[serde(rename = "distribution")]
    pub weight: Weight,
}

/// A branch without a condition always matches.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConditionalOption {
    #[serde(default)]
    pub condition: Option<Logic>,
    #[serde(rename = "transition")]
    pub target: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Direct(String),
    Distributed(Vec<DistributedOption>),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawComplexOption")]
pub struct ComplexOption {
    pub condition: Option<Logic>,
    pub outcome: Outcome,
}

#[derive(Deserialize)]
struct RawComplexOption {
    #[serde(default)]
    condition: Option<Logic>,
    #[serde(default)]
    transition: Option<String>,
    #[serde(default)]
    distributions: Option<Vec<DistributedOption>>,
}

impl TryFrom<RawComplexOption> for ComplexOption {
    type Error = String;

    fn try_from(raw: RawComplexOption) -> Result<Self, Self::Error> {
        let outcome = match (raw.transition, raw.distributions) {
            (Some(target), None) => Outcome::Direct(target),
            (None, Some(options)) => Outcome::Distributed(options),
            _ => {
                return Err(
                    "complex branch needs exactly one of transition or distributions".to_string(),
                )
            }
        };
        Ok(Self {
            condition: raw.condition,
            outcome,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Direct(String),
    Distributed(Vec<DistributedOption>),
    Conditional(Vec<ConditionalOption>),
    Complex(Vec<ComplexOption>),
}

/// The four mutually exclusive transition keys of a state definition.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct TransitionFields {
    #[serde(default)]
    direct_transition: Option<String>,
    #[serde(default)]
    distributed_transition: Option<Vec<DistributedOption>>,
    #[serde(default)]
    conditional_transition: Option<Vec<ConditionalOption>>,
    #[serde(default)]
    complex_transition: Option<Vec<ComplexOption>>,
}

impl TransitionFields {
    pub(crate) fn into_transition(self) -> Result<Option<Transition>, String> {
        let mut found = Vec::new();
        if let Some(target) = self.direct_transition {
            found.push(Transition::Direct(target));
        }
        if let Some(options) = self.distributed_transition {
            found.push(Transition::Distributed(options));
        }
        if let Some(options) = self.conditional_transition {
            found.push(Transition::Conditional(options));
        }
        if let Some(options) = self.complex_transition {
            found.push(Transition::Complex(options));
        }
        if found.len() > 1 {
            return Err("a state may declare only one transition".to_string());
        }
        let transition = found.pop();
        if let Some(transition) = &transition {
            transition.check()?;
        }
        Ok(transition)
    }
}

// ============================================================================
// Resolution
// ============================================================================

impl Transition {
    /// Every state name this transition can lead to.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Self::Direct(target) => vec![target.as_str()],
            Self::Distributed(options) => options.iter().map(|o| o.target.as_str()).collect(),
            Self::Conditional(options) => options.iter().map(|o| o.target.as_str()).collect(),
            Self::Complex(options) => options
                .iter()
                .flat_map(|o| match &o.outcome {
                    Outcome::Direct(target) => vec![target.as_str()],
                    Outcome::Distributed(options) => {
                        options.iter().map(|d| d.target.as_str()).collect()
                    }
                })
                .collect(),
        }
    }

    /// Structural checks that do not depend on any agent.
    fn check(&self) -> Result<(), String> {
        match self {
            Self::Direct(_) => Ok(()),
            Self::Distributed(options) => check_distribution(options),
            Self::Conditional(options) if options.is_empty() => {
                Err("conditional transition has no branches".to_string())
            }
            Self::Conditional(_) => Ok(()),
            Self::Complex(options) if options.is_empty() => {
                Err("complex transition has no branches".to_string())
            }
            Self::Complex(options) => options.iter().try_for_each(|o| match &o.outcome {
                Outcome::Direct(_) => Ok(()),
                Outcome::Distributed(options) => check_distribution(options),
            }),
        }
    }

    /// Pick the next state name for `agent` at `time`.
    pub fn resolve(
        &self,
        agent: &mut dyn Agent,
        time: Timestamp,
        history: &dyn PriorStates,
    ) -> Result<&str, TransitionError> {
        match self {
            Self::Direct(target) => Ok(target.as_str()),
            Self::Distributed(options) => pick_weighted(options, agent),
            Self::Conditional(options) => {
                for option in options {
                    if branch_matches(option.condition.as_ref(), agent, time, history)? {
                        return Ok(option.target.as_str());
                    }
                }
                Err(TransitionError::NoMatchingBranch)
            }
            Self::Complex(options) => {
                for option in options {
                    if branch_matches(option.condition.as_ref(), agent, time, history)? {
                        return match &option.outcome {
                            Outcome::Direct(target) => Ok(target.as_str()),
                            Outcome::Distributed(options) => pick_weighted(options, agent),
                        };
                    }
                }
                Err(TransitionError::NoMatchingBranch)
            }
        }
    }
}

fn branch_matches(
    condition: Option<&Logic>,
    agent: &dyn Agent,
    time: Timestamp,
    history: &dyn PriorStates,
) -> Result<bool, LogicError> {
    match condition {
        None => Ok(true),
        Some(logic) => logic.evaluate(&Scope::new(agent, time, history)),
    }
}

fn check_distribution(options: &[DistributedOption]) -> Result<(), String> {
    if options.is_empty() {
        return Err("distributed transition has no targets".to_string());
    }
    let mut remaining = 0;
    for option in options {
        match &option.weight {
            Weight::Fixed(w) | Weight::Attribute { default: w, .. } if !(w.is_finite() && *w >= 0.0) => {
                return Err(format!(
                    "weight {w} for {} is not a non-negative finite number",
                    option.target
                ));
            }
            Weight::Remaining => remaining += 1,
            _ => {}
        }
    }
    if remaining > 1 {
        return Err("only one distributed target may take the remaining weight".to_string());
    }
    Ok(())
}

fn weight_of(option: &DistributedOption, agent: &dyn Agent) -> Result<Option<f64>, TransitionError> {
    let weight = match &option.weight {
        Weight::Fixed(weight) => *weight,
        Weight::Attribute { attribute, default } => match agent.attribute(attribute) {
            None => *default,
            Some(AttributeValue::Number(weight)) => *weight,
            Some(other) => {
                return Err(TransitionError::WeightAttribute {
                    attribute: attribute.clone(),
                    found: other.type_name(),
                })
            }
        },
        Weight::Remaining => return Ok(None),
    };
    if weight.is_finite() && weight >= 0.0 {
        Ok(Some(weight))
    } else {
        Err(TransitionError::InvalidWeight {
            target: option.target.clone(),
            weight,
        })
    }
}

fn pick_weighted<'t>(
    options: &'t [DistributedOption],
    agent: &mut dyn Agent,
) -> Result<&'t str, TransitionError> {
    let resolved = options
        .iter()
        .map(|option| weight_of(option, &*agent))
        .collect::<Result<Vec<_>, _>>()?;
    let allocated: f64 = resolved.iter().flatten().sum();
    let remainder = (1.0 - allocated).max(0.0);
    let weights: Vec<f64> = resolved.iter().map(|w| w.unwrap_or(remainder)).collect();

    let index = agent
        .random()
        .weighted_choice(&weights)
        .map_err(|_| TransitionError::NoSelectableTarget)?;
    Ok(options[index].target.as_str())
}
