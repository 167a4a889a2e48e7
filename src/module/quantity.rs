//! Sampled quantities shared by several state kinds
//!
//! Definitions describe numbers as an exact value, a uniform range or a
//! named distribution. Parsing validates the shape once so sampling never
//! has to.

use crate::agent::RandomSource;
use crate::time::TimeUnit;
use serde::Deserialize;
use std::collections::BTreeMap;

// ============================================================================
// Distributions
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum DistributionKind {
    Exact { value: f64 },
    Uniform { low: f64, high: f64 },
    Gaussian { mean: f64, standard_deviation: f64 },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawDistribution")]
pub struct Distribution {
    pub kind: DistributionKind,
    pub round: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum RawKind {
    Exact,
    Uniform,
    Gaussian,
}

#[derive(Deserialize)]
struct RawDistribution {
    kind: RawKind,
    #[serde(default)]
    parameters: BTreeMap<String, f64>,
    #[serde(default)]
    round: bool,
}

impl TryFrom<RawDistribution> for Distribution {
    type Error = String;

    fn try_from(raw: RawDistribution) -> Result<Self, Self::Error> {
        let param = |name: &str| {
            raw.parameters
                .get(name)
                .copied()
                .ok_or_else(|| format!("distribution is missing parameter `{name}`"))
        };
        let kind = match raw.kind {
            RawKind::Exact => DistributionKind::Exact {
                value: param("value")?,
            },
            RawKind::Uniform => {
                let (low, high) = (param("low")?, param("high")?);
                if low > high {
                    return Err(format!("uniform distribution has low {low} above high {high}"));
                }
                DistributionKind::Uniform { low, high }
            }
            RawKind::Gaussian => {
                let standard_deviation = param("standardDeviation")
                    .or_else(|_| param("standard_deviation"))?;
                if standard_deviation < 0.0 {
                    return Err("gaussian standard deviation is negative".to_string());
                }
                DistributionKind::Gaussian {
                    mean: param("mean")?,
                    standard_deviation,
                }
            }
        };
        Ok(Self {
            kind,
            round: raw.round,
        })
    }
}

impl Distribution {
    pub fn sample(&self, random: &mut RandomSource) -> f64 {
        let value = match self.kind {
            DistributionKind::Exact { value } => value,
            DistributionKind::Uniform { low, high } => random.uniform_between(low, high),
            DistributionKind::Gaussian {
                mean,
                standard_deviation,
            } => mean + standard_deviation * random.gaussian(),
        };
        if self.round {
            value.round()
        } else {
            value
        }
    }
}

// ============================================================================
// Amounts
// ============================================================================

/// A number drawn at processing time.
#[derive(Debug, Clone, PartialEq)]
pub enum Amount {
    Exact(f64),
    Range {
        low: f64,
        high: f64,
        decimals: Option<u32>,
    },
    Distribution(Distribution),
}

impl Amount {
    pub fn sample(&self, random: &mut RandomSource) -> f64 {
        match self {
            Self::Exact(value) => *value,
            Self::Range {
                low,
                high,
                decimals,
            } => {
                let value = random.uniform_between(*low, *high);
                match decimals {
                    Some(places) => {
                        let scale = 10f64.powi(i32::try_from(*places).unwrap_or(i32::MAX));
                        (value * scale).round() / scale
                    }
                    None => value,
                }
            }
            Self::Distribution(distribution) => distribution.sample(random),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExactField {
    quantity: f64,
    #[serde(default)]
    unit: Option<TimeUnit>,
}

#[derive(Debug, Deserialize)]
struct RangeField {
    low: f64,
    high: f64,
    #[serde(default)]
    unit: Option<TimeUnit>,
    #[serde(default)]
    decimals: Option<u32>,
}

/// The `exact` / `range` / `distribution` trio as it appears in definitions.
///
/// Flattened into raw state structs; at most one of the three may be set.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct AmountFields {
    #[serde(default)]
    exact: Option<ExactField>,
    #[serde(default)]
    range: Option<RangeField>,
    #[serde(default)]
    distribution: Option<Distribution>,
}

impl AmountFields {
    /// The configured amount and any unit attached to the `exact`/`range` object.
    pub(crate) fn resolve(self) -> Result<Option<(Amount, Option<TimeUnit>)>, String> {
        match (self.exact, self.range, self.distribution) {
            (None, None, None) => Ok(None),
            (Some(exact), None, None) => Ok(Some((Amount::Exact(exact.quantity), exact.unit))),
            (None, Some(range), None) => {
                if range.low > range.high {
                    return Err(format!(
                        "range has low {} above high {}",
                        range.low, range.high
                    ));
                }
                Ok(Some((
                    Amount::Range {
                        low: range.low,
                        high: range.high,
                        decimals: range.decimals,
                    },
                    range.unit,
                )))
            }
            (None, None, Some(distribution)) => Ok(Some((Amount::Distribution(distribution), None))),
            _ => Err("only one of exact, range or distribution may be given".to_string()),
        }
    }
}

// ============================================================================
// Durations
// ============================================================================

/// An amount of time, sampled in milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Duration {
    pub amount: Amount,
    pub unit: TimeUnit,
}

impl Duration {
    /// Resolve amount fields plus an optional outer `unit` into a duration.
    pub(crate) fn from_fields(
        fields: AmountFields,
        outer_unit: Option<TimeUnit>,
    ) -> Result<Option<Self>, String> {
        let Some((amount, inner_unit)) = fields.resolve()? else {
            return Ok(None);
        };
        let unit = inner_unit
            .or(outer_unit)
            .ok_or_else(|| "duration has no unit".to_string())?;
        Ok(Some(Self { amount, unit }))
    }

    /// Sampled length; negative draws clamp to zero.
    pub fn sample_millis(&self, random: &mut RandomSource) -> i64 {
        self.unit.to_millis(self.amount.sample(random)).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::DAY;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> AmountFields {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn exact_duration_uses_inner_unit() {
        let duration = Duration::from_fields(fields(json!({"exact": {"quantity": 10, "unit": "days"}})), None)
            .unwrap()
            .unwrap();
        assert_eq!(duration.sample_millis(&mut RandomSource::seeded(1)), 10 * DAY);
    }

    #[test]
    fn distribution_duration_needs_outer_unit() {
        let raw = json!({"distribution": {"kind": "EXACT", "parameters": {"value": 3}}});
        assert!(Duration::from_fields(fields(raw.clone()), None).is_err());
        let duration = Duration::from_fields(fields(raw), Some(TimeUnit::Weeks)).unwrap().unwrap();
        assert_eq!(duration.sample_millis(&mut RandomSource::seeded(1)), 21 * DAY);
    }

    #[test]
    fn range_stays_in_bounds() {
        let (amount, _) = fields(json!({"range": {"low": 2, "high": 5, "decimals": 1}}))
            .resolve()
            .unwrap()
            .unwrap();
        let mut random = RandomSource::seeded(3);
        for _ in 0..1_000 {
            let value = amount.sample(&mut random);
            assert!((2.0..=5.0).contains(&value), "{value}");
            assert!(((value * 10.0).round() - value * 10.0).abs() < 1e-9);
        }
    }

    #[test]
    fn conflicting_fields_rejected() {
        let both = fields(json!({"exact": {"quantity": 1}, "range": {"low": 0, "high": 1}}));
        assert!(both.resolve().is_err());
        let inverted = fields(json!({"range": {"low": 3, "high": 1}}));
        assert!(inverted.resolve().is_err());
    }

    #[test]
    fn gaussian_rounds() {
        let distribution: Distribution = serde_json::from_value(json!({
            "kind": "GAUSSIAN",
            "round": true,
            "parameters": {"mean": 50, "standardDeviation": 5}
        }))
        .unwrap();
        let mut random = RandomSource::seeded(11);
        for _ in 0..100 {
            let v = distribution.sample(&mut random);
            assert!((v - v.round()).abs() < f64::EPSILON);
        }
        let bad: Result<Distribution, _> =
            serde_json::from_value(json!({"kind": "UNIFORM", "parameters": {"low": 1}}));
        assert!(bad.is_err());
    }
}
