//! Typed comparison of attribute values

use super::LogicError;
use crate::agent::AttributeValue;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = "is nil")]
    IsNil,
    #[serde(rename = "is not nil")]
    IsNotNil,
}

impl Operator {
    fn is_equality(self) -> bool {
        matches!(self, Self::Equal | Self::NotEqual)
    }

    /// Apply to an ordering; `None` (NaN involved) only satisfies `!=`.
    fn holds(self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (Self::NotEqual, None) => true,
            (_, None) | (Self::IsNil | Self::IsNotNil, _) => false,
            (Self::LessThan, Some(o)) => o == Ordering::Less,
            (Self::LessOrEqual, Some(o)) => o != Ordering::Greater,
            (Self::Equal, Some(o)) => o == Ordering::Equal,
            (Self::GreaterOrEqual, Some(o)) => o != Ordering::Less,
            (Self::GreaterThan, Some(o)) => o == Ordering::Greater,
            (Self::NotEqual, Some(o)) => o != Ordering::Equal,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LessThan => "<",
            Self::LessOrEqual => "<=",
            Self::Equal => "==",
            Self::GreaterOrEqual => ">=",
            Self::GreaterThan => ">",
            Self::NotEqual => "!=",
            Self::IsNil => "is nil",
            Self::IsNotNil => "is not nil",
        })
    }
}

/// Compare `lhs operator rhs`.
///
/// Nil checks look only at `lhs`. Any other operator against an absent `lhs`
/// is false. Operands of different shapes are an error, as is ordering codes.
pub fn compare(
    lhs: Option<&AttributeValue>,
    operator: Operator,
    rhs: Option<&AttributeValue>,
) -> Result<bool, LogicError> {
    match operator {
        Operator::IsNil => return Ok(lhs.is_none()),
        Operator::IsNotNil => return Ok(lhs.is_some()),
        _ => {}
    }
    let Some(lhs) = lhs else {
        return Ok(false);
    };
    let rhs = rhs.ok_or(LogicError::MissingOperand { operator })?;

    let ordering = match (lhs, rhs) {
        (AttributeValue::Number(a), AttributeValue::Number(b)) => a.partial_cmp(b),
        (AttributeValue::Bool(a), AttributeValue::Bool(b)) => Some(a.cmp(b)),
        (AttributeValue::Text(a), AttributeValue::Text(b)) => Some(a.cmp(b)),
        (AttributeValue::Code(_) | AttributeValue::Entry(_), AttributeValue::Code(_) | AttributeValue::Entry(_)) => {
            if !operator.is_equality() {
                return Err(LogicError::UnsupportedOperator {
                    operator,
                    operand: "code",
                });
            }
            let same = match (lhs.as_code(), rhs.as_code()) {
                (Some(a), Some(b)) => a.matches(b),
                _ => false,
            };
            return Ok(same == (operator == Operator::Equal));
        }
        (AttributeValue::List(a), AttributeValue::List(b)) => {
            if !operator.is_equality() {
                return Err(LogicError::UnsupportedOperator {
                    operator,
                    operand: "list",
                });
            }
            return Ok((a == b) == (operator == Operator::Equal));
        }
        _ => {
            return Err(LogicError::TypeMismatch {
                lhs: lhs.type_name(),
                operator,
                rhs: rhs.type_name(),
            })
        }
    };
    Ok(operator.holds(ordering))
}
