//! Typed attribute values
//!
//! Attributes are looked up by name but always hold one of a closed set of
//! value shapes, so comparisons in the logic evaluator can be checked
//! exhaustively.

use super::record::{EntryId, EntryKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute map owned by a single agent.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A clinical code (SNOMED-CT, RxNorm, LOINC, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Code {
    pub system: String,
    pub code: String,
    #[serde(default)]
    pub display: String,
}

impl Code {
    pub fn new(
        system: impl Into<String>,
        code: impl Into<String>,
        display: impl Into<String>,
    ) -> Self {
        Self {
            system: system.into(),
            code: code.into(),
            display: display.into(),
        }
    }

    /// Codes match on system and code; display text is informational.
    pub fn matches(&self, other: &Code) -> bool {
        self.system == other.system && self.code == other.code
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.system, self.code)?;
        if !self.display.is_empty() {
            write!(f, " ({})", self.display)?;
        }
        Ok(())
    }
}

/// Handle to an entry recorded on the agent's health record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRef {
    pub id: EntryId,
    pub kind: EntryKind,
    /// Primary code of the entry, kept here so predicates need not look it up.
    pub code: Code,
}

/// A dynamically named, statically shaped attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Code(Code),
    Entry(EntryRef),
    List(Vec<AttributeValue>),
}

impl AttributeValue {
    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Text(_) => "string",
            Self::Code(_) => "code",
            Self::Entry(_) => "entry",
            Self::List(_) => "list",
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The code carried by a `Code` or `Entry` value.
    pub fn as_code(&self) -> Option<&Code> {
        match self {
            Self::Code(code) => Some(code),
            Self::Entry(entry) => Some(&entry.code),
            _ => None,
        }
    }

    pub fn as_entry(&self) -> Option<&EntryRef> {
        match self {
            Self::Entry(entry) => Some(entry),
            _ => None,
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Code> for AttributeValue {
    fn from(value: Code) -> Self {
        Self::Code(value)
    }
}

impl From<EntryRef> for AttributeValue {
    fn from(value: EntryRef) -> Self {
        Self::Entry(value)
    }
}
