//! The agent contract the engine runs against
//!
//! The engine never sees a concrete person type. It reads and writes
//! attributes, draws randomness, records onto a health record and asks
//! whether the agent is alive, all through [`Agent`].

mod person;
mod random;
pub mod record;
mod value;

pub use person::Person;
pub use random::RandomSource;
pub use record::{Entry, EntryId, EntryKind, HealthRecord, NewEntry};
pub use value::{AttributeValue, Attributes, Code, EntryRef};

use crate::Timestamp;

/// Attribute holding the agent's gender (`"M"` / `"F"`).
pub const GENDER: &str = "gender";
/// Attribute holding the agent's race.
pub const RACE: &str = "race";
/// Attribute holding the agent's socioeconomic category (`"High"`, `"Middle"`, `"Low"`).
pub const SOCIOECONOMIC_CATEGORY: &str = "socioeconomic_category";

/// Everything the engine needs from a simulated individual.
///
/// Implementations are owned by exactly one thread at a time; the engine
/// never shares an agent between executors.
pub trait Agent {
    fn id(&self) -> &str;

    fn attributes(&self) -> &Attributes;

    fn attributes_mut(&mut self) -> &mut Attributes;

    fn random(&mut self) -> &mut RandomSource;

    fn birth_time(&self) -> Timestamp;

    fn alive(&self, time: Timestamp) -> bool;

    fn vital_sign(&self, name: &str, time: Timestamp) -> Option<f64>;

    fn record(&self) -> &HealthRecord;

    fn record_mut(&mut self) -> &mut HealthRecord;

    /// Highest severity of `symptom` across all causes, zero if never recorded.
    fn symptom(&self, symptom: &str) -> f64;

    fn set_symptom(&mut self, cause: &str, symptom: &str, time: Timestamp, value: f64);

    fn record_death(&mut self, time: Timestamp, reason: Option<Code>);

    fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes().get(name)
    }

    fn set_attribute(&mut self, name: &str, value: AttributeValue) {
        self.attributes_mut().insert(name.to_string(), value);
    }

    fn remove_attribute(&mut self, name: &str) -> Option<AttributeValue> {
        self.attributes_mut().remove(name)
    }
}
