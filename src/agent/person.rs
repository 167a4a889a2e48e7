//! In-process agent used by the driver and tests

use super::{Agent, AttributeValue, Attributes, Code, HealthRecord, RandomSource};
use crate::Timestamp;
use std::collections::BTreeMap;

/// A simulated individual with a seeded random source.
#[derive(Debug, Clone)]
pub struct Person {
    id: String,
    birth: Timestamp,
    attributes: Attributes,
    random: RandomSource,
    record: HealthRecord,
    /// symptom -> cause -> latest severity
    symptoms: BTreeMap<String, BTreeMap<String, f64>>,
    vital_signs: BTreeMap<String, f64>,
}

impl Person {
    pub fn new(seed: u64, birth: Timestamp) -> Self {
        let mut random = RandomSource::seeded(seed);
        let id = random.uuid().to_string();
        Self {
            id,
            birth,
            attributes: Attributes::new(),
            random,
            record: HealthRecord::new(),
            symptoms: BTreeMap::new(),
            vital_signs: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, name: &str, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn with_vital_sign(mut self, name: &str, value: f64) -> Self {
        self.set_vital_sign(name, value);
        self
    }

    pub fn set_vital_sign(&mut self, name: &str, value: f64) {
        self.vital_signs.insert(name.to_string(), value);
    }

    pub fn death_time(&self) -> Option<Timestamp> {
        self.record.death().map(|d| d.time)
    }
}

impl Agent for Person {
    fn id(&self) -> &str {
        &self.id
    }

    fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    fn random(&mut self) -> &mut RandomSource {
        &mut self.random
    }

    fn birth_time(&self) -> Timestamp {
        self.birth
    }

    fn alive(&self, time: Timestamp) -> bool {
        self.death_time().is_none_or(|death| death > time)
    }

    fn vital_sign(&self, name: &str, _time: Timestamp) -> Option<f64> {
        self.vital_signs.get(name).copied()
    }

    fn record(&self) -> &HealthRecord {
        &self.record
    }

    fn record_mut(&mut self) -> &mut HealthRecord {
        &mut self.record
    }

    fn symptom(&self, symptom: &str) -> f64 {
        self.symptoms
            .get(symptom)
            .map_or(0.0, |causes| causes.values().copied().fold(0.0, f64::max))
    }

    fn set_symptom(&mut self, cause: &str, symptom: &str, _time: Timestamp, value: f64) {
        self.symptoms
            .entry(symptom.to_string())
            .or_default()
            .insert(cause.to_string(), value);
    }

    fn record_death(&mut self, time: Timestamp, reason: Option<Code>) {
        self.record.record_death(time, reason);
    }
}
