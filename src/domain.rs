use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// A raw event as delivered by the record source.
///
/// Descriptive fields are all nullable: the source coerces malformed or empty
/// cells to `None` instead of failing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent<A> {
    pub entity_id: String,
    pub name: Option<String>,
    pub animal_type: Option<String>,
    pub breed: Option<String>,
    pub color: Option<String>,
    pub timestamp: Option<NaiveDateTime>,
    pub attrs: A,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntakeAttrs {
    pub intake_type: Option<String>,
    pub condition: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeAttrs {
    pub outcome_type: Option<String>,
    pub outcome_subtype: Option<String>,
}

pub type IntakeEvent = RawEvent<IntakeAttrs>;
pub type OutcomeEvent = RawEvent<OutcomeAttrs>;

/// Both raw streams, in source order. The index of a record in its vector is
/// its record order.
#[derive(Debug, Clone, Default)]
pub struct RawBatch {
    pub intakes: Vec<IntakeEvent>,
    pub outcomes: Vec<OutcomeEvent>,
}

impl RawBatch {
    pub fn new(intakes: Vec<IntakeEvent>, outcomes: Vec<OutcomeEvent>) -> Self {
        Self { intakes, outcomes }
    }

    /// Number of distinct entity ids across both streams.
    pub fn distinct_entity_count(&self) -> usize {
        self.intakes
            .iter()
            .map(|e| e.entity_id.as_str())
            .chain(self.outcomes.iter().map(|e| e.entity_id.as_str()))
            .collect::<std::collections::BTreeSet<_>>()
            .len()
    }
}

/// The three categorical lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionKind {
    AnimalType,
    Breed,
    Color,
}

impl DimensionKind {
    pub const ALL: [DimensionKind; 3] = [
        DimensionKind::AnimalType,
        DimensionKind::Breed,
        DimensionKind::Color,
    ];

    /// Table name in the normalized store.
    pub fn table_name(&self) -> &'static str {
        match self {
            DimensionKind::AnimalType => "animal_types",
            DimensionKind::Breed => "breeds",
            DimensionKind::Color => "colors",
        }
    }
}

impl std::fmt::Display for DimensionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionRow {
    pub key: i64,
    pub value: String,
}

/// Canonical animal record, one per distinct `entity_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    pub name: Option<String>,
    pub animal_type_id: Option<i64>,
    pub breed_id: Option<i64>,
    pub color_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeEpisode {
    pub episode_id: i64,
    pub entity_id: String,
    pub intake_timestamp: NaiveDateTime,
    pub intake_type: Option<String>,
    pub condition: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeEpisode {
    pub episode_id: i64,
    pub entity_id: String,
    pub outcome_timestamp: NaiveDateTime,
    pub outcome_type: Option<String>,
    pub outcome_subtype: Option<String>,
    pub matched_intake_id: Option<i64>,
    pub matched_intake_timestamp: Option<NaiveDateTime>,
    pub days_in_care: Option<f64>,
}

/// A full read-back of the normalized tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizedModel {
    pub animal_types: Vec<DimensionRow>,
    pub breeds: Vec<DimensionRow>,
    pub colors: Vec<DimensionRow>,
    pub entities: Vec<Entity>,
    pub intake_episodes: Vec<IntakeEpisode>,
    pub outcome_episodes: Vec<OutcomeEpisode>,
}

impl NormalizedModel {
    pub fn dimension(&self, kind: DimensionKind) -> &[DimensionRow] {
        match kind {
            DimensionKind::AnimalType => &self.animal_types,
            DimensionKind::Breed => &self.breeds,
            DimensionKind::Color => &self.colors,
        }
    }

    /// SHA-256 over the canonical JSON form of every table.
    ///
    /// Two rebuilds from identical input must produce the same fingerprint.
    pub fn fingerprint(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intake(id: &str) -> IntakeEvent {
        RawEvent {
            entity_id: id.to_string(),
            name: None,
            animal_type: None,
            breed: None,
            color: None,
            timestamp: None,
            attrs: IntakeAttrs::default(),
        }
    }

    fn outcome(id: &str) -> OutcomeEvent {
        RawEvent {
            entity_id: id.to_string(),
            name: None,
            animal_type: None,
            breed: None,
            color: None,
            timestamp: None,
            attrs: OutcomeAttrs::default(),
        }
    }

    #[test]
    fn test_distinct_entity_count_spans_both_streams() {
        let batch = RawBatch::new(
            vec![intake("A1"), intake("A1"), intake("A2")],
            vec![outcome("A2"), outcome("A3")],
        );
        assert_eq!(batch.distinct_entity_count(), 3);
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let mut model = NormalizedModel::default();
        let empty = model.fingerprint().unwrap();
        assert_eq!(empty.len(), 64);

        model.animal_types.push(DimensionRow {
            key: 1,
            value: "Dog".to_string(),
        });
        assert_ne!(model.fingerprint().unwrap(), empty);
        assert_eq!(model.fingerprint().unwrap(), model.clone().fingerprint().unwrap());
    }
}
