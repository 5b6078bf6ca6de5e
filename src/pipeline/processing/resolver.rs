//! Entity resolution: merge intake and outcome descriptions into one record
//! per animal id.
//!
//! Resolution is a merge keyed by `entity_id` with per-field override rules,
//! never a union of whole rows. Every field is resolved independently:
//! the outcome stream wins when it carries a value, otherwise the intake
//! stream, otherwise null.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use tracing::debug;

use crate::domain::{Entity, RawBatch, RawEvent};
use crate::error::Result;
use crate::pipeline::processing::dimensions::Dimensions;

/// An entity whose descriptors are still raw strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedEntity {
    pub entity_id: String,
    pub name: Option<String>,
    pub animal_type: Option<String>,
    pub breed: Option<String>,
    pub color: Option<String>,
}

/// Latest non-null value seen for one field within one stream.
///
/// Ordering is `(timestamp, record order)` with null timestamps sorting
/// before every real one, so the chronologically last observation wins and
/// ties go to the later record.
#[derive(Debug, Clone, Default)]
struct Latest {
    value: Option<(Option<NaiveDateTime>, usize, String)>,
}

impl Latest {
    fn observe(&mut self, value: Option<&str>, ts: Option<NaiveDateTime>, order: usize) {
        let Some(value) = value else { return };
        let newer = match &self.value {
            None => true,
            Some((seen_ts, seen_order, _)) => (ts, order) >= (*seen_ts, *seen_order),
        };
        if newer {
            self.value = Some((ts, order, value.to_string()));
        }
    }

    fn into_value(self) -> Option<String> {
        self.value.map(|(_, _, v)| v)
    }
}

#[derive(Debug, Clone, Default)]
struct FieldSet {
    name: Latest,
    animal_type: Latest,
    breed: Latest,
    color: Latest,
}

impl FieldSet {
    fn observe<A>(&mut self, event: &RawEvent<A>, order: usize) {
        let ts = event.timestamp;
        self.name.observe(event.name.as_deref(), ts, order);
        self.animal_type.observe(event.animal_type.as_deref(), ts, order);
        self.breed.observe(event.breed.as_deref(), ts, order);
        self.color.observe(event.color.as_deref(), ts, order);
    }
}

#[derive(Debug, Default)]
struct Observations {
    intake: FieldSet,
    outcome: FieldSet,
}

fn prefer(outcome: Latest, intake: Latest) -> Option<String> {
    outcome.into_value().or_else(|| intake.into_value())
}

/// Produce exactly one resolved entity per distinct id in either stream,
/// keyed and ordered by id.
pub fn resolve_entities(batch: &RawBatch) -> BTreeMap<String, ResolvedEntity> {
    let mut observations: BTreeMap<String, Observations> = BTreeMap::new();

    for (order, event) in batch.intakes.iter().enumerate() {
        observations
            .entry(event.entity_id.clone())
            .or_default()
            .intake
            .observe(event, order);
    }
    for (order, event) in batch.outcomes.iter().enumerate() {
        observations
            .entry(event.entity_id.clone())
            .or_default()
            .outcome
            .observe(event, order);
    }

    let resolved: BTreeMap<String, ResolvedEntity> = observations
        .into_iter()
        .map(|(entity_id, obs)| {
            let Observations { intake, outcome } = obs;
            let entity = ResolvedEntity {
                entity_id: entity_id.clone(),
                name: prefer(outcome.name, intake.name),
                animal_type: prefer(outcome.animal_type, intake.animal_type),
                breed: prefer(outcome.breed, intake.breed),
                color: prefer(outcome.color, intake.color),
            };
            (entity_id, entity)
        })
        .collect();

    debug!(
        "Resolved {} entities from {} intake and {} outcome records",
        resolved.len(),
        batch.intakes.len(),
        batch.outcomes.len()
    );
    resolved
}

/// Swap descriptor strings for dimension keys.
///
/// A non-null descriptor that has no row in its dimension means the
/// dimensions were built from different input; that is a consistency error.
pub fn materialize_entities(
    resolved: &BTreeMap<String, ResolvedEntity>,
    dims: &Dimensions,
) -> Result<Vec<Entity>> {
    resolved
        .values()
        .map(|r| {
            Ok(Entity {
                entity_id: r.entity_id.clone(),
                name: r.name.clone(),
                animal_type_id: dims.animal_types.resolve(r.animal_type.as_deref())?,
                breed_id: dims.breeds.resolve(r.breed.as_deref())?,
                color_id: dims.colors.resolve(r.color.as_deref())?,
            })
        })
        .collect()
}
