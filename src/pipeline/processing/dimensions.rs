use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{DimensionKind, DimensionRow, RawBatch, RawEvent};
use crate::error::{PipelineError, Result};

/// Distinct values of one categorical field with their surrogate keys.
///
/// Keys are assigned 1..=n in lexicographic order of the values, so a table
/// built from the same input always carries the same keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DimensionTable {
    kind: Option<DimensionKind>,
    keys: BTreeMap<String, i64>,
}

impl DimensionTable {
    pub fn from_values<'a, I>(kind: DimensionKind, values: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let distinct: BTreeSet<&str> = values.into_iter().collect();
        let keys = distinct
            .into_iter()
            .enumerate()
            .map(|(i, value)| (value.to_string(), i as i64 + 1))
            .collect();
        Self {
            kind: Some(kind),
            keys,
        }
    }

    /// Rehydrate a table from rows read back out of a store.
    pub fn from_rows(kind: DimensionKind, rows: &[DimensionRow]) -> Self {
        let keys = rows.iter().map(|r| (r.value.clone(), r.key)).collect();
        Self {
            kind: Some(kind),
            keys,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn key_of(&self, value: &str) -> Option<i64> {
        self.keys.get(value).copied()
    }

    /// Resolve an optional value to its key. A null value resolves to null;
    /// a value missing from the table is a consistency error.
    pub fn resolve(&self, value: Option<&str>) -> Result<Option<i64>> {
        match value {
            None => Ok(None),
            Some(v) => self.key_of(v).map(Some).ok_or_else(|| {
                let table = self.kind.map(|k| k.table_name()).unwrap_or("dimension");
                PipelineError::consistency(table, v)
            }),
        }
    }

    /// Rows ordered by key.
    pub fn rows(&self) -> Vec<DimensionRow> {
        let mut rows: Vec<DimensionRow> = self
            .keys
            .iter()
            .map(|(value, key)| DimensionRow {
                key: *key,
                value: value.clone(),
            })
            .collect();
        rows.sort_by_key(|r| r.key);
        rows
    }
}

/// The three dimension tables of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dimensions {
    pub animal_types: DimensionTable,
    pub breeds: DimensionTable,
    pub colors: DimensionTable,
}

impl Dimensions {
    /// Union of distinct non-null values per field across both streams.
    pub fn build(batch: &RawBatch) -> Self {
        Self {
            animal_types: table_for(batch, DimensionKind::AnimalType),
            breeds: table_for(batch, DimensionKind::Breed),
            colors: table_for(batch, DimensionKind::Color),
        }
    }

    pub fn get(&self, kind: DimensionKind) -> &DimensionTable {
        match kind {
            DimensionKind::AnimalType => &self.animal_types,
            DimensionKind::Breed => &self.breeds,
            DimensionKind::Color => &self.colors,
        }
    }
}

fn field_of<A>(event: &RawEvent<A>, kind: DimensionKind) -> Option<&str> {
    match kind {
        DimensionKind::AnimalType => event.animal_type.as_deref(),
        DimensionKind::Breed => event.breed.as_deref(),
        DimensionKind::Color => event.color.as_deref(),
    }
}

fn table_for(batch: &RawBatch, kind: DimensionKind) -> DimensionTable {
    let values = batch
        .intakes
        .iter()
        .filter_map(|e| field_of(e, kind))
        .chain(batch.outcomes.iter().filter_map(|e| field_of(e, kind)));
    DimensionTable::from_values(kind, values)
}
