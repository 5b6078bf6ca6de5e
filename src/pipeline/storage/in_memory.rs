use super::NormalizedStore;
use crate::domain::{DimensionKind, DimensionRow, Entity, IntakeEpisode, OutcomeEpisode};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// In-memory store for tests and dry runs.
///
/// Enforces the same keys and references the SQLite schema does, so a
/// pipeline bug surfaces the same way against either backend.
#[derive(Clone)]
pub struct InMemoryStore {
    dimensions: Arc<Mutex<HashMap<DimensionKind, BTreeMap<i64, DimensionRow>>>>,
    entities: Arc<Mutex<BTreeMap<String, Entity>>>,
    intake_episodes: Arc<Mutex<BTreeMap<i64, IntakeEpisode>>>,
    outcome_episodes: Arc<Mutex<BTreeMap<i64, OutcomeEpisode>>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            dimensions: Arc::new(Mutex::new(HashMap::new())),
            entities: Arc::new(Mutex::new(BTreeMap::new())),
            intake_episodes: Arc::new(Mutex::new(BTreeMap::new())),
            outcome_episodes: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }
}

fn lock<'a, T>(table: &'static str, mutex: &'a Mutex<T>) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| PipelineError::Storage(format!("table '{}' lock poisoned", table)))
}

fn unique<K: Ord + ToString>(table: &'static str, keys: impl Iterator<Item = K>) -> Result<()> {
    let mut seen = BTreeSet::new();
    for key in keys {
        let label = key.to_string();
        if !seen.insert(key) {
            return Err(PipelineError::Storage(format!(
                "duplicate primary key '{}' in {}",
                label, table
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl NormalizedStore for InMemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn reset(&self) -> Result<()> {
        lock("outcome", &self.outcome_episodes)?.clear();
        lock("intake", &self.intake_episodes)?.clear();
        lock("animals", &self.entities)?.clear();
        lock("dimensions", &self.dimensions)?.clear();
        debug!("Reset in-memory store");
        Ok(())
    }

    async fn replace_dimension(&self, kind: DimensionKind, rows: &[DimensionRow]) -> Result<()> {
        unique(kind.table_name(), rows.iter().map(|r| r.key))?;
        unique(kind.table_name(), rows.iter().map(|r| r.value.as_str()))?;

        let table: BTreeMap<i64, DimensionRow> = rows.iter().map(|r| (r.key, r.clone())).collect();
        lock("dimensions", &self.dimensions)?.insert(kind, table);

        debug!("Replaced {} with {} rows", kind.table_name(), rows.len());
        Ok(())
    }

    async fn dimension(&self, kind: DimensionKind) -> Result<Vec<DimensionRow>> {
        let dims = lock("dimensions", &self.dimensions)?;
        Ok(dims
            .get(&kind)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn replace_entities(&self, entities: &[Entity]) -> Result<()> {
        unique("animals", entities.iter().map(|e| e.entity_id.as_str()))?;
        {
            let dims = lock("dimensions", &self.dimensions)?;
            for entity in entities {
                let refs = [
                    (DimensionKind::AnimalType, entity.animal_type_id),
                    (DimensionKind::Breed, entity.breed_id),
                    (DimensionKind::Color, entity.color_id),
                ];
                for (kind, key) in refs {
                    let Some(key) = key else { continue };
                    let present = dims.get(&kind).is_some_and(|t| t.contains_key(&key));
                    if !present {
                        return Err(PipelineError::consistency(kind.table_name(), key.to_string()));
                    }
                }
            }
        }

        let table = entities
            .iter()
            .map(|e| (e.entity_id.clone(), e.clone()))
            .collect();
        *lock("animals", &self.entities)? = table;

        debug!("Replaced animals with {} rows", entities.len());
        Ok(())
    }

    async fn entities(&self) -> Result<Vec<Entity>> {
        Ok(lock("animals", &self.entities)?.values().cloned().collect())
    }

    async fn replace_intake_episodes(&self, episodes: &[IntakeEpisode]) -> Result<()> {
        unique("intake", episodes.iter().map(|e| e.episode_id))?;
        {
            let entities = lock("animals", &self.entities)?;
            if let Some(orphan) = episodes.iter().find(|e| !entities.contains_key(&e.entity_id)) {
                return Err(PipelineError::consistency("animals", orphan.entity_id.clone()));
            }
        }

        let table = episodes.iter().map(|e| (e.episode_id, e.clone())).collect();
        *lock("intake", &self.intake_episodes)? = table;

        debug!("Replaced intake with {} rows", episodes.len());
        Ok(())
    }

    async fn intake_episodes(&self) -> Result<Vec<IntakeEpisode>> {
        Ok(lock("intake", &self.intake_episodes)?.values().cloned().collect())
    }

    async fn replace_outcome_episodes(&self, episodes: &[OutcomeEpisode]) -> Result<()> {
        unique("outcome", episodes.iter().map(|e| e.episode_id))?;
        {
            let entities = lock("animals", &self.entities)?;
            if let Some(orphan) = episodes.iter().find(|e| !entities.contains_key(&e.entity_id)) {
                return Err(PipelineError::consistency("animals", orphan.entity_id.clone()));
            }
            let intakes = lock("intake", &self.intake_episodes)?;
            let dangling = episodes
                .iter()
                .filter_map(|e| e.matched_intake_id)
                .find(|id| !intakes.contains_key(id));
            if let Some(id) = dangling {
                return Err(PipelineError::consistency("intake", id.to_string()));
            }
        }

        let table = episodes.iter().map(|e| (e.episode_id, e.clone())).collect();
        *lock("outcome", &self.outcome_episodes)? = table;

        debug!("Replaced outcome with {} rows", episodes.len());
        Ok(())
    }

    async fn outcome_episodes(&self) -> Result<Vec<OutcomeEpisode>> {
        Ok(lock("outcome", &self.outcome_episodes)?.values().cloned().collect())
    }
}
