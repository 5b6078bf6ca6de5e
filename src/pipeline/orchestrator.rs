use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{debug, error, info, info_span, instrument, Instrument};
use uuid::Uuid;

use crate::domain::{DimensionKind, NormalizedModel, RawBatch};
use crate::error::{PipelineError, Result, Stage};
use crate::pipeline::ingestion::RecordSource;
use crate::pipeline::processing::{
    build_intake_episodes, correlate, materialize_entities, resolve_entities, CorrelationStats,
    DimensionTable, Dimensions,
};
use crate::pipeline::storage::NormalizedStore;

/// Result of a complete rebuild.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub source: String,
    pub backend: String,
    pub raw_intakes: usize,
    pub raw_outcomes: usize,
    pub distinct_entity_ids: usize,
    pub animal_types: usize,
    pub breeds: usize,
    pub colors: usize,
    pub entities: usize,
    pub intake_episodes: usize,
    pub outcome_episodes: usize,
    pub dropped_intakes: usize,
    pub correlation: CorrelationStats,
    pub fingerprint: String,
    pub duration_secs: f64,
}

/// Run one stage inside its own span, record its duration and tag any
/// failure with the stage it came from.
async fn run_stage<T, F>(stage: Stage, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let result = work.instrument(info_span!("stage", stage = stage.as_str())).await;
    histogram!("shelter_stage_duration_seconds", "stage" => stage.as_str())
        .record(started.elapsed().as_secs_f64());

    match result {
        Ok(value) => {
            debug!(
                "Stage '{}' finished in {:.2}ms",
                stage,
                started.elapsed().as_secs_f64() * 1000.0
            );
            Ok(value)
        }
        Err(e) => {
            error!("❌ Stage '{}' failed: {}", stage, e);
            Err(e.in_stage(stage))
        }
    }
}

/// Rebuilds the normalized model from scratch on every run.
///
/// Stages run strictly in dependency order and each later stage reads what
/// the earlier ones wrote back out of the store.
pub struct Pipeline {
    store: Arc<dyn NormalizedStore>,
}

impl Pipeline {
    pub fn new(store: Arc<dyn NormalizedStore>) -> Self {
        Self { store }
    }

    /// Run the full rebuild.
    ///
    /// The source is read before the store is touched, so an unreadable
    /// source leaves the previous contents of the store in place.
    #[instrument(skip(self, source), fields(source = source.name(), backend = self.store.backend_name()))]
    pub async fn run(&self, source: &dyn RecordSource) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        counter!("shelter_pipeline_runs_total").increment(1);
        info!("🚀 Starting normalization run {}", run_id);

        let batch = run_stage(Stage::Load, async { source.load() }).await?;
        info!(
            "📥 Loaded {} intake and {} outcome records",
            batch.intakes.len(),
            batch.outcomes.len()
        );

        run_stage(Stage::Reset, self.store.reset()).await?;
        let dims = run_stage(Stage::Dimensions, self.write_dimensions(&batch)).await?;
        let entities = run_stage(Stage::Entities, self.write_entities(&batch)).await?;
        let (intake_count, dropped_intakes) =
            run_stage(Stage::IntakeEpisodes, self.write_intake_episodes(&batch)).await?;
        let (outcome_count, correlation) =
            run_stage(Stage::OutcomeEpisodes, self.write_outcome_episodes(&batch)).await?;
        let model = run_stage(Stage::Verify, self.verify(&batch)).await?;
        let fingerprint = model.fingerprint()?;

        let duration_secs = started.elapsed().as_secs_f64();
        histogram!("shelter_pipeline_duration_seconds").record(duration_secs);
        info!(
            "✅ Run {} complete: {} entities, {} intakes, {} outcomes ({} matched, {} unmatched) in {:.2}s",
            run_id,
            entities,
            intake_count,
            outcome_count,
            correlation.matched,
            correlation.unmatched,
            duration_secs
        );

        Ok(RunReport {
            run_id,
            source: source.name().to_string(),
            backend: self.store.backend_name().to_string(),
            raw_intakes: batch.intakes.len(),
            raw_outcomes: batch.outcomes.len(),
            distinct_entity_ids: batch.distinct_entity_count(),
            animal_types: dims.animal_types.len(),
            breeds: dims.breeds.len(),
            colors: dims.colors.len(),
            entities,
            intake_episodes: intake_count,
            outcome_episodes: outcome_count,
            dropped_intakes,
            correlation,
            fingerprint,
            duration_secs,
        })
    }

    async fn write_dimensions(&self, batch: &RawBatch) -> Result<Dimensions> {
        let dims = Dimensions::build(batch);
        for kind in DimensionKind::ALL {
            let rows = dims.get(kind).rows();
            self.store.replace_dimension(kind, &rows).await?;
            counter!("shelter_rows_written_total", "table" => kind.table_name())
                .increment(rows.len() as u64);
            debug!("Wrote {} {} rows", rows.len(), kind);
        }
        Ok(dims)
    }

    /// Dimension tables as the store holds them.
    async fn stored_dimensions(&self) -> Result<Dimensions> {
        Ok(Dimensions {
            animal_types: DimensionTable::from_rows(
                DimensionKind::AnimalType,
                &self.store.dimension(DimensionKind::AnimalType).await?,
            ),
            breeds: DimensionTable::from_rows(
                DimensionKind::Breed,
                &self.store.dimension(DimensionKind::Breed).await?,
            ),
            colors: DimensionTable::from_rows(
                DimensionKind::Color,
                &self.store.dimension(DimensionKind::Color).await?,
            ),
        })
    }

    async fn stored_entity_ids(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .store
            .entities()
            .await?
            .into_iter()
            .map(|e| e.entity_id)
            .collect())
    }

    async fn write_entities(&self, batch: &RawBatch) -> Result<usize> {
        let dims = self.stored_dimensions().await?;
        let resolved = resolve_entities(batch);
        let entities = materialize_entities(&resolved, &dims)?;
        self.store.replace_entities(&entities).await?;
        counter!("shelter_rows_written_total", "table" => "animals")
            .increment(entities.len() as u64);
        info!("🐾 Resolved {} entities", entities.len());
        Ok(entities.len())
    }

    async fn write_intake_episodes(&self, batch: &RawBatch) -> Result<(usize, usize)> {
        let known = self.stored_entity_ids().await?;
        let (episodes, dropped) = build_intake_episodes(batch);
        if let Some(orphan) = episodes.iter().find(|e| !known.contains(&e.entity_id)) {
            return Err(PipelineError::consistency("animals", orphan.entity_id.clone()));
        }

        self.store.replace_intake_episodes(&episodes).await?;
        counter!("shelter_rows_written_total", "table" => "intake")
            .increment(episodes.len() as u64);
        counter!("shelter_records_dropped_total", "stream" => "intake").increment(dropped as u64);
        Ok((episodes.len(), dropped))
    }

    async fn write_outcome_episodes(&self, batch: &RawBatch) -> Result<(usize, CorrelationStats)> {
        let known = self.stored_entity_ids().await?;
        let intakes = self.store.intake_episodes().await?;
        let output = correlate(&batch.outcomes, &intakes);
        if let Some(orphan) = output.episodes.iter().find(|e| !known.contains(&e.entity_id)) {
            return Err(PipelineError::consistency("animals", orphan.entity_id.clone()));
        }

        self.store.replace_outcome_episodes(&output.episodes).await?;
        counter!("shelter_rows_written_total", "table" => "outcome")
            .increment(output.episodes.len() as u64);
        counter!("shelter_outcomes_unmatched_total").increment(output.stats.unmatched as u64);
        counter!("shelter_records_dropped_total", "stream" => "outcome")
            .increment(output.stats.dropped_outcomes as u64);
        Ok((output.episodes.len(), output.stats))
    }

    /// Check the rebuilt model against the batch it came from.
    async fn verify(&self, batch: &RawBatch) -> Result<NormalizedModel> {
        let model = self.store.snapshot().await?;
        check_model(&model, batch)?;
        Ok(model)
    }
}

/// Postconditions of a rebuild: one entity per distinct id, and every key
/// an entity or episode holds resolves to a stored row.
pub fn check_model(model: &NormalizedModel, batch: &RawBatch) -> Result<()> {
    let expected = batch.distinct_entity_count();
    if model.entities.len() != expected {
        return Err(PipelineError::consistency(
            "animals",
            format!("{} rows for {} distinct ids", model.entities.len(), expected),
        ));
    }

    for kind in DimensionKind::ALL {
        let keys: BTreeSet<i64> = model.dimension(kind).iter().map(|r| r.key).collect();
        for entity in &model.entities {
            let key = match kind {
                DimensionKind::AnimalType => entity.animal_type_id,
                DimensionKind::Breed => entity.breed_id,
                DimensionKind::Color => entity.color_id,
            };
            if let Some(key) = key.filter(|k| !keys.contains(k)) {
                return Err(PipelineError::consistency(kind.table_name(), key.to_string()));
            }
        }
    }

    let ids: BTreeSet<&str> = model.entities.iter().map(|e| e.entity_id.as_str()).collect();
    let dangling = model
        .intake_episodes
        .iter()
        .map(|e| e.entity_id.as_str())
        .chain(model.outcome_episodes.iter().map(|e| e.entity_id.as_str()))
        .find(|id| !ids.contains(id));
    if let Some(id) = dangling {
        return Err(PipelineError::consistency("animals", id));
    }

    let intake_ids: BTreeSet<i64> = model.intake_episodes.iter().map(|e| e.episode_id).collect();
    if let Some(id) = model
        .outcome_episodes
        .iter()
        .filter_map(|e| e.matched_intake_id)
        .find(|id| !intake_ids.contains(id))
    {
        return Err(PipelineError::consistency("intake", id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Entity, IntakeAttrs, OutcomeAttrs, RawEvent};
    use crate::pipeline::ingestion::StaticRecordSource;
    use crate::pipeline::storage::InMemoryStore;
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    fn t(day: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + Duration::days(day)
    }

    fn batch() -> RawBatch {
        RawBatch::new(
            vec![RawEvent {
                entity_id: "A1".to_string(),
                name: Some("Buddy".to_string()),
                animal_type: Some("Dog".to_string()),
                breed: Some("Beagle".to_string()),
                color: Some("Tan".to_string()),
                timestamp: Some(t(1)),
                attrs: IntakeAttrs::default(),
            }],
            vec![RawEvent {
                entity_id: "A1".to_string(),
                name: None,
                animal_type: Some("Dog".to_string()),
                breed: Some("Beagle".to_string()),
                color: None,
                timestamp: Some(t(4)),
                attrs: OutcomeAttrs::default(),
            }],
        )
    }

    struct FailingSource;

    impl RecordSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        fn load(&self) -> Result<RawBatch> {
            Err(PipelineError::Source("export unreadable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_run_reports_counts() {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = Pipeline::new(store.clone());

        let report = pipeline.run(&StaticRecordSource::new(batch())).await.unwrap();

        assert_eq!(report.entities, 1);
        assert_eq!(report.distinct_entity_ids, 1);
        assert_eq!(report.animal_types, 1);
        assert_eq!(report.intake_episodes, 1);
        assert_eq!(report.outcome_episodes, 1);
        assert_eq!(report.correlation.matched, 1);
        assert_eq!(report.backend, "memory");

        let outcomes = store.outcome_episodes().await.unwrap();
        assert_eq!(outcomes[0].days_in_care, Some(3.0));
    }

    #[tokio::test]
    async fn test_source_failure_leaves_store_untouched() {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = Pipeline::new(store.clone());
        pipeline.run(&StaticRecordSource::new(batch())).await.unwrap();

        let err = pipeline.run(&FailingSource).await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Load));
        assert_eq!(store.entities().await.unwrap().len(), 1);
    }

    #[test]
    fn test_check_model_catches_duplicated_entities() {
        let mut model = NormalizedModel::default();
        for _ in 0..2 {
            model.entities.push(Entity {
                entity_id: "A1".to_string(),
                name: None,
                animal_type_id: None,
                breed_id: None,
                color_id: None,
            });
        }
        let err = check_model(&model, &batch()).unwrap_err();
        assert!(matches!(err, PipelineError::Consistency { .. }));
    }

    #[test]
    fn test_check_model_catches_dangling_dimension_key() {
        let mut model = NormalizedModel::default();
        model.entities.push(Entity {
            entity_id: "A1".to_string(),
            name: None,
            animal_type_id: Some(9),
            breed_id: None,
            color_id: None,
        });
        match check_model(&model, &batch()) {
            Err(PipelineError::Consistency { table, key }) => {
                assert_eq!(table, "animal_types");
                assert_eq!(key, "9");
            }
            other => panic!("expected consistency error, got {:?}", other),
        }
    }
}
