// Normalized store: the relational sink the pipeline rebuilds on every run

pub mod in_memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::domain::{
    DimensionKind, DimensionRow, Entity, IntakeEpisode, NormalizedModel, OutcomeEpisode,
};
use crate::error::Result;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Storage trait for the six normalized tables.
///
/// Every `replace_*` call swaps a whole table atomically: it either applies
/// all rows or leaves the table as it was. Reads return rows ordered by
/// their primary key.
#[async_trait]
pub trait NormalizedStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Destroy all tables and recreate an empty schema.
    async fn reset(&self) -> Result<()>;

    // Dimension operations
    async fn replace_dimension(&self, kind: DimensionKind, rows: &[DimensionRow]) -> Result<()>;
    async fn dimension(&self, kind: DimensionKind) -> Result<Vec<DimensionRow>>;

    // Entity operations
    async fn replace_entities(&self, entities: &[Entity]) -> Result<()>;
    async fn entities(&self) -> Result<Vec<Entity>>;

    // Episode operations
    async fn replace_intake_episodes(&self, episodes: &[IntakeEpisode]) -> Result<()>;
    async fn intake_episodes(&self) -> Result<Vec<IntakeEpisode>>;
    async fn replace_outcome_episodes(&self, episodes: &[OutcomeEpisode]) -> Result<()>;
    async fn outcome_episodes(&self) -> Result<Vec<OutcomeEpisode>>;

    /// Read back every table.
    async fn snapshot(&self) -> Result<NormalizedModel> {
        Ok(NormalizedModel {
            animal_types: self.dimension(DimensionKind::AnimalType).await?,
            breeds: self.dimension(DimensionKind::Breed).await?,
            colors: self.dimension(DimensionKind::Color).await?,
            entities: self.entities().await?,
            intake_episodes: self.intake_episodes().await?,
            outcome_episodes: self.outcome_episodes().await?,
        })
    }
}
