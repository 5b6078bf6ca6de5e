// Normalization pipeline: ingestion, processing, storage and orchestration

pub mod ingestion;
pub mod orchestrator;
pub mod processing;
pub mod storage;

pub use ingestion::{CsvRecordSource, RecordSource, StaticRecordSource};
pub use orchestrator::{check_model, Pipeline, RunReport};
pub use storage::{InMemoryStore, NormalizedStore, SqliteStore};
