pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod summary;

pub use domain::*;
pub use error::{PipelineError, Result, Stage};
pub use pipeline::{
    CsvRecordSource, InMemoryStore, NormalizedStore, Pipeline, RecordSource, RunReport, SqliteStore,
    StaticRecordSource,
};
pub use summary::{RepeatIntake, Share, StoreSummary};
