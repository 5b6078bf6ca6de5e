// Pipeline ingestion: raw record sources feeding the normalizer

pub mod csv_source;
pub mod timestamps;

use crate::domain::RawBatch;
use crate::error::Result;

pub use csv_source::CsvRecordSource;

/// A bounded source of raw intake and outcome records.
///
/// Implementations coerce malformed fields to null; only an unreadable or
/// structurally broken source is an error.
pub trait RecordSource: Send + Sync {
    fn name(&self) -> &str;
    fn load(&self) -> Result<RawBatch>;
}

/// A batch held in memory, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticRecordSource {
    batch: RawBatch,
}

impl StaticRecordSource {
    pub fn new(batch: RawBatch) -> Self {
        Self { batch }
    }
}

impl RecordSource for StaticRecordSource {
    fn name(&self) -> &str {
        "static"
    }

    fn load(&self) -> Result<RawBatch> {
        Ok(self.batch.clone())
    }
}
