use std::fmt;

use thiserror::Error;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Load,
    Reset,
    Dimensions,
    Entities,
    IntakeEpisodes,
    OutcomeEpisodes,
    Verify,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Reset => "reset",
            Stage::Dimensions => "dimensions",
            Stage::Entities => "entities",
            Stage::IntakeEpisodes => "intake_episodes",
            Stage::OutcomeEpisodes => "outcome_episodes",
            Stage::Verify => "verify",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The raw record source could not be read.
    #[error("Record source error: {0}")]
    Source(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A referenced dimension value or entity could not be resolved.
    #[error("Consistency error in {table}: unresolved key '{key}'")]
    Consistency { table: String, key: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    pub fn consistency(table: impl Into<String>, key: impl Into<String>) -> Self {
        PipelineError::Consistency {
            table: table.into(),
            key: key.into(),
        }
    }

    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            already @ PipelineError::Stage { .. } => already,
            other => PipelineError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The stage a failure was raised in, if it was wrapped by the pipeline.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_stage_does_not_double_wrap() {
        let err = PipelineError::consistency("breeds", "Beagle")
            .in_stage(Stage::Entities)
            .in_stage(Stage::Verify);

        assert_eq!(err.stage(), Some(Stage::Entities));
        assert_eq!(
            err.to_string(),
            "Stage 'entities' failed: Consistency error in breeds: unresolved key 'Beagle'"
        );
    }
}
