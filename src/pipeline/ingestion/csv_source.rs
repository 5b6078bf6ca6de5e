use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::timestamps::parse_timestamp;
use super::RecordSource;
use crate::domain::{IntakeAttrs, IntakeEvent, OutcomeAttrs, OutcomeEvent, RawBatch, RawEvent};
use crate::error::{PipelineError, Result};

/// Intake export row. Unknown columns are ignored, missing ones read as null.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IntakeRow {
    animal_id: Option<String>,
    name: Option<String>,
    datetime: Option<String>,
    animal_type: Option<String>,
    breed: Option<String>,
    color: Option<String>,
    intake_type: Option<String>,
    intake_condition: Option<String>,
    found_location: Option<String>,
}

/// Outcome export row.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OutcomeRow {
    animal_id: Option<String>,
    name: Option<String>,
    datetime: Option<String>,
    animal_type: Option<String>,
    breed: Option<String>,
    color: Option<String>,
    outcome_type: Option<String>,
    outcome_subtype: Option<String>,
}

/// Empty and whitespace-only cells are null.
fn clean(cell: Option<String>) -> Option<String> {
    cell.map(|c| c.trim().to_string()).filter(|c| !c.is_empty())
}

fn timestamp_of(cell: Option<String>, stream: &str, line: usize) -> Option<chrono::NaiveDateTime> {
    let raw = clean(cell)?;
    let parsed = parse_timestamp(&raw);
    if parsed.is_none() {
        debug!("Unparseable {} timestamp '{}' on row {}; treating as null", stream, raw, line);
    }
    parsed
}

impl IntakeRow {
    fn into_event(self, line: usize) -> Option<IntakeEvent> {
        let entity_id = clean(self.animal_id)?;
        Some(RawEvent {
            entity_id,
            name: clean(self.name),
            animal_type: clean(self.animal_type),
            breed: clean(self.breed),
            color: clean(self.color),
            timestamp: timestamp_of(self.datetime, "intake", line),
            attrs: IntakeAttrs {
                intake_type: clean(self.intake_type),
                condition: clean(self.intake_condition),
                location: clean(self.found_location),
            },
        })
    }
}

impl OutcomeRow {
    fn into_event(self, line: usize) -> Option<OutcomeEvent> {
        let entity_id = clean(self.animal_id)?;
        Some(RawEvent {
            entity_id,
            name: clean(self.name),
            animal_type: clean(self.animal_type),
            breed: clean(self.breed),
            color: clean(self.color),
            timestamp: timestamp_of(self.datetime, "outcome", line),
            attrs: OutcomeAttrs {
                outcome_type: clean(self.outcome_type),
                outcome_subtype: clean(self.outcome_subtype),
            },
        })
    }
}

/// Read every row of one export, skipping rows without an animal id.
fn read_rows<R, T, E, F>(reader: R, stream: &str, convert: F) -> Result<Vec<E>>
where
    R: Read,
    T: for<'de> Deserialize<'de>,
    F: Fn(T, usize) -> Option<E>,
{
    let mut csv_reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let mut events = Vec::new();
    let mut skipped = 0usize;

    for (i, row) in csv_reader.deserialize::<T>().enumerate() {
        // Header is line 1.
        let line = i + 2;
        match convert(row?, line) {
            Some(event) => events.push(event),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!("Skipped {} {} rows without an animal_id", skipped, stream);
    }
    Ok(events)
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| {
        PipelineError::Source(format!("Failed to open '{}': {}", path.display(), e))
    })
}

/// Reads the intake and outcome CSV exports.
#[derive(Debug, Clone)]
pub struct CsvRecordSource {
    intakes_path: PathBuf,
    outcomes_path: PathBuf,
}

impl CsvRecordSource {
    pub fn new(intakes_path: impl Into<PathBuf>, outcomes_path: impl Into<PathBuf>) -> Self {
        Self {
            intakes_path: intakes_path.into(),
            outcomes_path: outcomes_path.into(),
        }
    }

    pub fn read_intakes<R: Read>(reader: R) -> Result<Vec<IntakeEvent>> {
        read_rows(reader, "intake", IntakeRow::into_event)
    }

    pub fn read_outcomes<R: Read>(reader: R) -> Result<Vec<OutcomeEvent>> {
        read_rows(reader, "outcome", OutcomeRow::into_event)
    }
}

impl RecordSource for CsvRecordSource {
    fn name(&self) -> &str {
        "csv"
    }

    fn load(&self) -> Result<RawBatch> {
        let intakes = Self::read_intakes(open(&self.intakes_path)?)?;
        let outcomes = Self::read_outcomes(open(&self.outcomes_path)?)?;
        info!(
            "Loaded {} intake and {} outcome records from {} and {}",
            intakes.len(),
            outcomes.len(),
            self.intakes_path.display(),
            self.outcomes_path.display()
        );
        Ok(RawBatch::new(intakes, outcomes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTAKES: &str = "\
animal_id,name,datetime,found_location,intake_type,intake_condition,animal_type,sex_upon_intake,breed,color
A1,*Buddy,2014-03-07T14:26:00.000,Austin (TX),Stray,Normal,Dog,Neutered Male,Beagle Mix,Brown/White
A2,,not a date,,Owner Surrender,Sick,Cat,Spayed Female,Domestic Shorthair Mix,
,Nobody,2014-03-07T14:26:00.000,,Stray,Normal,Dog,,Beagle,Black
";

    const OUTCOMES: &str = "\
animal_id,name,datetime,outcome_type,outcome_subtype,animal_type,breed,color
A1,Buddy,2014-03-10T09:00:00.000,Adoption,,Dog,Beagle Mix,Brown/White
";

    #[test]
    fn test_intake_rows_become_events() {
        let events = CsvRecordSource::read_intakes(INTAKES.as_bytes()).unwrap();
        assert_eq!(events.len(), 2);

        let a1 = &events[0];
        assert_eq!(a1.entity_id, "A1");
        assert_eq!(a1.name.as_deref(), Some("*Buddy"));
        assert_eq!(a1.breed.as_deref(), Some("Beagle Mix"));
        assert_eq!(a1.attrs.location.as_deref(), Some("Austin (TX)"));
        assert!(a1.timestamp.is_some());

        let a2 = &events[1];
        assert_eq!(a2.name, None);
        assert_eq!(a2.color, None);
        assert_eq!(a2.timestamp, None);
        assert_eq!(a2.attrs.condition.as_deref(), Some("Sick"));
    }

    #[test]
    fn test_outcome_rows_become_events() {
        let events = CsvRecordSource::read_outcomes(OUTCOMES.as_bytes()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].attrs.outcome_type.as_deref(), Some("Adoption"));
        assert_eq!(events[0].attrs.outcome_subtype, None);
    }

    #[test]
    fn test_ragged_csv_is_a_source_error() {
        let ragged = "animal_id,name\nA1,Rex,extra\n";
        let err = CsvRecordSource::read_outcomes(ragged.as_bytes()).unwrap_err();
        assert!(matches!(err, PipelineError::Csv(_)));
    }

    #[test]
    fn test_missing_file_is_a_source_error() {
        let source = CsvRecordSource::new("/nonexistent/intakes.csv", "/nonexistent/outcomes.csv");
        let err = source.load().unwrap_err();
        assert!(matches!(err, PipelineError::Source(_)));
    }
}
