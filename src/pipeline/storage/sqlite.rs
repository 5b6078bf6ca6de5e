use super::NormalizedStore;
use crate::domain::{DimensionKind, DimensionRow, Entity, IntakeEpisode, OutcomeEpisode};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

const SCHEMA: &str = r#"
    PRAGMA foreign_keys = ON;
    CREATE TABLE IF NOT EXISTS animal_types (
        type_id      INTEGER PRIMARY KEY,
        animal_type  TEXT UNIQUE NOT NULL
    );
    CREATE TABLE IF NOT EXISTS breeds (
        breed_id     INTEGER PRIMARY KEY,
        breed_name   TEXT UNIQUE NOT NULL
    );
    CREATE TABLE IF NOT EXISTS colors (
        color_id     INTEGER PRIMARY KEY,
        color_name   TEXT UNIQUE NOT NULL
    );
    CREATE TABLE IF NOT EXISTS animals (
        animal_id       TEXT PRIMARY KEY,
        name            TEXT,
        animal_type_id  INTEGER REFERENCES animal_types(type_id),
        breed_id        INTEGER REFERENCES breeds(breed_id),
        color_id        INTEGER REFERENCES colors(color_id)
    );
    CREATE TABLE IF NOT EXISTS intake (
        intake_id         INTEGER PRIMARY KEY,
        animal_id         TEXT NOT NULL REFERENCES animals(animal_id),
        intake_date       TEXT NOT NULL,
        intake_type       TEXT,
        intake_condition  TEXT,
        found_location    TEXT
    );
    CREATE TABLE IF NOT EXISTS outcome (
        outcome_id           INTEGER PRIMARY KEY,
        animal_id            TEXT NOT NULL REFERENCES animals(animal_id),
        outcome_date         TEXT NOT NULL,
        outcome_type         TEXT,
        outcome_subtype      TEXT,
        matched_intake_id    INTEGER REFERENCES intake(intake_id),
        matched_intake_date  TEXT,
        days_in_shelter      REAL
    );
"#;

const DROP_ALL: &str = r#"
    DROP TABLE IF EXISTS outcome;
    DROP TABLE IF EXISTS intake;
    DROP TABLE IF EXISTS animals;
    DROP TABLE IF EXISTS colors;
    DROP TABLE IF EXISTS breeds;
    DROP TABLE IF EXISTS animal_types;
"#;

/// Table and column names of a dimension: `(table, key column, value column)`.
fn dimension_columns(kind: DimensionKind) -> (&'static str, &'static str, &'static str) {
    match kind {
        DimensionKind::AnimalType => ("animal_types", "type_id", "animal_type"),
        DimensionKind::Breed => ("breeds", "breed_id", "breed_name"),
        DimensionKind::Color => ("colors", "color_id", "color_name"),
    }
}

/// SQLite-backed normalized store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) a database file and make sure the schema exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        info!("Opened SQLite store at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PipelineError::Storage("SQLite connection lock poisoned".to_string()))
    }
}

#[async_trait]
impl NormalizedStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn reset(&self) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute_batch(DROP_ALL)?;
        tx.execute_batch(SCHEMA)?;
        tx.commit()?;
        match &self.path {
            Some(path) => debug!("Recreated SQLite schema in {}", path.display()),
            None => debug!("Recreated in-memory SQLite schema"),
        }
        Ok(())
    }

    async fn replace_dimension(&self, kind: DimensionKind, rows: &[DimensionRow]) -> Result<()> {
        let (table, key_col, value_col) = dimension_columns(kind);
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(&format!("DELETE FROM {table}"), [])?;
        {
            let mut stmt =
                tx.prepare(&format!("INSERT INTO {table} ({key_col}, {value_col}) VALUES (?1, ?2)"))?;
            for row in rows {
                stmt.execute(params![row.key, row.value])?;
            }
        }
        tx.commit()?;
        debug!("Replaced {} with {} rows", table, rows.len());
        Ok(())
    }

    async fn dimension(&self, kind: DimensionKind) -> Result<Vec<DimensionRow>> {
        let (table, key_col, value_col) = dimension_columns(kind);
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare(&format!("SELECT {key_col}, {value_col} FROM {table} ORDER BY {key_col}"))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(DimensionRow {
                    key: row.get(0)?,
                    value: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn replace_entities(&self, entities: &[Entity]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM animals", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO animals (animal_id, name, animal_type_id, breed_id, color_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for e in entities {
                stmt.execute(params![
                    e.entity_id,
                    e.name,
                    e.animal_type_id,
                    e.breed_id,
                    e.color_id
                ])?;
            }
        }
        tx.commit()?;
        debug!("Replaced animals with {} rows", entities.len());
        Ok(())
    }

    async fn entities(&self) -> Result<Vec<Entity>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT animal_id, name, animal_type_id, breed_id, color_id FROM animals ORDER BY animal_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Entity {
                    entity_id: row.get(0)?,
                    name: row.get(1)?,
                    animal_type_id: row.get(2)?,
                    breed_id: row.get(3)?,
                    color_id: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn replace_intake_episodes(&self, episodes: &[IntakeEpisode]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM intake", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO intake (intake_id, animal_id, intake_date, intake_type, intake_condition, found_location)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for e in episodes {
                stmt.execute(params![
                    e.episode_id,
                    e.entity_id,
                    e.intake_timestamp,
                    e.intake_type,
                    e.condition,
                    e.location
                ])?;
            }
        }
        tx.commit()?;
        debug!("Replaced intake with {} rows", episodes.len());
        Ok(())
    }

    async fn intake_episodes(&self) -> Result<Vec<IntakeEpisode>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT intake_id, animal_id, intake_date, intake_type, intake_condition, found_location
             FROM intake ORDER BY intake_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(IntakeEpisode {
                    episode_id: row.get(0)?,
                    entity_id: row.get(1)?,
                    intake_timestamp: row.get(2)?,
                    intake_type: row.get(3)?,
                    condition: row.get(4)?,
                    location: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn replace_outcome_episodes(&self, episodes: &[OutcomeEpisode]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM outcome", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO outcome (outcome_id, animal_id, outcome_date, outcome_type, outcome_subtype,
                                      matched_intake_id, matched_intake_date, days_in_shelter)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for e in episodes {
                stmt.execute(params![
                    e.episode_id,
                    e.entity_id,
                    e.outcome_timestamp,
                    e.outcome_type,
                    e.outcome_subtype,
                    e.matched_intake_id,
                    e.matched_intake_timestamp,
                    e.days_in_care
                ])?;
            }
        }
        tx.commit()?;
        debug!("Replaced outcome with {} rows", episodes.len());
        Ok(())
    }

    async fn outcome_episodes(&self) -> Result<Vec<OutcomeEpisode>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT outcome_id, animal_id, outcome_date, outcome_type, outcome_subtype,
                    matched_intake_id, matched_intake_date, days_in_shelter
             FROM outcome ORDER BY outcome_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(OutcomeEpisode {
                    episode_id: row.get(0)?,
                    entity_id: row.get(1)?,
                    outcome_timestamp: row.get(2)?,
                    outcome_type: row.get(3)?,
                    outcome_subtype: row.get(4)?,
                    matched_intake_id: row.get(5)?,
                    matched_intake_timestamp: row.get(6)?,
                    days_in_care: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(day: u32, hour: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hour, 30, 0)
            .unwrap()
    }

    async fn seeded() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .replace_dimension(
                DimensionKind::AnimalType,
                &[DimensionRow {
                    key: 1,
                    value: "Cat".to_string(),
                }],
            )
            .await
            .unwrap();
        store
            .replace_entities(&[Entity {
                entity_id: "A1".to_string(),
                name: Some("Tom".to_string()),
                animal_type_id: Some(1),
                breed_id: None,
                color_id: None,
            }])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_episodes_round_trip_through_sqlite() {
        let store = seeded().await;
        let intake = IntakeEpisode {
            episode_id: 1,
            entity_id: "A1".to_string(),
            intake_timestamp: ts(1, 8),
            intake_type: Some("Stray".to_string()),
            condition: Some("Normal".to_string()),
            location: Some("Austin (TX)".to_string()),
        };
        let outcome = OutcomeEpisode {
            episode_id: 1,
            entity_id: "A1".to_string(),
            outcome_timestamp: ts(3, 20),
            outcome_type: Some("Adoption".to_string()),
            outcome_subtype: None,
            matched_intake_id: Some(1),
            matched_intake_timestamp: Some(ts(1, 8)),
            days_in_care: Some(2.5),
        };

        store.replace_intake_episodes(&[intake.clone()]).await.unwrap();
        store.replace_outcome_episodes(&[outcome.clone()]).await.unwrap();

        assert_eq!(store.intake_episodes().await.unwrap(), vec![intake]);
        assert_eq!(store.outcome_episodes().await.unwrap(), vec![outcome]);
    }

    #[tokio::test]
    async fn test_foreign_keys_are_enforced() {
        let store = seeded().await;
        let err = store
            .replace_entities(&[Entity {
                entity_id: "A2".to_string(),
                name: None,
                animal_type_id: Some(42),
                breed_id: None,
                color_id: None,
            }])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Sqlite(_)));

        // The failed replace rolled back; the previous table is intact.
        let ids: Vec<String> = store
            .entities()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.entity_id)
            .collect();
        assert_eq!(ids, vec!["A1"]);
    }

    #[tokio::test]
    async fn test_reset_recreates_empty_schema() {
        let store = seeded().await;
        store.reset().await.unwrap();
        let snapshot = store.snapshot().await.unwrap();
        assert!(snapshot.animal_types.is_empty());
        assert!(snapshot.entities.is_empty());
        assert!(snapshot.outcome_episodes.is_empty());
    }
}
