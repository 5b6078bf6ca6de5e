/// Environment variables that override the config file.
pub const ENV_INTAKES_CSV: &str = "SHELTER_INTAKES_CSV";
pub const ENV_OUTCOMES_CSV: &str = "SHELTER_OUTCOMES_CSV";
pub const ENV_DB_PATH: &str = "SHELTER_DB_PATH";
pub const ENV_LOG_DIR: &str = "SHELTER_LOG_DIR";

pub const DEFAULT_CONFIG_PATH: &str = "shelter.toml";
pub const DEFAULT_INTAKES_CSV: &str = "data/aac_intakes.csv";
pub const DEFAULT_OUTCOMES_CSV: &str = "data/aac_outcomes.csv";
pub const DEFAULT_DB_PATH: &str = "animal_shelter.db";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_LOG_FILE: &str = "shelter_etl.log";
pub const DEFAULT_LOG_DIRECTIVE: &str = "shelter_etl=info";
