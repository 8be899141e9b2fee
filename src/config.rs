use crate::db::ConnectionConfig;
use crate::export::OutputFormat;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Everything a run needs besides the password.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub paths: PathsConfig,
    pub schema: SchemaNames,
}

/// Where the structure cache, the cached pivot query and the export live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub structure_cache: PathBuf,
    pub query_cache: PathBuf,
    pub output: PathBuf,
    pub format: OutputFormat,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            structure_cache: PathBuf::from("outputs/updated_survey_structure.csv"),
            query_cache: PathBuf::from("outputs/saved_query.txt"),
            output: PathBuf::from("outputs/AllSurveyDataSQL.csv"),
            format: OutputFormat::Csv,
        }
    }
}

/// SQL identifiers spliced verbatim into generated statements.
///
/// Quoting is the caller's business: `"User"` for PostgreSQL, `[User]` for
/// SQL Server style schemas. Id columns are always `SurveyId`, `QuestionId`
/// and `UserId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaNames {
    pub survey_table: String,
    pub question_table: String,
    pub structure_table: String,
    pub answer_table: String,
    pub user_table: String,
    pub answer_value_column: String,
    /// SQL type of the answer column; NULL placeholders are cast to it.
    pub answer_value_type: String,
}

impl Default for SchemaNames {
    fn default() -> Self {
        Self {
            survey_table: String::from("Survey"),
            question_table: String::from("Question"),
            structure_table: String::from("SurveyStructure"),
            answer_table: String::from("Answer"),
            user_table: String::from("\"User\""),
            answer_value_column: String::from("AnswerValue"),
            answer_value_type: String::from("integer"),
        }
    }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("survey-pivot").join("config.toml"))
    }

    /// Load from `explicit` if given (it must exist), otherwise from the
    /// default location when present, otherwise built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SslMode;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.paths, PathsConfig::default());
        assert_eq!(config.schema, SchemaNames::default());
        assert_eq!(config.schema.answer_value_type, "integer");
        assert_eq!(config.connection.port, 5432);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [connection]
            host = "db.internal"
            database = "surveys"
            ssl_mode = "Disable"

            [paths]
            output = "exports/answers.tsv"
            format = "tsv"

            [schema]
            user_table = "[User]"
            answer_value_column = "Answer_Value"
            answer_value_type = "int"
            "#,
        )
        .unwrap();

        assert_eq!(config.connection.host, "db.internal");
        assert_eq!(config.connection.database, "surveys");
        assert_eq!(config.connection.ssl_mode, SslMode::Disable);
        assert_eq!(config.connection.username, "postgres");
        assert_eq!(config.paths.output, PathBuf::from("exports/answers.tsv"));
        assert_eq!(config.paths.format, OutputFormat::Tsv);
        assert_eq!(
            config.paths.query_cache,
            PathBuf::from("outputs/saved_query.txt")
        );
        assert_eq!(config.schema.user_table, "[User]");
        assert_eq!(config.schema.answer_value_column, "Answer_Value");
        assert_eq!(config.schema.answer_value_type, "int");
        assert_eq!(config.schema.survey_table, "Survey");
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = Config::load(Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("nope.toml"));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[connection]\nport = 6543\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.connection.port, 6543);
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        assert!(Config::from_toml("[connection\nport = ").is_err());
    }
}
