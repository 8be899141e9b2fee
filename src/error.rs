use crate::db::StructuredError;
use std::path::PathBuf;

/// Everything that can end an extraction run.
///
/// None of these are retried. The driver closes its database session and
/// hands the error back to the caller, which decides how to terminate.
#[derive(Debug, thiserror::Error)]
pub enum PivotError {
    /// Server unreachable, credentials rejected or TLS setup failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The database rejected a statement.
    #[error("{}", .0.display_full())]
    QueryExecution(StructuredError),

    /// Structure rows from the database that are not integer triples with a
    /// 0/1 membership flag.
    #[error("Malformed survey structure: {detail}")]
    MalformedResult { detail: String },

    /// The same (survey, question) pair was reported both in and out of the survey.
    #[error("Conflicting structure rows for survey {survey_id}, question {question_id}")]
    InconsistentStructure { survey_id: i64, question_id: i64 },

    #[error("Failed to {action} {}: {source}", .path.display())]
    Persistence {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Structure cache {} is unreadable: {source}", .path.display())]
    CacheFormat {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

pub type PivotResult<T> = std::result::Result<T, PivotError>;

impl PivotError {
    pub(crate) fn persistence(
        action: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        PivotError::Persistence {
            action,
            path: path.into(),
            source,
        }
    }

    /// Short label used in the final diagnostic line.
    pub fn kind(&self) -> &'static str {
        match self {
            PivotError::Connection(_) => "connection",
            PivotError::QueryExecution(_) => "query execution",
            PivotError::MalformedResult { .. } | PivotError::InconsistentStructure { .. } => {
                "structure"
            }
            PivotError::Persistence { .. } | PivotError::CacheFormat { .. } => "persistence",
        }
    }
}
