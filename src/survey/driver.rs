use super::cache::{CacheAction, StructureCache};
use super::structure::StructureReader;
use crate::config::{PathsConfig, SchemaNames};
use crate::db::{connect, ConnectionConfig, Database, QueryResult};
use crate::error::{PivotError, PivotResult};
use crate::export::write_export;
use std::path::PathBuf;
use tracing::{info, warn};

/// The pivoted survey data: one row per (user, survey), one column per question.
pub type AnswerTable = QueryResult;

#[derive(Debug, Clone)]
pub struct RunReport {
    pub action: CacheAction,
    pub table: AnswerTable,
    pub output: PathBuf,
}

/// Runs one extraction end to end: structure, cache, pivot, export.
pub struct ExtractionDriver<'a> {
    paths: &'a PathsConfig,
    names: &'a SchemaNames,
    force_refresh: bool,
}

impl<'a> ExtractionDriver<'a> {
    pub fn new(paths: &'a PathsConfig, names: &'a SchemaNames) -> Self {
        Self {
            paths,
            names,
            force_refresh: false,
        }
    }

    /// Regenerate the pivot query even if the structure is unchanged.
    pub fn force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    pub async fn run(&self, connection: &ConnectionConfig) -> PivotResult<RunReport> {
        info!("Connecting to {}", connection.display_string());
        let session = connect(connection)
            .await
            .map_err(|e| PivotError::Connection(format!("{:#}", e)))?;
        info!("Connection established");
        self.run_with(session).await
    }

    /// Run against an already open handle. The handle is closed before
    /// returning, whether the run succeeded or not.
    pub async fn run_with<D: Database>(&self, db: D) -> PivotResult<RunReport> {
        let outcome = self.extract(&db).await;
        db.close().await;
        outcome
    }

    async fn extract<D: Database>(&self, db: &D) -> PivotResult<RunReport> {
        info!("Reading survey structure");
        let snapshot = StructureReader::new(self.names).read(db).await?;
        info!(
            "Found {} surveys, {} questions",
            snapshot.surveys().len(),
            snapshot.questions().len()
        );

        let cache = StructureCache::new(&self.paths.structure_cache, &self.paths.query_cache);
        let action = cache.refresh(&snapshot, self.names, self.force_refresh)?;
        let query = cache.load_query()?;

        let table = if query.trim().is_empty() {
            warn!("No surveys defined, exporting an empty table");
            QueryResult::from_rows(&["UserId", "SurveyId"], vec![])
        } else {
            info!("Running pivot query from {}", cache.query_path().display());
            match db.execute(&query).await {
                Ok(table) => {
                    info!(
                        "Pivot query returned {} rows in {:.2?}",
                        table.row_count, table.execution_time
                    );
                    table
                }
                Err(e) => {
                    if action != CacheAction::Noop {
                        warn!(
                            "Pivot query failed after the structure cache was {}; the cache is kept",
                            action
                        );
                    }
                    return Err(e);
                }
            }
        };

        write_export(&table, &self.paths.output, self.paths.format)?;
        info!(
            "Saved {} rows to {}",
            table.row_count,
            self.paths.output.display()
        );

        Ok(RunReport {
            action,
            table,
            output: self.paths.output.clone(),
        })
    }
}
