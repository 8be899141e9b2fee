use super::structure::{StructureRow, StructureSnapshot, SurveyId};
use super::synth::synthesize;
use crate::config::SchemaNames;
use crate::error::{PivotError, PivotResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What [`StructureCache::refresh`] did with a freshly read snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    /// Nothing was cached yet; snapshot and query were written.
    Generate,
    /// The cached snapshot matched; nothing was touched.
    Noop,
    /// The structure changed (or a refresh was forced); both files were replaced.
    Regenerate,
}

impl fmt::Display for CacheAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheAction::Generate => write!(f, "generated"),
            CacheAction::Noop => write!(f, "unchanged"),
            CacheAction::Regenerate => write!(f, "regenerated"),
        }
    }
}

/// One line of the persisted structure file. A survey without questions is
/// written with the last two fields empty.
#[derive(Debug, Serialize, Deserialize)]
struct StructureRecord {
    #[serde(rename = "SurveyId")]
    survey_id: i64,
    #[serde(rename = "QuestionId")]
    question_id: Option<i64>,
    #[serde(rename = "QuestionInSurvey")]
    question_in_survey: Option<Membership>,
}

/// The `QuestionInSurvey` flag, stored as 0 or 1.
#[derive(Debug, Clone, Copy)]
struct Membership(bool);

impl Serialize for Membership {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(self.0))
    }
}

impl<'de> Deserialize<'de> for Membership {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(Membership(false)),
            1 => Ok(Membership(true)),
            other => Err(serde::de::Error::custom(format!(
                "QuestionInSurvey must be 0 or 1, got {}",
                other
            ))),
        }
    }
}

/// Last-seen structure snapshot plus the pivot query synthesized from it.
///
/// Both live on disk between runs. The query file is always written before
/// the structure file, so a structure file without its query is treated as
/// no cache at all.
#[derive(Debug, Clone)]
pub struct StructureCache {
    structure_path: PathBuf,
    query_path: PathBuf,
}

impl StructureCache {
    pub fn new(structure_path: impl Into<PathBuf>, query_path: impl Into<PathBuf>) -> Self {
        Self {
            structure_path: structure_path.into(),
            query_path: query_path.into(),
        }
    }

    pub fn structure_path(&self) -> &Path {
        &self.structure_path
    }

    pub fn query_path(&self) -> &Path {
        &self.query_path
    }

    pub fn is_present(&self) -> bool {
        self.structure_path.exists() && self.query_path.exists()
    }

    /// Compare `snapshot` with what is cached and rewrite the cache if needed.
    /// `force` regenerates even when nothing changed.
    pub fn refresh(
        &self,
        snapshot: &StructureSnapshot,
        names: &SchemaNames,
        force: bool,
    ) -> PivotResult<CacheAction> {
        let action = match self.load_snapshot()? {
            None => {
                info!("No cached survey structure, generating the pivot query");
                CacheAction::Generate
            }
            Some(_) if force => {
                info!("Refresh requested, regenerating the pivot query");
                CacheAction::Regenerate
            }
            Some(cached) if cached == *snapshot => {
                info!("Survey structure has not changed");
                return Ok(CacheAction::Noop);
            }
            Some(cached) => {
                info!(
                    "Survey structure changed ({} cached rows, {} current), regenerating the pivot query",
                    cached.len(),
                    snapshot.len()
                );
                CacheAction::Regenerate
            }
        };

        let query = synthesize(snapshot, names);
        write_atomically(&self.query_path, query.as_bytes())?;
        write_atomically(&self.structure_path, &encode_snapshot(snapshot, &self.structure_path)?)?;
        debug!(
            "Wrote {} structure rows for {} surveys to {}",
            snapshot.len(),
            snapshot.surveys().len(),
            self.structure_path.display()
        );
        debug!("Wrote pivot query to {}:\n{}", self.query_path.display(), query);

        Ok(action)
    }

    /// The cached snapshot, or `None` when the cache is absent.
    pub fn load_snapshot(&self) -> PivotResult<Option<StructureSnapshot>> {
        if !self.is_present() {
            return Ok(None);
        }
        let content = std::fs::read(&self.structure_path)
            .map_err(|e| PivotError::persistence("read", &self.structure_path, e))?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(content.as_slice());

        let mut snapshot = StructureSnapshot::new();
        for record in reader.deserialize() {
            let record: StructureRecord = record.map_err(|source| self.format_error(source))?;
            let survey_id = SurveyId(record.survey_id);
            match (record.question_id, record.question_in_survey) {
                (None, None) => snapshot.insert_survey(survey_id),
                (Some(question_id), Some(Membership(in_survey))) => {
                    snapshot.insert(StructureRow::new(record.survey_id, question_id, in_survey))?
                }
                _ => {
                    let detail = format!(
                        "survey {} has a QuestionId without a QuestionInSurvey flag or the reverse",
                        survey_id
                    );
                    return Err(self.format_error(
                        io::Error::new(io::ErrorKind::InvalidData, detail).into(),
                    ));
                }
            }
        }
        Ok(Some(snapshot))
    }

    fn format_error(&self, source: csv::Error) -> PivotError {
        PivotError::CacheFormat {
            path: self.structure_path.clone(),
            source,
        }
    }

    pub fn load_query(&self) -> PivotResult<String> {
        std::fs::read_to_string(&self.query_path)
            .map_err(|e| PivotError::persistence("read", &self.query_path, e))
    }
}

fn encode_snapshot(snapshot: &StructureSnapshot, path: &Path) -> PivotResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    // serialize() only emits the header with the first record.
    if snapshot.is_empty() {
        writer
            .write_record(["SurveyId", "QuestionId", "QuestionInSurvey"])
            .map_err(|source| PivotError::CacheFormat {
                path: path.to_path_buf(),
                source,
            })?;
    }
    for survey_id in snapshot.surveys() {
        let mut records: Vec<StructureRecord> = snapshot
            .survey_rows(survey_id)
            .map(|row| StructureRecord {
                survey_id: row.survey_id.0,
                question_id: Some(row.question_id.0),
                question_in_survey: Some(Membership(row.in_survey)),
            })
            .collect();
        if records.is_empty() {
            records.push(StructureRecord {
                survey_id: survey_id.0,
                question_id: None,
                question_in_survey: None,
            });
        }
        for record in records {
            writer
                .serialize(record)
                .map_err(|source| PivotError::CacheFormat {
                    path: path.to_path_buf(),
                    source,
                })?;
        }
    }
    writer
        .into_inner()
        .map_err(|e| PivotError::persistence("encode", path, e.into_error()))
}

/// Write to a sibling temp file, then rename over `path`.
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> PivotResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| PivotError::persistence("create directory", parent, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, contents).map_err(|e| PivotError::persistence("write", &tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| PivotError::persistence("replace", path, e))
}
