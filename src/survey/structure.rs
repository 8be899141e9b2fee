use crate::config::SchemaNames;
use crate::db::{CellValue, Database};
use crate::error::{PivotError, PivotResult};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SurveyId(pub i64);

/// Question ids are global: one question can sit in any number of surveys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QuestionId(pub i64);

impl fmt::Display for SurveyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureRow {
    pub survey_id: SurveyId,
    pub question_id: QuestionId,
    pub in_survey: bool,
}

impl StructureRow {
    pub fn new(survey_id: i64, question_id: i64, in_survey: bool) -> Self {
        Self {
            survey_id: SurveyId(survey_id),
            question_id: QuestionId(question_id),
            in_survey,
        }
    }
}

/// Survey/question membership at one point in time.
///
/// Rows are keyed by (survey, question), so iteration is always in
/// ascending survey then question order and equality ignores the order rows
/// were inserted in. Surveys are tracked on their own as well: a survey with
/// no questions still gets a SELECT block and still counts for equality.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructureSnapshot {
    surveys: BTreeSet<SurveyId>,
    rows: BTreeMap<(SurveyId, QuestionId), bool>,
}

impl StructureSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: impl IntoIterator<Item = StructureRow>) -> PivotResult<Self> {
        let mut snapshot = Self::new();
        for row in rows {
            snapshot.insert(row)?;
        }
        Ok(snapshot)
    }

    /// Add a row. Re-inserting an identical row is a no-op; flipping the
    /// membership of a pair already present is rejected.
    pub fn insert(&mut self, row: StructureRow) -> PivotResult<()> {
        match self.rows.get(&(row.survey_id, row.question_id)) {
            Some(&existing) if existing != row.in_survey => Err(PivotError::InconsistentStructure {
                survey_id: row.survey_id.0,
                question_id: row.question_id.0,
            }),
            Some(_) => Ok(()),
            None => {
                self.surveys.insert(row.survey_id);
                self.rows
                    .insert((row.survey_id, row.question_id), row.in_survey);
                Ok(())
            }
        }
    }

    /// Record a survey whether or not it has any rows.
    pub fn insert_survey(&mut self, survey_id: SurveyId) {
        self.surveys.insert(survey_id);
    }

    pub fn rows(&self) -> impl Iterator<Item = StructureRow> + '_ {
        self.rows
            .iter()
            .map(|(&(survey_id, question_id), &in_survey)| StructureRow {
                survey_id,
                question_id,
                in_survey,
            })
    }

    /// Rows of one survey, ascending by question.
    pub fn survey_rows(&self, survey_id: SurveyId) -> impl Iterator<Item = StructureRow> + '_ {
        self.rows
            .range((survey_id, QuestionId(i64::MIN))..=(survey_id, QuestionId(i64::MAX)))
            .map(|(&(survey_id, question_id), &in_survey)| StructureRow {
                survey_id,
                question_id,
                in_survey,
            })
    }

    /// Number of structure rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// No surveys at all (and therefore no rows).
    pub fn is_empty(&self) -> bool {
        self.surveys.is_empty()
    }

    /// Every known survey, ascending, including ones without questions.
    pub fn surveys(&self) -> Vec<SurveyId> {
        self.surveys.iter().copied().collect()
    }

    /// Distinct questions across all surveys, ascending.
    pub fn questions(&self) -> Vec<QuestionId> {
        self.rows
            .keys()
            .map(|&(_, q)| q)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Membership of a pair, or `None` if the snapshot has no row for it.
    pub fn in_survey(&self, survey_id: SurveyId, question_id: QuestionId) -> Option<bool> {
        self.rows.get(&(survey_id, question_id)).copied()
    }
}

/// Reads the completed survey × question membership relation.
pub struct StructureReader<'a> {
    names: &'a SchemaNames,
}

impl<'a> StructureReader<'a> {
    pub fn new(names: &'a SchemaNames) -> Self {
        Self { names }
    }

    pub fn survey_list_sql(&self) -> String {
        format!(
            "SELECT SurveyId FROM {} ORDER BY SurveyId",
            self.names.survey_table
        )
    }

    /// Members of `survey_id` flagged 1, every other known question flagged 0.
    pub fn membership_sql(&self, survey_id: SurveyId) -> String {
        format!(
            "SELECT * FROM (\
             SELECT SurveyId, QuestionId, 1 AS InSurvey FROM {st} WHERE SurveyId = {s} \
             UNION \
             SELECT {s} AS SurveyId, q.QuestionId, 0 AS InSurvey FROM {qt} AS q \
             WHERE NOT EXISTS (SELECT * FROM {st} AS m WHERE m.SurveyId = {s} AND m.QuestionId = q.QuestionId)\
             ) AS t ORDER BY QuestionId",
            st = self.names.structure_table,
            qt = self.names.question_table,
            s = survey_id,
        )
    }

    pub async fn read<D: Database + ?Sized>(&self, db: &D) -> PivotResult<StructureSnapshot> {
        let surveys = db.execute(&self.survey_list_sql()).await?;
        let mut snapshot = StructureSnapshot::new();

        for row in &surveys.rows {
            let survey_id = SurveyId(decode_int(row, 0, "SurveyId")?);
            snapshot.insert_survey(survey_id);
            let membership = db.execute(&self.membership_sql(survey_id)).await?;
            debug!(
                "Survey {} has {} structure rows",
                survey_id, membership.row_count
            );

            for cells in &membership.rows {
                let in_survey = match decode_int(cells, 2, "InSurvey")? {
                    0 => false,
                    1 => true,
                    other => {
                        return Err(PivotError::MalformedResult {
                            detail: format!("InSurvey must be 0 or 1, got {}", other),
                        })
                    }
                };
                snapshot.insert(StructureRow::new(
                    decode_int(cells, 0, "SurveyId")?,
                    decode_int(cells, 1, "QuestionId")?,
                    in_survey,
                ))?;
            }
        }

        Ok(snapshot)
    }
}

fn decode_int(cells: &[CellValue], idx: usize, column: &str) -> PivotResult<i64> {
    let cell = cells.get(idx).ok_or_else(|| PivotError::MalformedResult {
        detail: format!("missing {} column", column),
    })?;
    cell.as_i64().ok_or_else(|| PivotError::MalformedResult {
        detail: format!("{} is not an integer: {}", column, cell.display()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_equality_ignores_insert_order() {
        let a = StructureSnapshot::from_rows([
            StructureRow::new(1, 10, true),
            StructureRow::new(1, 20, false),
            StructureRow::new(2, 10, true),
        ])
        .unwrap();
        let b = StructureSnapshot::from_rows([
            StructureRow::new(2, 10, true),
            StructureRow::new(1, 20, false),
            StructureRow::new(1, 10, true),
        ])
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_snapshot_equality_sees_flag_change() {
        let a = StructureSnapshot::from_rows([StructureRow::new(1, 10, true)]).unwrap();
        let b = StructureSnapshot::from_rows([StructureRow::new(1, 10, false)]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_snapshot_equality_sees_same_count_different_pairs() {
        let a = StructureSnapshot::from_rows([
            StructureRow::new(1, 10, true),
            StructureRow::new(1, 20, true),
        ])
        .unwrap();
        let b = StructureSnapshot::from_rows([
            StructureRow::new(1, 10, true),
            StructureRow::new(1, 30, true),
        ])
        .unwrap();
        assert_eq!(a.len(), b.len());
        assert_ne!(a, b);
    }

    #[test]
    fn test_rows_iterate_sorted() {
        let snapshot = StructureSnapshot::from_rows([
            StructureRow::new(2, 5, true),
            StructureRow::new(1, 30, false),
            StructureRow::new(1, 4, true),
        ])
        .unwrap();
        let keys: Vec<(i64, i64)> = snapshot
            .rows()
            .map(|r| (r.survey_id.0, r.question_id.0))
            .collect();
        assert_eq!(keys, vec![(1, 4), (1, 30), (2, 5)]);
    }

    #[test]
    fn test_duplicate_rows_collapse_conflicts_fail() {
        let mut snapshot = StructureSnapshot::new();
        snapshot.insert(StructureRow::new(1, 10, true)).unwrap();
        snapshot.insert(StructureRow::new(1, 10, true)).unwrap();
        assert_eq!(snapshot.len(), 1);

        let err = snapshot.insert(StructureRow::new(1, 10, false)).unwrap_err();
        assert!(matches!(
            err,
            PivotError::InconsistentStructure {
                survey_id: 1,
                question_id: 10
            }
        ));
    }

    #[test]
    fn test_surveys_and_questions_are_distinct_ascending() {
        let snapshot = StructureSnapshot::from_rows([
            StructureRow::new(3, 20, true),
            StructureRow::new(3, 10, false),
            StructureRow::new(1, 20, false),
            StructureRow::new(1, 10, true),
        ])
        .unwrap();
        assert_eq!(snapshot.surveys(), vec![SurveyId(1), SurveyId(3)]);
        assert_eq!(snapshot.questions(), vec![QuestionId(10), QuestionId(20)]);
        assert_eq!(snapshot.in_survey(SurveyId(1), QuestionId(10)), Some(true));
        assert_eq!(snapshot.in_survey(SurveyId(1), QuestionId(99)), None);
    }

    #[test]
    fn test_survey_without_questions_is_kept() {
        let mut with_survey = StructureSnapshot::new();
        with_survey.insert_survey(SurveyId(1));
        assert!(!with_survey.is_empty());
        assert_eq!(with_survey.len(), 0);
        assert_eq!(with_survey.surveys(), vec![SurveyId(1)]);
        assert!(with_survey.questions().is_empty());
        assert_ne!(with_survey, StructureSnapshot::new());

        let mut other = StructureSnapshot::new();
        other.insert_survey(SurveyId(2));
        assert_ne!(with_survey, other);
    }

    #[test]
    fn test_survey_rows_stay_within_survey() {
        let snapshot = StructureSnapshot::from_rows([
            StructureRow::new(1, 10, true),
            StructureRow::new(2, 5, false),
            StructureRow::new(2, 7, true),
            StructureRow::new(3, 1, true),
        ])
        .unwrap();
        let questions: Vec<i64> = snapshot
            .survey_rows(SurveyId(2))
            .map(|r| r.question_id.0)
            .collect();
        assert_eq!(questions, vec![5, 7]);
        assert_eq!(snapshot.survey_rows(SurveyId(9)).count(), 0);
    }

    #[test]
    fn test_reader_sql_uses_configured_names() {
        let names = SchemaNames {
            survey_table: "dbo.Survey".to_string(),
            structure_table: "dbo.SurveyStructure".to_string(),
            question_table: "dbo.Question".to_string(),
            ..SchemaNames::default()
        };
        let reader = StructureReader::new(&names);
        assert_eq!(
            reader.survey_list_sql(),
            "SELECT SurveyId FROM dbo.Survey ORDER BY SurveyId"
        );
        let sql = reader.membership_sql(SurveyId(4));
        assert!(sql.contains("FROM dbo.SurveyStructure WHERE SurveyId = 4 UNION SELECT 4 AS SurveyId"));
        assert!(sql.contains("FROM dbo.Question AS q WHERE NOT EXISTS"));
        assert!(sql.ends_with("ORDER BY QuestionId"));
    }

    #[test]
    fn test_decode_int_reports_column() {
        let cells = vec![CellValue::Int32(1), CellValue::Text("x".into())];
        assert_eq!(decode_int(&cells, 0, "SurveyId").unwrap(), 1);
        let err = decode_int(&cells, 1, "QuestionId").unwrap_err();
        assert!(err.to_string().contains("QuestionId is not an integer: x"));
        let err = decode_int(&cells, 2, "InSurvey").unwrap_err();
        assert!(err.to_string().contains("missing InSurvey column"));
    }
}
