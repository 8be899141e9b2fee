//! Pivot query synthesis.
//!
//! One SELECT per survey, each projecting a column for every question known
//! anywhere in the snapshot, glued together with `UNION`:
//!
//! ```text
//! SELECT UserId, 1 AS SurveyId, <ANS_Q10>, <ANS_Q20> FROM "User" AS u WHERE EXISTS (...)
//! UNION
//! SELECT UserId, 2 AS SurveyId, <ANS_Q10>, <ANS_Q20> FROM "User" AS u WHERE EXISTS (...)
//! ```
//!
//! A question that belongs to the survey becomes a correlated lookup that
//! falls back to [`UNANSWERED`]; one that does not becomes a `NULL` cast to
//! the answer type. PostgreSQL resolves `UNION` column types pairwise, and
//! two untyped `NULL`s settle on `text` before ever meeting an integer
//! block. Ordering always follows ascending ids, never hash order, so equal
//! snapshots produce identical text.
use super::structure::{QuestionId, StructureSnapshot, SurveyId};
use crate::config::SchemaNames;

/// Value reported for a question that is part of the survey but has no answer.
pub const UNANSWERED: i64 = -1;

/// Build the full pivot query. An empty snapshot yields an empty string.
pub fn synthesize(snapshot: &StructureSnapshot, names: &SchemaNames) -> String {
    let questions = snapshot.questions();
    let blocks: Vec<String> = snapshot
        .surveys()
        .into_iter()
        .map(|survey_id| compile_survey_block(snapshot, survey_id, &questions, names))
        .collect();
    blocks.join(" UNION ")
}

pub fn column_alias(question_id: QuestionId) -> String {
    format!("ANS_Q{}", question_id)
}

fn compile_survey_block(
    snapshot: &StructureSnapshot,
    survey_id: SurveyId,
    questions: &[QuestionId],
    names: &SchemaNames,
) -> String {
    let mut projections = vec![String::from("UserId"), format!("{} AS SurveyId", survey_id)];
    projections.extend(questions.iter().map(|&question_id| {
        let in_survey = snapshot
            .in_survey(survey_id, question_id)
            .unwrap_or(false);
        compile_answer_column(survey_id, question_id, in_survey, names)
    }));

    format!(
        "SELECT {} FROM {} AS u WHERE EXISTS (SELECT * FROM {} AS a WHERE u.UserId = a.UserId AND a.SurveyId = {})",
        projections.join(", "),
        names.user_table,
        names.answer_table,
        survey_id
    )
}

fn compile_answer_column(
    survey_id: SurveyId,
    question_id: QuestionId,
    in_survey: bool,
    names: &SchemaNames,
) -> String {
    let alias = column_alias(question_id);
    if !in_survey {
        return format!("CAST(NULL AS {}) AS {}", names.answer_value_type, alias);
    }
    format!(
        "COALESCE((SELECT a.{} FROM {} AS a WHERE a.UserId = u.UserId AND a.SurveyId = {} AND a.QuestionId = {}), {}) AS {}",
        names.answer_value_column, names.answer_table, survey_id, question_id, UNANSWERED, alias
    )
}
