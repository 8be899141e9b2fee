//! Survey structure tracking and pivot extraction.
//!
//! ```text
//! StructureReader ──▶ StructureCache ──(changed?)──▶ synthesize
//!                           │
//!                           ▼
//!              cached pivot query ──▶ ExtractionDriver ──▶ export
//! ```
pub mod cache;
pub mod driver;
pub mod structure;
pub mod synth;

pub use cache::{CacheAction, StructureCache};
pub use driver::{AnswerTable, ExtractionDriver, RunReport};
pub use structure::{QuestionId, StructureReader, StructureRow, StructureSnapshot, SurveyId};
pub use synth::{column_alias, synthesize, UNANSWERED};
