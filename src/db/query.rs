use crate::error::{PivotError, PivotResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::error::Error as StdError;
use std::fmt;
use std::time::{Duration, Instant};
use tokio_postgres::{types::Type, Client, Column, Row};

/// The slice of a SQL connection the extraction core relies on: run a
/// parameterless statement and get a table back, then let go of the handle.
#[async_trait::async_trait]
pub trait Database: Send + Sync {
    async fn execute(&self, sql: &str) -> PivotResult<QueryResult>;

    /// Release the connection. Called exactly once, on every exit path.
    async fn close(self)
    where
        Self: Sized;
}

/// Categorized error types for SQL query failures.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorCategory {
    /// Syntax errors (SQLSTATE class 42 - syntax_error, etc.)
    Syntax,
    /// Semantic errors (missing table/column, ambiguous reference)
    Semantic,
    /// Execution/runtime errors (division by zero, program limits)
    Execution,
    /// Transaction state errors (e.g., transaction aborted)
    Transaction,
    /// Connection/communication errors
    Connection,
    /// Unknown or unclassified errors
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Syntax => write!(f, "Syntax Error"),
            ErrorCategory::Semantic => write!(f, "Semantic Error"),
            ErrorCategory::Execution => write!(f, "Execution Error"),
            ErrorCategory::Transaction => write!(f, "Transaction Error"),
            ErrorCategory::Connection => write!(f, "Connection Error"),
            ErrorCategory::Unknown => write!(f, "Error"),
        }
    }
}

/// Structured error with context from a PostgreSQL error response.
#[derive(Debug, Clone)]
pub struct StructuredError {
    pub category: ErrorCategory,
    /// SQLSTATE error code (e.g., "42601" for syntax_error)
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// Table associated with the error
    pub table: Option<String>,
    /// Computed line number (1-based) from the server's byte position
    pub line: Option<usize>,
    /// Computed column number (1-based) from the server's byte position
    pub col: Option<usize>,
}

impl StructuredError {
    /// Build from a tokio_postgres error, using the query text to turn the
    /// reported byte position into a line/column pair.
    pub fn from_pg_error(err: &tokio_postgres::Error, query: &str) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let code_str = db_err.code().code().to_string();
            let category = categorize_sqlstate(&code_str);
            let position = db_err.position().and_then(|p| match p {
                tokio_postgres::error::ErrorPosition::Original(pos) => Some(*pos),
                tokio_postgres::error::ErrorPosition::Internal { .. } => None,
            });

            let (line, col) = if let Some(pos) = position {
                byte_offset_to_line_col(query, pos as usize)
            } else {
                (None, None)
            };

            StructuredError {
                category,
                code: code_str,
                message: db_err.message().to_string(),
                detail: db_err.detail().map(|s| s.to_string()),
                hint: db_err.hint().map(|s| s.to_string()),
                table: db_err.table().map(|s| s.to_string()),
                line,
                col,
            }
        } else {
            // Non-database error (connection, protocol, etc.)
            let category = if err.source().is_some() {
                ErrorCategory::Connection
            } else {
                ErrorCategory::Unknown
            };
            StructuredError {
                category,
                code: String::new(),
                message: err.to_string(),
                detail: err.source().map(|e| e.to_string()),
                hint: None,
                table: None,
                line: None,
                col: None,
            }
        }
    }

    pub fn from_string(msg: String) -> Self {
        StructuredError {
            category: ErrorCategory::Unknown,
            code: String::new(),
            message: msg,
            detail: None,
            hint: None,
            table: None,
            line: None,
            col: None,
        }
    }

    /// Multi-line diagnostic printed when a run aborts.
    pub fn display_full(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("{}: {}", self.category, self.message));

        if let (Some(line), Some(col)) = (self.line, self.col) {
            lines.push(format!("  at line {}, column {}", line, col));
        }

        if !self.code.is_empty() {
            lines.push(format!("  SQLSTATE: {}", self.code));
        }

        if let Some(detail) = &self.detail {
            lines.push(format!("  Detail: {}", detail));
        }

        if let Some(hint) = &self.hint {
            lines.push(format!("  Hint: {}", hint));
        }

        if let Some(table) = &self.table {
            lines.push(format!("  Table: {}", table));
        }

        lines.join("\n")
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Convert a 1-based byte offset in a query string to (line, column) both 1-based.
fn byte_offset_to_line_col(query: &str, byte_pos: usize) -> (Option<usize>, Option<usize>) {
    if byte_pos == 0 || query.is_empty() {
        return (Some(1), Some(1));
    }
    let target = (byte_pos - 1).min(query.len()); // PostgreSQL positions are 1-based
    let mut line = 1usize;
    let mut col = 1usize;
    for (i, ch) in query.char_indices() {
        if i >= target {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (Some(line), Some(col))
}

fn categorize_sqlstate(code: &str) -> ErrorCategory {
    if code.len() < 2 {
        return ErrorCategory::Unknown;
    }
    let class = &code[..2];
    match class {
        // Class 42: Syntax Error or Access Rule Violation
        "42" => {
            if code == "42601" || code == "42000" {
                ErrorCategory::Syntax
            } else {
                // 42P01 = undefined_table, 42703 = undefined_column, etc.
                ErrorCategory::Semantic
            }
        }
        "22" | "23" => ErrorCategory::Execution,
        "25" | "40" => ErrorCategory::Transaction,
        "08" => ErrorCategory::Connection,
        // 54 = program_limit_exceeded, e.g. too many columns in the pivot
        "53" | "54" | "55" | "57" => ErrorCategory::Execution,
        _ => ErrorCategory::Unknown,
    }
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<CellValue>>,
    pub row_count: usize,
    pub execution_time: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub max_width: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(serde_json::Value),
}

impl CellValue {
    pub fn display(&self) -> String {
        match self {
            CellValue::Null => "NULL".to_string(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Int16(i) => i.to_string(),
            CellValue::Int32(i) => i.to_string(),
            CellValue::Int64(i) => i.to_string(),
            CellValue::Float32(f) => f.to_string(),
            CellValue::Float64(f) => f.to_string(),
            CellValue::Text(s) => s.clone(),
            CellValue::Bytes(b) => format!("[{} bytes]", b.len()),
            CellValue::Date(d) => d.to_string(),
            CellValue::Time(t) => t.to_string(),
            CellValue::DateTime(dt) => dt.to_string(),
            CellValue::TimestampTz(dt) => dt.to_string(),
            CellValue::Json(j) => j.to_string(),
        }
    }

    pub fn display_width(&self) -> usize {
        unicode_width::UnicodeWidthStr::width(self.display().as_str())
    }

    /// Integer view of the cell, whatever width the server picked.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Int16(i) => Some(i64::from(*i)),
            CellValue::Int32(i) => Some(i64::from(*i)),
            CellValue::Int64(i) => Some(*i),
            CellValue::Bool(b) => Some(i64::from(*b)),
            CellValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl QueryResult {
    /// Build a result from column names and already-typed rows.
    pub fn from_rows(names: &[&str], rows: Vec<Vec<CellValue>>) -> Self {
        let mut columns: Vec<ColumnInfo> = names
            .iter()
            .map(|name| ColumnInfo {
                name: name.to_string(),
                max_width: name.len(),
            })
            .collect();
        widen_columns(&mut columns, &rows);
        Self {
            row_count: rows.len(),
            columns,
            rows,
            execution_time: Duration::ZERO,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Prepare `sql`, run it without parameters and collect every row.
///
/// Column metadata comes from the prepared statement, so a query that
/// matches nothing still reports its columns.
pub async fn execute_query(client: &Client, sql: &str) -> PivotResult<QueryResult> {
    let start = Instant::now();
    let sql_trimmed = sql.trim();

    let statement = client
        .prepare(sql_trimmed)
        .await
        .map_err(|e| PivotError::QueryExecution(StructuredError::from_pg_error(&e, sql_trimmed)))?;
    let rows = client
        .query(&statement, &[])
        .await
        .map_err(|e| PivotError::QueryExecution(StructuredError::from_pg_error(&e, sql_trimmed)))?;

    Ok(parse_rows(statement.columns(), &rows, start.elapsed()))
}

fn parse_rows(columns: &[Column], rows: &[Row], execution_time: Duration) -> QueryResult {
    let mut columns: Vec<ColumnInfo> = columns
        .iter()
        .map(|col| ColumnInfo {
            name: col.name().to_string(),
            max_width: col.name().len(),
        })
        .collect();

    let mut result_rows: Vec<Vec<CellValue>> = Vec::with_capacity(rows.len());

    for row in rows {
        let row_values: Vec<CellValue> = row
            .columns()
            .iter()
            .enumerate()
            .map(|(i, col)| extract_value(row, i, col.type_()))
            .collect();
        result_rows.push(row_values);
    }

    widen_columns(&mut columns, &result_rows);

    QueryResult {
        row_count: result_rows.len(),
        columns,
        rows: result_rows,
        execution_time,
    }
}

fn widen_columns(columns: &mut [ColumnInfo], rows: &[Vec<CellValue>]) {
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(column) = columns.get_mut(i) {
                column.max_width = column.max_width.max(cell.display_width());
            }
        }
    }
}

fn extract_value(row: &Row, idx: usize, pg_type: &Type) -> CellValue {
    match *pg_type {
        Type::BOOL => row
            .try_get::<_, Option<bool>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Bool)
            .unwrap_or(CellValue::Null),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Int16)
            .unwrap_or(CellValue::Null),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Int32)
            .unwrap_or(CellValue::Null),
        Type::INT8 => row
            .try_get::<_, Option<i64>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Int64)
            .unwrap_or(CellValue::Null),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Float32)
            .unwrap_or(CellValue::Null),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Float64)
            .unwrap_or(CellValue::Null),
        Type::TEXT | Type::VARCHAR | Type::NAME | Type::CHAR | Type::BPCHAR => row
            .try_get::<_, Option<String>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Text)
            .unwrap_or(CellValue::Null),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Bytes)
            .unwrap_or(CellValue::Null),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Date)
            .unwrap_or(CellValue::Null),
        Type::TIME => row
            .try_get::<_, Option<NaiveTime>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Time)
            .unwrap_or(CellValue::Null),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)
            .ok()
            .flatten()
            .map(CellValue::DateTime)
            .unwrap_or(CellValue::Null),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)
            .ok()
            .flatten()
            .map(CellValue::TimestampTz)
            .unwrap_or(CellValue::Null),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Json)
            .unwrap_or(CellValue::Null),
        _ => {
            // Fallback: try to get as string
            row.try_get::<_, Option<String>>(idx)
                .ok()
                .flatten()
                .map(CellValue::Text)
                .unwrap_or(CellValue::Null)
        }
    }
}
