use crate::db::{CellValue, QueryResult};
use crate::error::{PivotError, PivotResult};
use crate::survey::cache::write_atomically;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Tsv,
    Json,
}

impl OutputFormat {
    pub fn render(&self, result: &QueryResult) -> csv::Result<Vec<u8>> {
        match self {
            OutputFormat::Csv => to_delimited(result, b','),
            OutputFormat::Tsv => to_delimited(result, b'\t'),
            OutputFormat::Json => Ok(to_json(result).into_bytes()),
        }
    }
}

/// Render `result` and replace whatever is at `path`.
pub fn write_export(result: &QueryResult, path: &Path, format: OutputFormat) -> PivotResult<()> {
    let contents = format
        .render(result)
        .map_err(|e| PivotError::persistence("encode", path, e.into()))?;
    write_atomically(path, &contents)
}

/// Header plus one record per row; NULL becomes an empty field.
fn to_delimited(result: &QueryResult, delimiter: u8) -> csv::Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(Vec::new());
    writer.write_record(result.columns.iter().map(|c| c.name.as_str()))?;
    for row in &result.rows {
        writer.write_record(row.iter().map(cell_to_csv))?;
    }
    writer.into_inner().map_err(|e| e.into_error().into())
}

pub fn to_json(result: &QueryResult) -> String {
    let mut rows_json: Vec<serde_json::Value> = Vec::new();

    for row in &result.rows {
        let mut obj = serde_json::Map::new();
        for (i, cell) in row.iter().enumerate() {
            let col_name = result
                .columns
                .get(i)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| format!("column_{}", i));
            obj.insert(col_name, cell_to_json(cell));
        }
        rows_json.push(serde_json::Value::Object(obj));
    }

    serde_json::to_string_pretty(&rows_json).unwrap_or_else(|_| "[]".to_string())
}

/// Aligned text view of the first and last `limit` rows, for the console.
pub fn preview(result: &QueryResult, limit: usize) -> String {
    let widths: Vec<usize> = result.columns.iter().map(|c| c.max_width).collect();
    let mut lines = vec![
        format_line(result.columns.iter().map(|c| c.name.clone()), &widths),
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    ];

    let render = |row: &Vec<CellValue>| format_line(row.iter().map(CellValue::display), &widths);
    if result.rows.len() <= limit * 2 {
        lines.extend(result.rows.iter().map(render));
    } else {
        lines.extend(result.rows.iter().take(limit).map(render));
        lines.push(format!("... {} more rows ...", result.rows.len() - limit * 2));
        lines.extend(result.rows[result.rows.len() - limit..].iter().map(render));
    }

    lines.join("\n")
}

fn format_line(cells: impl Iterator<Item = String>, widths: &[usize]) -> String {
    cells
        .zip(widths)
        .map(|(text, &width)| {
            let pad = width.saturating_sub(unicode_width::UnicodeWidthStr::width(text.as_str()));
            format!("{}{}", text, " ".repeat(pad))
        })
        .collect::<Vec<_>>()
        .join(" | ")
        .trim_end()
        .to_string()
}

fn cell_to_csv(cell: &CellValue) -> String {
    match cell {
        CellValue::Null => String::new(),
        other => other.display(),
    }
}

fn cell_to_json(cell: &CellValue) -> serde_json::Value {
    match cell {
        CellValue::Null => serde_json::Value::Null,
        CellValue::Bool(b) => serde_json::Value::Bool(*b),
        CellValue::Int16(i) => serde_json::json!(*i),
        CellValue::Int32(i) => serde_json::json!(*i),
        CellValue::Int64(i) => serde_json::json!(*i),
        CellValue::Float32(f) => serde_json::json!(*f),
        CellValue::Float64(f) => serde_json::json!(*f),
        CellValue::Json(j) => j.clone(),
        other => serde_json::Value::String(other.display()),
    }
}
