//! Helpers for reading large results piecewise
//!
//! A summary describes a result in bounded text (schema, row count, a few
//! rows). A chunk plan splits the result into row windows that each fit a
//! single preview call, so an agent can walk the data without ever holding
//! all of it.

use crate::analysis::MAX_PREVIEW_ROWS;
use crate::error::{Error, Result};
use crate::results::ResultStore;
use crate::types::{ResultMeta, Row};
use crate::workspace::Workspace;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Rows shown in a summary unless the caller asks for fewer.
pub const DEFAULT_SUMMARY_ROWS: usize = 10;
/// Upper bound on rows shown in a summary.
pub const MAX_SUMMARY_ROWS: usize = 50;
/// Characters kept per rendered cell.
pub const MAX_CELL_CHARS: usize = 80;
/// Chunks listed explicitly in a plan.
pub const MAX_LISTED_CHUNKS: usize = 100;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub result_id: String,
    pub row_count: u64,
    pub column_count: usize,
    pub sample_rows: usize,
    /// Markdown rendering
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub index: u64,
    pub offset: u64,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkPlan {
    pub result_id: String,
    pub row_count: u64,
    pub chunk_size: usize,
    pub total_chunks: u64,
    pub chunks: Vec<Chunk>,
    /// True when `chunks` lists fewer than `total_chunks`
    pub truncated: bool,
}

/// Bounded markdown summary of a result.
pub fn summarize(
    results: &ResultStore,
    ws: &Workspace,
    result_id: &str,
    rows: Option<usize>,
    cancel: &CancellationToken,
) -> Result<Summary> {
    let meta = results.read_metadata(ws, result_id)?;
    let limit = rows.unwrap_or(DEFAULT_SUMMARY_ROWS).min(MAX_SUMMARY_ROWS);
    let sample = if limit == 0 {
        Vec::new()
    } else {
        results
            .derive_preview(&ResultStore::data_file_path(ws, result_id), limit, cancel)?
            .rows
    };

    Ok(Summary {
        text: render_summary(&meta, &sample),
        result_id: meta.result_id,
        row_count: meta.row_count,
        column_count: meta.columns.len(),
        sample_rows: sample.len(),
    })
}

/// Split a result into consecutive windows of `chunk_size` rows.
pub fn chunk_plan(meta: &ResultMeta, chunk_size: usize) -> Result<ChunkPlan> {
    if chunk_size == 0 || chunk_size > MAX_PREVIEW_ROWS {
        return Err(Error::Validation(format!(
            "chunkSize must be between 1 and {}",
            MAX_PREVIEW_ROWS
        )));
    }
    let size = chunk_size as u64;
    let total_chunks = meta.row_count.div_ceil(size);
    let chunks = (0..total_chunks.min(MAX_LISTED_CHUNKS as u64))
        .map(|index| {
            let offset = index * size;
            Chunk {
                index,
                offset,
                limit: (meta.row_count - offset).min(size) as usize,
            }
        })
        .collect::<Vec<_>>();

    Ok(ChunkPlan {
        result_id: meta.result_id.clone(),
        row_count: meta.row_count,
        chunk_size,
        truncated: (chunks.len() as u64) < total_chunks,
        total_chunks,
        chunks,
    })
}

fn render_summary(meta: &ResultMeta, sample: &[Row]) -> String {
    let mut out = format!(
        "Result {}: {} rows x {} columns\n\n",
        meta.result_id,
        meta.row_count,
        meta.columns.len()
    );
    out.push_str("| column | type | nullable |\n|---|---|---|\n");
    for column in &meta.columns {
        out.push_str(&format!(
            "| {} | {} | {} |\n",
            escape_cell(&column.name),
            column.data_type,
            if column.nullable { "yes" } else { "no" }
        ));
    }

    if !sample.is_empty() {
        let names: Vec<String> = meta.columns.iter().map(|c| c.name.clone()).collect();
        out.push_str(&format!("\nFirst {} rows:\n\n", sample.len()));
        out.push_str(&markdown_table(&names, sample));
    }
    out
}

/// Render rows as a markdown table, truncating long cells.
pub fn markdown_table(columns: &[String], rows: &[Row]) -> String {
    if columns.is_empty() {
        return String::new();
    }
    let header: Vec<String> = columns.iter().map(|c| escape_cell(c)).collect();
    let mut out = format!("| {} |\n|{}|\n", header.join(" | "), vec!["---"; columns.len()].join("|"));
    for row in rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| render_cell(row.get(c).unwrap_or(&Value::Null)))
            .collect();
        out.push_str(&format!("| {} |\n", cells.join(" | ")));
    }
    out
}

fn render_cell(value: &Value) -> String {
    let text = match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let mut cell = escape_cell(&text);
    if cell.chars().count() > MAX_CELL_CHARS {
        cell = cell.chars().take(MAX_CELL_CHARS - 3).collect::<String>() + "...";
    }
    cell
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Column;
    use chrono::Utc;

    fn meta(row_count: u64) -> ResultMeta {
        ResultMeta {
            result_id: "r_00000000aa".into(),
            sql: "SELECT 1".into(),
            row_count,
            columns: vec![Column {
                name: "note".into(),
                data_type: "VARCHAR".into(),
                nullable: true,
            }],
            created_at: Utc::now(),
            tags: vec![],
        }
    }

    #[test]
    fn test_chunk_plan_covers_all_rows() {
        let plan = chunk_plan(&meta(250), 100).unwrap();
        assert_eq!(plan.total_chunks, 3);
        assert_eq!(plan.chunks[2], Chunk { index: 2, offset: 200, limit: 50 });
        assert!(!plan.truncated);
    }

    #[test]
    fn test_chunk_plan_lists_a_bounded_number_of_chunks() {
        let plan = chunk_plan(&meta(1_000_000), 100).unwrap();
        assert_eq!(plan.total_chunks, 10_000);
        assert_eq!(plan.chunks.len(), MAX_LISTED_CHUNKS);
        assert!(plan.truncated);
    }

    #[test]
    fn test_chunk_plan_empty_result() {
        let plan = chunk_plan(&meta(0), 10).unwrap();
        assert_eq!(plan.total_chunks, 0);
        assert!(plan.chunks.is_empty());
    }

    #[test]
    fn test_chunk_size_must_fit_a_preview() {
        assert!(chunk_plan(&meta(10), 0).is_err());
        assert!(chunk_plan(&meta(10), MAX_PREVIEW_ROWS + 1).is_err());
    }

    #[test]
    fn test_markdown_table_truncates_and_escapes() {
        let rows: Vec<Row> = serde_json::from_value(serde_json::json!([
            {"note": "a|b"},
            {"note": "x".repeat(200)},
            {"note": null}
        ]))
        .unwrap();
        let table = markdown_table(&["note".to_string()], &rows);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "| note |");
        assert_eq!(lines[2], "| a\\|b |");
        assert!(lines[3].ends_with("... |"));
        assert_eq!(lines[4], "| NULL |");
    }

    #[test]
    fn test_render_summary_lists_schema() {
        let text = render_summary(&meta(3), &[]);
        assert!(text.starts_with("Result r_00000000aa: 3 rows x 1 columns"));
        assert!(text.contains("| note | VARCHAR | yes |"));
    }
}
