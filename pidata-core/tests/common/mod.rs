//! Shared fixtures for integration tests
//!
//! `FakeEngine` stands in for the DuckDB CLI. It keeps the contents of every
//! file it "writes" in memory, so the copy / count / describe / window
//! statements issued by the core behave like they would against real files.

#![allow(dead_code)]

use pidata_core::engine::{ProcessOutput, ProcessRunner};
use pidata_core::{Error, Result, Row};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Rows plus declared column types.
#[derive(Debug, Clone)]
pub struct FakeTable {
    pub columns: Vec<(String, String)>,
    pub rows: Vec<Row>,
}

impl FakeTable {
    pub fn new(columns: &[(&str, &str)], rows: Value) -> Self {
        Self {
            columns: columns
                .iter()
                .map(|(n, t)| (n.to_string(), t.to_string()))
                .collect(),
            rows: serde_json::from_value(rows).expect("rows must be an array of objects"),
        }
    }

    fn rows_json(rows: &[Row]) -> String {
        serde_json::to_string(rows).expect("rows serialize")
    }

    fn to_csv(&self) -> String {
        let mut out = self
            .columns
            .iter()
            .map(|(n, _)| n.as_str())
            .collect::<Vec<_>>()
            .join(",");
        out.push('\n');
        for row in &self.rows {
            let cells: Vec<String> = self
                .columns
                .iter()
                .map(|(n, _)| match row.get(n) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                })
                .collect();
            out.push_str(&cells.join(","));
            out.push('\n');
        }
        out
    }
}

/// In-memory stand-in for the engine binary.
#[derive(Default)]
pub struct FakeEngine {
    /// SQL fragment -> table answered for statements containing it
    sources: Mutex<Vec<(String, FakeTable)>>,
    files: Mutex<HashMap<PathBuf, FakeTable>>,
    pub statements: Mutex<Vec<String>>,
    /// stdin received by non-engine programs (the chart renderer)
    pub renders: Mutex<Vec<Vec<u8>>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer statements containing `fragment` with `table`.
    pub fn register(&self, fragment: &str, table: FakeTable) {
        self.sources
            .lock()
            .unwrap()
            .push((fragment.to_string(), table));
    }

    pub fn spawn_count(&self) -> usize {
        self.statements.lock().unwrap().len()
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    fn source_for(&self, sql: &str) -> Option<FakeTable> {
        self.sources
            .lock()
            .unwrap()
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, table)| table.clone())
    }

    fn file(&self, sql: &str) -> Option<FakeTable> {
        let path = quoted_after(sql, "read_parquet('")?;
        self.files.lock().unwrap().get(Path::new(&path)).cloned()
    }

    /// `SELECT SUM("col") AS "alias" FROM read_parquet(...)` without grouping,
    /// summed over the rows of a previously written file.
    fn sum_over_file(&self, sql: &str) -> Option<FakeTable> {
        if sql.contains(" GROUP BY ") {
            return None;
        }
        let column = quoted_between(sql, "SUM(\"", '"')?;
        let alias = quoted_between(sql, ") AS \"", '"')?;
        let source = self.file(sql)?;
        let total: f64 = source
            .rows
            .iter()
            .filter_map(|row| row.get(&column).and_then(Value::as_f64))
            .sum();
        Some(FakeTable::new(
            &[(alias.as_str(), "DOUBLE")],
            serde_json::json!([{ alias.as_str(): total }]),
        ))
    }

    fn answer(&self, sql: &str) -> Result<ProcessOutput> {
        if let Some(rest) = sql.strip_prefix("COPY (") {
            let (inner, target) = rest
                .rsplit_once(") TO '")
                .expect("COPY statement has a target");
            let path = target.split('\'').next().unwrap_or_default().to_string();

            let mut table = match self
                .sum_over_file(inner)
                .or_else(|| self.source_for(inner))
                .or_else(|| self.file(inner))
            {
                Some(table) => table,
                None => return Ok(ProcessOutput::failed(1, format!("Catalog Error: no data for {}", inner))),
            };
            if let Some(limit) = trailing_limit(inner) {
                table.rows.truncate(limit);
            }

            let bytes = if target.contains("FORMAT CSV") {
                table.to_csv().into_bytes()
            } else {
                b"PAR1".to_vec()
            };
            std::fs::write(&path, bytes)?;
            self.files.lock().unwrap().insert(PathBuf::from(path), table);
            return Ok(ProcessOutput::ok(""));
        }

        if sql.starts_with("SELECT COUNT(*) AS row_count FROM read_parquet(") {
            let table = self.file(sql).expect("count over a written file");
            return Ok(ProcessOutput::ok(format!(
                r#"[{{"row_count":{}}}]"#,
                table.rows.len()
            )));
        }

        if sql.starts_with("DESCRIBE SELECT * FROM read_parquet(") {
            let table = self.file(sql).expect("describe over a written file");
            let rows: Vec<Value> = table
                .columns
                .iter()
                .map(|(name, data_type)| {
                    serde_json::json!({
                        "column_name": name,
                        "column_type": data_type,
                        "null": "YES",
                    })
                })
                .collect();
            return Ok(ProcessOutput::ok(serde_json::to_string(&rows)?));
        }

        if sql.starts_with("SELECT * FROM read_parquet(") {
            let table = self.file(sql).expect("window over a written file");
            let limit = number_after(sql, " LIMIT ").unwrap_or(usize::MAX);
            let offset = number_after(sql, " OFFSET ").unwrap_or(0);
            let window: Vec<Row> = table.rows.into_iter().skip(offset).take(limit).collect();
            return Ok(ProcessOutput::ok(FakeTable::rows_json(&window)));
        }

        match self.source_for(sql) {
            Some(table) => {
                let mut rows = table.rows;
                if let Some(limit) = trailing_limit(sql) {
                    rows.truncate(limit);
                }
                Ok(ProcessOutput::ok(FakeTable::rows_json(&rows)))
            }
            None => Ok(ProcessOutput::failed(
                1,
                format!("Parser Error: unexpected statement: {}", sql),
            )),
        }
    }
}

impl ProcessRunner for FakeEngine {
    fn run(
        &self,
        program: &Path,
        args: &[String],
        stdin: Option<&[u8]>,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if program != Path::new("duckdb") {
            self.renders
                .lock()
                .unwrap()
                .push(stdin.unwrap_or_default().to_vec());
            return Ok(ProcessOutput::ok(b"\x89PNG".to_vec()));
        }
        let sql = args[3].clone();
        self.statements.lock().unwrap().push(sql.clone());
        self.answer(&sql)
    }
}

fn quoted_after(text: &str, marker: &str) -> Option<String> {
    let start = text.find(marker)? + marker.len();
    let end = start + text[start..].find('\'')?;
    Some(text[start..end].to_string())
}

fn quoted_between(text: &str, marker: &str, end: char) -> Option<String> {
    let start = text.find(marker)? + marker.len();
    let len = text[start..].find(end)?;
    Some(text[start..start + len].to_string())
}

fn number_after(text: &str, marker: &str) -> Option<usize> {
    let start = text.rfind(marker)? + marker.len();
    text[start..]
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .and_then(|n| n.parse().ok())
}

/// `... LIMIT <n>` at the very end of a statement.
fn trailing_limit(sql: &str) -> Option<usize> {
    let (head, tail) = sql.trim_end().rsplit_once(' ')?;
    if head.trim_end().ends_with("LIMIT") {
        tail.parse().ok()
    } else {
        None
    }
}

/// The three-row `customers` table.
pub fn customers() -> FakeTable {
    FakeTable::new(
        &[
            ("id", "INTEGER"),
            ("name", "VARCHAR"),
            ("region", "VARCHAR"),
            ("signup_date", "DATE"),
        ],
        serde_json::json!([
            {"id": 1, "name": "Ada", "region": "EU", "signup_date": "2024-01-03"},
            {"id": 2, "name": "Grace", "region": "US", "signup_date": "2024-02-11"},
            {"id": 3, "name": "Linus", "region": "EU", "signup_date": null}
        ]),
    )
}

/// `n` rows of a single integer column.
pub fn numbers(n: usize) -> FakeTable {
    let rows: Vec<Value> = (0..n).map(|i| serde_json::json!({ "n": i })).collect();
    FakeTable::new(&[("n", "BIGINT")], Value::Array(rows))
}

/// Orders whose amounts sum to 1200.00.
pub fn orders() -> FakeTable {
    FakeTable::new(
        &[("order_id", "INTEGER"), ("amount", "DECIMAL(10,2)")],
        serde_json::json!([
            {"order_id": 1, "amount": 250.00},
            {"order_id": 2, "amount": 450.50},
            {"order_id": 3, "amount": 499.50}
        ]),
    )
}
