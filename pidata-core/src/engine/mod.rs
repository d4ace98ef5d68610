//! Query runner for the external analytical engine
//!
//! Each call spawns the engine as a subprocess:
//!
//! ```text
//! <binary> <database-target> -json -c <sql>
//! ```
//!
//! Two primitives are exposed on purpose:
//! - [`QueryRunner::run_query`] returns rows inline (discovery, previews, counts)
//! - [`QueryRunner::materialize_to_file`] copies query output to a parquet file
//!   and verifies the row count against the file that was actually written
//!
//! Engine diagnostics are passed through verbatim as [`Error::Execution`].

pub mod process;

pub use process::{ProcessOutput, ProcessRunner, SystemProcessRunner};

use crate::config::{EngineConfig, ENV_DUCKDB_BIN};
use crate::error::{Error, Result};
use crate::sql;
use crate::types::{Column, Row, Tabular};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// File formats the engine can write with `COPY ... TO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Parquet,
    Csv,
    Xlsx,
}

impl FileFormat {
    /// Options clause for `COPY ... TO '<path>' (<options>)`.
    fn copy_options(&self) -> &'static str {
        match self {
            FileFormat::Parquet => "FORMAT PARQUET",
            FileFormat::Csv => "FORMAT CSV, HEADER",
            FileFormat::Xlsx => "FORMAT xlsx, HEADER true",
        }
    }

    /// Statements that must run before the copy in the same invocation.
    fn preamble(&self) -> &'static str {
        match self {
            FileFormat::Xlsx => "INSTALL excel; LOAD excel; ",
            FileFormat::Parquet | FileFormat::Csv => "",
        }
    }
}

/// Runs SQL through the engine binary.
#[derive(Clone)]
pub struct QueryRunner {
    process: Arc<dyn ProcessRunner>,
    binary: PathBuf,
    database: String,
}

impl std::fmt::Debug for QueryRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRunner")
            .field("binary", &self.binary)
            .field("database", &self.database)
            .finish()
    }
}

impl QueryRunner {
    pub fn new(config: &EngineConfig, process: Arc<dyn ProcessRunner>) -> Self {
        Self {
            process,
            binary: config.binary.clone(),
            database: config.database.clone(),
        }
    }

    /// Runner over the real engine binary.
    pub fn system(config: &EngineConfig) -> Self {
        Self::new(config, Arc::new(SystemProcessRunner))
    }

    /// The process runner shared with other subprocess consumers.
    pub fn process(&self) -> Arc<dyn ProcessRunner> {
        Arc::clone(&self.process)
    }

    /// Run a single statement and parse its rows.
    pub fn run_query(&self, sql: &str, cancel: &CancellationToken) -> Result<Tabular> {
        let output = self.invoke(sql, cancel)?;
        parse_json_rows(&output.stdout)
    }

    /// Copy the query's output into a parquet file and return the row count
    /// read back from that file.
    pub fn materialize_to_file(
        &self,
        sql: &str,
        output_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        self.copy_to_file(sql, output_path, FileFormat::Parquet, cancel)?;
        if !output_path.exists() {
            return Err(Error::Execution(format!(
                "engine reported success but {} was not written",
                output_path.display()
            )));
        }
        self.count_file(output_path, cancel)
    }

    /// `COPY (<sql>) TO '<path>' (<format options>)`.
    pub fn copy_to_file(
        &self,
        sql: &str,
        output_path: &Path,
        format: FileFormat,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let statement = format!(
            "{}COPY (\n{}\n) TO {} ({})",
            format.preamble(),
            sql,
            sql::quote_literal(&output_path.to_string_lossy()),
            format.copy_options()
        );
        self.invoke(&statement, cancel)?;
        Ok(())
    }

    /// Authoritative row count of a parquet file.
    pub fn count_file(&self, path: &Path, cancel: &CancellationToken) -> Result<u64> {
        let count_sql = format!(
            "SELECT COUNT(*) AS row_count FROM {}",
            sql::read_parquet(path)
        );
        let tabular = self.run_query(&count_sql, cancel)?;
        tabular
            .scalar()
            .and_then(value_as_u64)
            .ok_or_else(|| {
                Error::Execution(format!(
                    "row count query over {} returned no count",
                    path.display()
                ))
            })
    }

    /// Column schema of a parquet file, as reported by the engine.
    pub fn describe_file(&self, path: &Path, cancel: &CancellationToken) -> Result<Vec<Column>> {
        let describe_sql = format!("DESCRIBE SELECT * FROM {}", sql::read_parquet(path));
        let tabular = self.run_query(&describe_sql, cancel)?;
        tabular.rows.iter().map(column_from_describe_row).collect()
    }

    /// Bounded window over a parquet file.
    pub fn read_file(
        &self,
        path: &Path,
        limit: usize,
        offset: u64,
        cancel: &CancellationToken,
    ) -> Result<Tabular> {
        let read_sql = format!(
            "SELECT * FROM {} LIMIT {} OFFSET {}",
            sql::read_parquet(path),
            limit,
            offset
        );
        self.run_query(&read_sql, cancel)
    }

    fn invoke(&self, sql: &str, cancel: &CancellationToken) -> Result<ProcessOutput> {
        let args = vec![
            self.database.clone(),
            "-json".to_string(),
            "-c".to_string(),
            sql.to_string(),
        ];

        tracing::debug!(database = %self.database, sql = %sql, "running engine statement");

        let output = self
            .process
            .run(&self.binary, &args, None, cancel)
            .map_err(|e| match e {
                Error::Config(msg) => Error::Config(format!(
                    "{} (install DuckDB, or point {} or [engine] binary in config.toml at it)",
                    msg, ENV_DUCKDB_BIN
                )),
                other => other,
            })?;

        if !output.success() {
            let stderr = output.stderr_text();
            tracing::debug!(exit_code = ?output.exit_code, stderr = %stderr, "engine statement failed");
            return Err(Error::Execution(if stderr.is_empty() {
                format!("engine exited with status {:?}", output.exit_code)
            } else {
                stderr
            }));
        }

        Ok(output)
    }
}

/// Parse `-json` output: a JSON array of row objects per statement.
///
/// Empty output means zero rows. When several statements print results the
/// last array wins.
pub fn parse_json_rows(stdout: &[u8]) -> Result<Tabular> {
    let mut last: Option<Vec<Row>> = None;
    for batch in serde_json::Deserializer::from_slice(stdout).into_iter::<Vec<Row>>() {
        let batch = batch.map_err(|e| {
            Error::Execution(format!("could not parse engine output as JSON rows: {}", e))
        })?;
        last = Some(batch);
    }

    let rows = last.unwrap_or_default();
    let columns = rows
        .first()
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default();

    Ok(Tabular {
        columns,
        row_count: rows.len(),
        rows,
    })
}

fn column_from_describe_row(row: &Row) -> Result<Column> {
    let text = |key: &str| row.get(key).and_then(Value::as_str);

    let name = text("column_name")
        .ok_or_else(|| Error::Execution("DESCRIBE output is missing column_name".to_string()))?;
    let data_type = text("column_type")
        .ok_or_else(|| Error::Execution("DESCRIBE output is missing column_type".to_string()))?;
    let nullable = !matches!(text("null"), Some("NO"));

    Ok(Column {
        name: name.to_string(),
        data_type: data_type.to_string(),
        nullable,
    })
}

/// Engine integers may arrive as JSON numbers or as strings (HUGEINT).
pub(crate) fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records invocations and answers with canned outputs in order.
    struct Scripted {
        calls: Mutex<Vec<Vec<String>>>,
        outputs: Mutex<Vec<Result<ProcessOutput>>>,
    }

    impl Scripted {
        fn new(outputs: Vec<Result<ProcessOutput>>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                outputs: Mutex::new(outputs),
            })
        }
    }

    impl ProcessRunner for Scripted {
        fn run(
            &self,
            _program: &Path,
            args: &[String],
            _stdin: Option<&[u8]>,
            _cancel: &CancellationToken,
        ) -> Result<ProcessOutput> {
            self.calls.lock().unwrap().push(args.to_vec());
            self.outputs.lock().unwrap().remove(0)
        }
    }

    fn runner(process: Arc<Scripted>) -> QueryRunner {
        QueryRunner::new(&EngineConfig::default(), process)
    }

    #[test]
    fn test_invocation_shape() {
        let process = Scripted::new(vec![Ok(ProcessOutput::ok("[{\"x\":1}]"))]);
        runner(process.clone())
            .run_query("SELECT 1 AS x", &CancellationToken::new())
            .unwrap();

        let calls = process.calls.lock().unwrap();
        assert_eq!(calls[0], vec![":memory:", "-json", "-c", "SELECT 1 AS x"]);
    }

    #[test]
    fn test_parse_preserves_column_order() {
        let tabular =
            parse_json_rows(br#"[{"zeta":1,"alpha":"a"},{"zeta":2,"alpha":"b"}]"#).unwrap();
        assert_eq!(tabular.columns, vec!["zeta", "alpha"]);
        assert_eq!(tabular.row_count, 2);
        assert_eq!(tabular.rows[1]["alpha"], "b");
    }

    #[test]
    fn test_parse_empty_output_is_zero_rows() {
        let tabular = parse_json_rows(b"").unwrap();
        assert_eq!(tabular.row_count, 0);
        assert!(tabular.columns.is_empty());

        let tabular = parse_json_rows(b"  \n").unwrap();
        assert_eq!(tabular.row_count, 0);
    }

    #[test]
    fn test_parse_garbage_is_execution_error() {
        let err = parse_json_rows(b"Error: something").unwrap_err();
        assert_eq!(err.kind(), "execution");
    }

    #[test]
    fn test_engine_stderr_passes_through_verbatim() {
        let stderr = "Catalog Error: Table with name nope does not exist!";
        let process = Scripted::new(vec![Ok(ProcessOutput::failed(1, stderr))]);

        let err = runner(process)
            .run_query("SELECT * FROM nope", &CancellationToken::new())
            .unwrap_err();
        match err {
            Error::Execution(msg) => assert_eq!(msg, stderr),
            other => panic!("expected execution error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_binary_names_override() {
        let process = Scripted::new(vec![Err(Error::Config(
            "executable not found: duckdb".to_string(),
        ))]);

        let err = runner(process)
            .run_query("SELECT 1", &CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), "configuration");
        let msg = err.to_string();
        assert!(msg.contains("duckdb"));
        assert!(msg.contains(ENV_DUCKDB_BIN));
    }

    #[test]
    fn test_materialize_counts_rows_from_written_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("r_1.parquet");
        std::fs::write(&target, b"PAR1").unwrap();

        // The copy prints its own count; the verification query disagrees and wins.
        let process = Scripted::new(vec![
            Ok(ProcessOutput::ok(r#"[{"Count":5}]"#)),
            Ok(ProcessOutput::ok(r#"[{"row_count":3}]"#)),
        ]);
        let rows = runner(process.clone())
            .materialize_to_file("SELECT * FROM t", &target, &CancellationToken::new())
            .unwrap();
        assert_eq!(rows, 3);

        let calls = process.calls.lock().unwrap();
        assert!(calls[0][3].starts_with("COPY (\nSELECT * FROM t\n) TO '"));
        assert!(calls[0][3].ends_with("(FORMAT PARQUET)"));
        assert!(calls[1][3].starts_with("SELECT COUNT(*) AS row_count FROM read_parquet("));
    }

    #[test]
    fn test_materialize_fails_when_file_missing() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("missing.parquet");
        let process = Scripted::new(vec![Ok(ProcessOutput::ok(""))]);

        let err = runner(process)
            .materialize_to_file("SELECT 1", &target, &CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), "execution");
    }

    #[test]
    fn test_describe_file_maps_nullability() {
        let process = Scripted::new(vec![Ok(ProcessOutput::ok(
            r#"[
                {"column_name":"id","column_type":"INTEGER","null":"NO","key":null,"default":null,"extra":null},
                {"column_name":"name","column_type":"VARCHAR","null":"YES","key":null,"default":null,"extra":null}
            ]"#,
        ))]);

        let columns = runner(process)
            .describe_file(Path::new("/ws/results/r_1.parquet"), &CancellationToken::new())
            .unwrap();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].name, "id");
        assert!(!columns[0].nullable);
        assert_eq!(columns[1].data_type, "VARCHAR");
        assert!(columns[1].nullable);
    }

    #[test]
    fn test_xlsx_copy_loads_extension_first() {
        let process = Scripted::new(vec![Ok(ProcessOutput::ok(""))]);
        runner(process.clone())
            .copy_to_file(
                "SELECT 1",
                Path::new("/ws/artifacts/x.xlsx"),
                FileFormat::Xlsx,
                &CancellationToken::new(),
            )
            .unwrap();

        let calls = process.calls.lock().unwrap();
        assert!(calls[0][3].starts_with("INSTALL excel; LOAD excel; COPY (\nSELECT 1\n)"));
    }

    #[test]
    fn test_value_as_u64() {
        assert_eq!(value_as_u64(&serde_json::json!(42)), Some(42));
        assert_eq!(value_as_u64(&serde_json::json!("42")), Some(42));
        assert_eq!(value_as_u64(&serde_json::json!(null)), None);
    }
}
