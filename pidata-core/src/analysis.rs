//! Analysis operators over materialized results
//!
//! Every operator takes a result id and queries that result's parquet file,
//! never the original source. Outputs are bounded: previews are capped at
//! [`MAX_PREVIEW_ROWS`], profiles return a fixed number of values per column,
//! and aggregations are materialized as new results instead of being returned
//! inline.

use crate::artifacts::ArtifactStore;
use crate::engine::{value_as_u64, FileFormat};
use crate::error::{Error, Result};
use crate::results::{ensure_not_cancelled, Materialized, ResultStore};
use crate::sql::{quote_ident, read_parquet};
use crate::types::{Artifact, ArtifactKind, Column, ResultMeta, Row, Tabular};
use crate::workspace::{self, Workspace};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Hard ceiling on preview rows, whatever the caller asks for.
pub const MAX_PREVIEW_ROWS: usize = 100;

/// Most frequent values reported per profiled column.
pub const TOP_K: usize = 5;

// ============================================
// Preview
// ============================================

/// One bounded window of a result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewPage {
    pub result_id: String,
    pub offset: u64,
    /// Effective limit after the ceiling was applied
    pub limit: usize,
    pub total_rows: u64,
    pub has_more: bool,
    pub data: Tabular,
}

// ============================================
// Profile
// ============================================

/// Which columns to profile and how many rows to sample.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProfileRequest {
    /// Columns to profile; all columns when absent
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    /// Profile only the first N rows
    #[serde(default)]
    pub sample_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopValue {
    pub value: Value,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericStats {
    pub min: Value,
    pub max: Value,
    pub mean: Option<f64>,
    /// Sample standard deviation
    pub stddev: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnProfile {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub null_count: u64,
    /// Percentage of the sampled rows, not of the whole result
    pub null_percent: f64,
    /// Approximate distinct count
    pub distinct_count: u64,
    pub top_values: Vec<TopValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric: Option<NumericStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub result_id: String,
    pub row_count: u64,
    pub sampled_rows: u64,
    pub sampled: bool,
    pub columns: Vec<ColumnProfile>,
}

// ============================================
// Aggregate
// ============================================

/// Aggregation functions available to metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOp {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    CountDistinct,
}

impl AggregateOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateOp::Count => "count",
            AggregateOp::Sum => "sum",
            AggregateOp::Avg => "avg",
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::CountDistinct => "count_distinct",
        }
    }

    fn expression(&self, column: Option<&str>) -> String {
        match (self, column) {
            (AggregateOp::Count, None) => "COUNT(*)".to_string(),
            (AggregateOp::Count, Some(c)) => format!("COUNT({})", quote_ident(c)),
            (AggregateOp::CountDistinct, Some(c)) => format!("COUNT(DISTINCT {})", quote_ident(c)),
            (AggregateOp::Sum, Some(c)) => format!("SUM({})", quote_ident(c)),
            (AggregateOp::Avg, Some(c)) => format!("AVG({})", quote_ident(c)),
            (AggregateOp::Min, Some(c)) => format!("MIN({})", quote_ident(c)),
            (AggregateOp::Max, Some(c)) => format!("MAX({})", quote_ident(c)),
            // Rejected during validation.
            (_, None) => "NULL".to_string(),
        }
    }
}

/// One output column of an aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Metric {
    pub op: AggregateOp,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default, rename = "as")]
    pub alias: Option<String>,
}

impl Metric {
    /// Output column name: the alias, or `<op>_<column>`, or `count`.
    pub fn output_name(&self) -> String {
        match (&self.alias, &self.column) {
            (Some(alias), _) => alias.clone(),
            (None, Some(column)) => format!("{}_{}", self.op.as_str(), column),
            (None, None) => self.op.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AggregateRequest {
    #[serde(default)]
    pub group_by: Vec<String>,
    pub metrics: Vec<Metric>,
}

impl AggregateRequest {
    /// Input-only checks, run before anything touches disk or the engine.
    pub fn validate(&self) -> Result<()> {
        if self.metrics.is_empty() {
            return Err(Error::Validation(
                "at least one metric is required".to_string(),
            ));
        }
        let mut names = HashSet::new();
        for metric in &self.metrics {
            if metric.op != AggregateOp::Count && metric.column.is_none() {
                return Err(Error::Validation(format!(
                    "metric '{}' requires a column",
                    metric.op.as_str()
                )));
            }
            let name = metric.output_name();
            if self.group_by.contains(&name) || !names.insert(name.clone()) {
                return Err(Error::Validation(format!(
                    "duplicate output column '{}'",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Grouped aggregation over the given parquet source.
    fn to_sql(&self, source: &str) -> String {
        let groups: Vec<String> = self.group_by.iter().map(|g| quote_ident(g)).collect();
        let mut select = groups.clone();
        select.extend(self.metrics.iter().map(|m| {
            format!(
                "{} AS {}",
                m.op.expression(m.column.as_deref()),
                quote_ident(&m.output_name())
            )
        }));

        let mut sql = format!("SELECT {} FROM {}", select.join(", "), source);
        if !groups.is_empty() {
            sql.push_str(&format!(
                " GROUP BY {} ORDER BY {}",
                groups.join(", "),
                groups.join(", ")
            ));
        }
        sql
    }
}

// ============================================
// Export
// ============================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExportRequest {
    pub format: FileFormat,
    /// Destination; relative paths resolve inside the workspace
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn artifact_kind(format: FileFormat) -> ArtifactKind {
    match format {
        FileFormat::Parquet => ArtifactKind::Parquet,
        FileFormat::Csv => ArtifactKind::Csv,
        FileFormat::Xlsx => ArtifactKind::Xlsx,
    }
}

// ============================================
// Operators
// ============================================

/// Derives bounded outputs from materialized results.
#[derive(Debug, Clone)]
pub struct Analyzer {
    results: ResultStore,
    artifacts: ArtifactStore,
}

impl Analyzer {
    pub fn new(results: ResultStore) -> Self {
        Self {
            results,
            artifacts: ArtifactStore,
        }
    }

    /// Offset/limit window; the limit is capped at [`MAX_PREVIEW_ROWS`].
    pub fn preview(
        &self,
        ws: &Workspace,
        result_id: &str,
        offset: u64,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<PreviewPage> {
        let meta = self.results.read_metadata(ws, result_id)?;
        let limit = limit.min(MAX_PREVIEW_ROWS);
        let path = ResultStore::data_file_path(ws, result_id);

        let data = if offset >= meta.row_count {
            Tabular {
                columns: meta.columns.iter().map(|c| c.name.clone()).collect(),
                rows: Vec::new(),
                row_count: 0,
            }
        } else {
            self.results.runner().read_file(&path, limit, offset, cancel)?
        };

        Ok(PreviewPage {
            result_id: meta.result_id,
            offset,
            limit,
            total_rows: meta.row_count,
            has_more: offset.saturating_add(limit as u64) < meta.row_count,
            data,
        })
    }

    /// Column statistics over a sample window of the result.
    ///
    /// With a sample size below the row count only the first `sample_size`
    /// rows are read, and null percentages are relative to that sample.
    pub fn profile(
        &self,
        ws: &Workspace,
        result_id: &str,
        request: &ProfileRequest,
        cancel: &CancellationToken,
    ) -> Result<Profile> {
        if request.sample_size == Some(0) {
            return Err(Error::Validation(
                "sampleSize must be greater than zero".to_string(),
            ));
        }
        let meta = self.results.read_metadata(ws, result_id)?;
        let columns = select_columns(&meta, request.columns.as_deref())?;

        let path = ResultStore::data_file_path(ws, result_id);
        let sampled = matches!(request.sample_size, Some(n) if n < meta.row_count);
        let source = match request.sample_size {
            Some(n) if sampled => format!("(SELECT * FROM {} LIMIT {}) AS sample", read_parquet(&path), n),
            _ => format!("{} AS sample", read_parquet(&path)),
        };

        if columns.is_empty() {
            return Ok(Profile {
                result_id: meta.result_id,
                row_count: meta.row_count,
                sampled_rows: 0,
                sampled,
                columns: Vec::new(),
            });
        }

        let stats = self
            .results
            .runner()
            .run_query(&stats_sql(&columns, &source), cancel)?;
        let stats_row = stats.rows.into_iter().next().unwrap_or_default();
        let sampled_rows = stats_row.get("sampled_rows").and_then(value_as_u64).unwrap_or(0);

        ensure_not_cancelled(cancel)?;
        let top = self
            .results
            .runner()
            .run_query(&top_values_sql(&columns, &source), cancel)?;

        let profiles = columns
            .iter()
            .enumerate()
            .map(|(i, column)| column_profile(i, column, &stats_row, &top.rows, sampled_rows))
            .collect();

        Ok(Profile {
            result_id: meta.result_id,
            row_count: meta.row_count,
            sampled_rows,
            sampled,
            columns: profiles,
        })
    }

    /// Grouped aggregation materialized as a new result.
    pub fn aggregate(
        &self,
        ws: &Workspace,
        result_id: &str,
        request: &AggregateRequest,
        cancel: &CancellationToken,
        progress: &dyn Fn(&str),
    ) -> Result<Materialized> {
        request.validate()?;
        let meta = self.results.read_metadata(ws, result_id)?;

        let referenced = request
            .group_by
            .iter()
            .chain(request.metrics.iter().filter_map(|m| m.column.as_ref()));
        for name in referenced {
            if meta.column(name).is_none() {
                return Err(Error::Validation(format!(
                    "column '{}' does not exist in {}",
                    name, result_id
                )));
            }
        }

        let source = read_parquet(&ResultStore::data_file_path(ws, result_id));
        let sql = request.to_sql(&source);
        let tags = vec!["aggregate".to_string(), format!("source:{}", result_id)];

        self.results.materialize(ws, &sql, tags, cancel, progress)
    }

    /// Copy or convert a result's data file and record it as an artifact.
    ///
    /// An explicit destination is checked before anything is read or spawned.
    pub fn export(
        &self,
        ws: &Workspace,
        result_id: &str,
        request: &ExportRequest,
        cancel: &CancellationToken,
        progress: &dyn Fn(&str),
    ) -> Result<Artifact> {
        let requested = request
            .path
            .as_deref()
            .map(|p| ws.export_destination(p))
            .transpose()?;
        workspace::check_id("result", result_id)?;
        let meta = self.results.read_metadata(ws, result_id)?;

        let kind = artifact_kind(request.format);
        let artifact_id = self.artifacts.allocate_id(ws, kind)?;
        let destination = requested
            .unwrap_or_else(|| ArtifactStore::default_file_path(ws, &artifact_id, kind));
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let source = ResultStore::data_file_path(ws, result_id);
        progress(&format!(
            "Exporting {} rows to {}",
            meta.row_count,
            destination.display()
        ));
        match request.format {
            FileFormat::Parquet => {
                ensure_not_cancelled(cancel)?;
                std::fs::copy(&source, &destination)?;
            }
            format => {
                let select = format!("SELECT * FROM {}", read_parquet(&source));
                self.results
                    .runner()
                    .copy_to_file(&select, &destination, format, cancel)?;
            }
        }

        self.artifacts.register(ws, artifact_id, kind, &destination)
    }
}

fn select_columns<'a>(meta: &'a ResultMeta, requested: Option<&[String]>) -> Result<Vec<&'a Column>> {
    match requested {
        None => Ok(meta.columns.iter().collect()),
        Some(names) => names
            .iter()
            .map(|name| {
                meta.column(name).ok_or_else(|| {
                    Error::Validation(format!(
                        "column '{}' does not exist in {}",
                        name, meta.result_id
                    ))
                })
            })
            .collect(),
    }
}

/// One row: `sampled_rows` plus `c<i>_nulls`, `c<i>_distinct` and, for
/// numeric columns, `c<i>_min`/`_max`/`_mean`/`_stddev`.
fn stats_sql(columns: &[&Column], source: &str) -> String {
    let mut select = vec!["COUNT(*) AS sampled_rows".to_string()];
    for (i, column) in columns.iter().enumerate() {
        let c = quote_ident(&column.name);
        select.push(format!("COUNT(*) - COUNT({c}) AS c{i}_nulls"));
        select.push(format!("approx_count_distinct({c}) AS c{i}_distinct"));
        if column.is_numeric() {
            select.push(format!("MIN({c}) AS c{i}_min"));
            select.push(format!("MAX({c}) AS c{i}_max"));
            select.push(format!("AVG({c}) AS c{i}_mean"));
            select.push(format!("STDDEV_SAMP({c}) AS c{i}_stddev"));
        }
    }
    format!("SELECT {} FROM {}", select.join(", "), source)
}

/// Rows of `(col_index, value, freq)`, up to [`TOP_K`] per column.
fn top_values_sql(columns: &[&Column], source: &str) -> String {
    columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let c = quote_ident(&column.name);
            format!(
                "(SELECT {i} AS col_index, CAST({c} AS VARCHAR) AS value, COUNT(*) AS freq \
                 FROM {source} WHERE {c} IS NOT NULL \
                 GROUP BY 2 ORDER BY 3 DESC, 2 LIMIT {TOP_K})"
            )
        })
        .collect::<Vec<_>>()
        .join(" UNION ALL ")
}

fn column_profile(
    index: usize,
    column: &Column,
    stats: &Row,
    top_rows: &[Row],
    sampled_rows: u64,
) -> ColumnProfile {
    let stat = |suffix: &str| stats.get(&format!("c{}_{}", index, suffix));
    let null_count = stat("nulls").and_then(value_as_u64).unwrap_or(0);
    let null_percent = if sampled_rows == 0 {
        0.0
    } else {
        null_count as f64 * 100.0 / sampled_rows as f64
    };

    let top_values = top_rows
        .iter()
        .filter(|row| row.get("col_index").and_then(value_as_u64) == Some(index as u64))
        .map(|row| TopValue {
            value: row.get("value").cloned().unwrap_or(Value::Null),
            count: row.get("freq").and_then(value_as_u64).unwrap_or(0),
        })
        .collect();

    let numeric = column.is_numeric().then(|| NumericStats {
        min: stat("min").cloned().unwrap_or(Value::Null),
        max: stat("max").cloned().unwrap_or(Value::Null),
        mean: stat("mean").and_then(Value::as_f64),
        stddev: stat("stddev").and_then(Value::as_f64),
    });

    ColumnProfile {
        name: column.name.clone(),
        data_type: column.data_type.clone(),
        null_count,
        null_percent,
        distinct_count: stat("distinct").and_then(value_as_u64).unwrap_or(0),
        top_values,
        numeric,
    }
}
