//! Core domain types for pidata
//!
//! These types are the persisted records of a workspace. Every record is an
//! explicit serde struct so that unknown fields in a metadata file fail loudly
//! instead of being carried along silently.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Workspace** | Root directory holding one session's results, artifacts, and notebooks |
//! | **Session** | The single `session.json` record of a workspace |
//! | **Result** | Immutable, id-addressed materialization of a query (parquet file + metadata) |
//! | **Artifact** | Generated non-tabular file (chart, document, export) |
//! | **Notebook** | Ordered cells with versioned execution and append-only revisions |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// One row of engine output, keyed by column name in column order.
pub type Row = serde_json::Map<String, Value>;

// ============================================
// Session
// ============================================

/// The session record stored at `<workspace>/session.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Session {
    pub session_id: String,
    pub workspace_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================
// Tabular data
// ============================================

/// Column metadata as derived from a materialized file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
}

impl Column {
    /// Whether the declared engine type is numeric (integer, float, or decimal).
    pub fn is_numeric(&self) -> bool {
        is_numeric_type(&self.data_type)
    }
}

/// Returns true for engine type names that support numeric moments.
pub fn is_numeric_type(data_type: &str) -> bool {
    let upper = data_type.trim().to_ascii_uppercase();
    let base = upper.split('(').next().unwrap_or("").trim();
    matches!(
        base,
        "TINYINT"
            | "SMALLINT"
            | "INTEGER"
            | "INT"
            | "BIGINT"
            | "HUGEINT"
            | "UTINYINT"
            | "USMALLINT"
            | "UINTEGER"
            | "UBIGINT"
            | "UHUGEINT"
            | "FLOAT"
            | "REAL"
            | "DOUBLE"
            | "DECIMAL"
            | "NUMERIC"
    )
}

/// Rows returned inline by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tabular {
    /// Column names in output order
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub row_count: usize,
}

impl Tabular {
    /// First value of the first row, if any.
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.values().next())
    }
}

// ============================================
// Result
// ============================================

/// Metadata record of a materialized result, stored at `results/<resultId>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResultMeta {
    pub result_id: String,
    /// Exact SQL that produced the data file, after automatic bounding
    pub sql: String,
    /// Row count verified against the data file
    pub row_count: u64,
    pub columns: Vec<Column>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl ResultMeta {
    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

// ============================================
// Artifact
// ============================================

/// Closed set of artifact types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Rendered chart image
    Image,
    /// Interactive HTML document
    Html,
    /// Delimited export
    Csv,
    /// Columnar export
    Parquet,
    /// Spreadsheet export
    Xlsx,
}

impl ArtifactKind {
    /// Identifier prefix, for readability only.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            ArtifactKind::Image => "chart",
            ArtifactKind::Html => "html",
            ArtifactKind::Csv => "csv",
            ArtifactKind::Parquet => "pq",
            ArtifactKind::Xlsx => "xlsx",
        }
    }

    /// File extension written for this artifact type.
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Image => "png",
            ArtifactKind::Html => "html",
            ArtifactKind::Csv => "csv",
            ArtifactKind::Parquet => "parquet",
            ArtifactKind::Xlsx => "xlsx",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Image => "image",
            ArtifactKind::Html => "html",
            ArtifactKind::Csv => "csv",
            ArtifactKind::Parquet => "parquet",
            ArtifactKind::Xlsx => "xlsx",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Metadata record of an artifact, stored at `artifacts/<artifactId>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Artifact {
    pub artifact_id: String,
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
}

// ============================================
// Notebook
// ============================================

/// Kind of notebook cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    /// SQL materialized into a Result
    Sql,
    /// Narrative text, echoed as output
    Markdown,
    /// Serialized chart spec rendered into an Artifact
    Chart,
}

/// Output of a cell run, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum CellOutput {
    Result {
        result_id: String,
        executed_at: DateTime<Utc>,
    },
    Artifact {
        artifact_id: String,
        executed_at: DateTime<Utc>,
    },
    Text {
        text: String,
        executed_at: DateTime<Utc>,
    },
    Error {
        error: String,
        executed_at: DateTime<Utc>,
    },
}

impl CellOutput {
    pub fn is_error(&self) -> bool {
        matches!(self, CellOutput::Error { .. })
    }
}

/// A notebook cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Cell {
    pub cell_id: String,
    pub kind: CellKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<CellOutput>,
    /// Number of completed runs
    pub version: u64,
}

/// A notebook document, stored at `notebooks/<notebookId>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Notebook {
    pub notebook_id: String,
    pub title: String,
    pub cells: Vec<Cell>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notebook {
    pub fn cell(&self, cell_id: &str) -> Option<&Cell> {
        self.cells.iter().find(|c| c.cell_id == cell_id)
    }

    pub fn cell_index(&self, cell_id: &str) -> Option<usize> {
        self.cells.iter().position(|c| c.cell_id == cell_id)
    }
}
