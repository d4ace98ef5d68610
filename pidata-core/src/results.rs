//! Result store
//!
//! A result is an immutable parquet file plus a JSON metadata record, both
//! addressed by the result id:
//!
//! ```text
//! results/<resultId>.parquet
//! results/<resultId>.json
//! ```
//!
//! [`ResultStore::materialize`] writes the data file first, verifies its row
//! count, derives schema and preview from the file itself, and only then
//! writes the metadata record. A failed or cancelled materialization therefore
//! never leaves a metadata record behind (the data file may remain).

use crate::engine::QueryRunner;
use crate::error::{Error, Result};
use crate::types::{Column, ResultMeta, Tabular};
use crate::workspace::{self, Workspace};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Prefix of every result id.
pub const RESULT_ID_PREFIX: &str = "r";

/// Rows included in the preview returned right after materialization.
pub const DEFAULT_PREVIEW_ROWS: usize = 5;

/// Candidate ids tried before giving up on allocation.
const MAX_ID_ATTEMPTS: usize = 8;

/// Outcome of a materialization: the stored record plus a bounded preview.
#[derive(Debug, Clone, Serialize)]
pub struct Materialized {
    pub result: ResultMeta,
    pub preview: Tabular,
}

/// Stores and dereferences materialized results.
#[derive(Debug, Clone)]
pub struct ResultStore {
    runner: QueryRunner,
}

impl ResultStore {
    pub fn new(runner: QueryRunner) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &QueryRunner {
        &self.runner
    }

    /// Allocate a fresh result id whose files do not exist yet.
    pub fn allocate_id(&self, ws: &Workspace) -> Result<String> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let candidate = workspace::short_id(RESULT_ID_PREFIX);
            if !Self::data_file_path(ws, &candidate).exists()
                && !Self::metadata_path(ws, &candidate).exists()
            {
                return Ok(candidate);
            }
            tracing::warn!(result_id = %candidate, "Result id collision, retrying");
        }
        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "could not allocate a unique result id",
        )))
    }

    /// `results/<resultId>.parquet`
    pub fn data_file_path(ws: &Workspace, result_id: &str) -> PathBuf {
        ws.results_dir().join(format!("{}.parquet", result_id))
    }

    /// `results/<resultId>.json`
    pub fn metadata_path(ws: &Workspace, result_id: &str) -> PathBuf {
        ws.results_dir().join(format!("{}.json", result_id))
    }

    pub fn write_metadata(&self, ws: &Workspace, meta: &ResultMeta) -> Result<()> {
        workspace::write_json(&Self::metadata_path(ws, &meta.result_id), meta)
    }

    /// Read a result record; NotFound for ids unknown to this workspace.
    pub fn read_metadata(&self, ws: &Workspace, result_id: &str) -> Result<ResultMeta> {
        workspace::check_id("result", result_id)?;
        let meta: ResultMeta =
            workspace::read_json(&Self::metadata_path(ws, result_id), "result", result_id)?;
        if meta.result_id != result_id {
            return Err(Error::Validation(format!(
                "metadata file for {} records id {}",
                result_id, meta.result_id
            )));
        }
        Ok(meta)
    }

    /// Schema of a materialized file, from the file itself.
    pub fn derive_schema(&self, file: &Path, cancel: &CancellationToken) -> Result<Vec<Column>> {
        self.runner.describe_file(file, cancel)
    }

    /// First `limit` rows of a materialized file.
    pub fn derive_preview(
        &self,
        file: &Path,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Tabular> {
        self.runner.read_file(file, limit, 0, cancel)
    }

    /// Execute `sql` into a new result.
    ///
    /// `sql` is stored verbatim, so callers apply any automatic bounding first.
    pub fn materialize(
        &self,
        ws: &Workspace,
        sql: &str,
        tags: Vec<String>,
        cancel: &CancellationToken,
        progress: &dyn Fn(&str),
    ) -> Result<Materialized> {
        ensure_not_cancelled(cancel)?;
        let result_id = self.allocate_id(ws)?;
        let data_path = Self::data_file_path(ws, &result_id);

        progress(&format!("Materializing query into {}", result_id));
        let row_count = self.runner.materialize_to_file(sql, &data_path, cancel)?;

        ensure_not_cancelled(cancel)?;
        progress("Reading schema");
        let columns = self.derive_schema(&data_path, cancel)?;

        ensure_not_cancelled(cancel)?;
        progress("Building preview");
        let preview = self.derive_preview(&data_path, DEFAULT_PREVIEW_ROWS, cancel)?;

        let meta = ResultMeta {
            result_id,
            sql: sql.to_string(),
            row_count,
            columns,
            created_at: Utc::now(),
            tags,
        };
        self.write_metadata(ws, &meta)?;

        tracing::info!(
            result_id = %meta.result_id,
            row_count = meta.row_count,
            columns = meta.columns.len(),
            "Materialized result"
        );

        Ok(Materialized {
            result: meta,
            preview,
        })
    }

    /// All result records in the workspace, oldest first.
    pub fn list(&self, ws: &Workspace) -> Result<Vec<ResultMeta>> {
        let mut results: Vec<ResultMeta> = workspace::read_json_dir(&ws.results_dir())?;
        results.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(results)
    }
}

pub(crate) fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}
