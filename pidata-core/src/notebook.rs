//! Notebook engine
//!
//! Notebooks are ordered cells stored at `notebooks/<notebookId>.json`. Every
//! cell run bumps that cell's version by one, records its output (an error
//! output when execution failed), persists the notebook, and appends a full
//! snapshot to `notebooks/<notebookId>/revisions/<timestamp>.json`.
//!
//! A cancelled run is not an execution outcome: it changes nothing and writes
//! no revision.

use crate::error::{Error, Result};
use crate::results::ResultStore;
use crate::sql;
use crate::types::{Cell, CellKind, CellOutput, Notebook};
use crate::viz::{ChartRenderer, ChartSpec};
use crate::workspace::{self, Workspace};
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

const NOTEBOOK_ID_PREFIX: &str = "nb";
const CELL_ID_PREFIX: &str = "c";
const REVISIONS_DIR: &str = "revisions";
const REVISION_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";
const MAX_ID_ATTEMPTS: usize = 8;

/// One stored snapshot of a notebook.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Revision {
    pub name: String,
    pub path: PathBuf,
}

/// Creates, edits, and runs notebooks in a workspace.
#[derive(Debug, Clone)]
pub struct NotebookEngine {
    results: ResultStore,
    charts: ChartRenderer,
    max_rows: usize,
}

impl NotebookEngine {
    pub fn new(results: ResultStore, charts: ChartRenderer, max_rows: usize) -> Self {
        Self {
            results,
            charts,
            max_rows,
        }
    }

    /// `notebooks/<notebookId>.json`
    pub fn notebook_path(ws: &Workspace, notebook_id: &str) -> PathBuf {
        ws.notebooks_dir().join(format!("{}.json", notebook_id))
    }

    /// `notebooks/<notebookId>/revisions/`
    pub fn revisions_dir(ws: &Workspace, notebook_id: &str) -> PathBuf {
        ws.notebooks_dir().join(notebook_id).join(REVISIONS_DIR)
    }

    pub fn create(&self, ws: &Workspace, title: &str) -> Result<Notebook> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::Validation("notebook title must not be empty".to_string()));
        }

        let notebook_id = self.allocate_notebook_id(ws)?;
        let now = Utc::now();
        let notebook = Notebook {
            notebook_id,
            title: title.to_string(),
            cells: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.save(ws, &notebook)?;

        tracing::info!(notebook_id = %notebook.notebook_id, title = %notebook.title, "Created notebook");
        Ok(notebook)
    }

    pub fn load(&self, ws: &Workspace, notebook_id: &str) -> Result<Notebook> {
        workspace::check_id("notebook", notebook_id)?;
        workspace::read_json(&Self::notebook_path(ws, notebook_id), "notebook", notebook_id)
    }

    /// All notebooks, oldest first.
    pub fn list(&self, ws: &Workspace) -> Result<Vec<Notebook>> {
        let mut notebooks: Vec<Notebook> = workspace::read_json_dir(&ws.notebooks_dir())?;
        notebooks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(notebooks)
    }

    /// Insert a cell after `after`, or append when no anchor is given.
    pub fn add_cell(
        &self,
        ws: &Workspace,
        notebook_id: &str,
        kind: CellKind,
        content: &str,
        after: Option<&str>,
    ) -> Result<Cell> {
        let mut notebook = self.load(ws, notebook_id)?;
        let position = match after {
            Some(anchor) => {
                notebook
                    .cell_index(anchor)
                    .ok_or_else(|| Error::not_found("cell", anchor))?
                    + 1
            }
            None => notebook.cells.len(),
        };

        let cell = Cell {
            cell_id: allocate_cell_id(&notebook)?,
            kind,
            content: content.to_string(),
            output: None,
            version: 0,
        };
        notebook.cells.insert(position, cell.clone());
        notebook.updated_at = Utc::now();
        self.save(ws, &notebook)?;

        tracing::debug!(notebook_id, cell_id = %cell.cell_id, position, "Added cell");
        Ok(cell)
    }

    /// Replace a cell's content. Output and version are kept.
    pub fn update_cell(
        &self,
        ws: &Workspace,
        notebook_id: &str,
        cell_id: &str,
        content: &str,
    ) -> Result<Cell> {
        let mut notebook = self.load(ws, notebook_id)?;
        let index = notebook
            .cell_index(cell_id)
            .ok_or_else(|| Error::not_found("cell", cell_id))?;

        notebook.cells[index].content = content.to_string();
        notebook.updated_at = Utc::now();
        self.save(ws, &notebook)?;
        Ok(notebook.cells[index].clone())
    }

    /// Execute one cell and record its output.
    pub fn run_cell(
        &self,
        ws: &Workspace,
        notebook_id: &str,
        cell_id: &str,
        cancel: &CancellationToken,
        progress: &dyn Fn(&str),
    ) -> Result<Cell> {
        let mut notebook = self.load(ws, notebook_id)?;
        let index = notebook
            .cell_index(cell_id)
            .ok_or_else(|| Error::not_found("cell", cell_id))?;

        let output = match self.execute(ws, &notebook.cells[index], cancel, progress) {
            Ok(output) => output,
            Err(Error::Cancelled) => {
                tracing::warn!(notebook_id, cell_id, "Cell run cancelled");
                return Err(Error::Cancelled);
            }
            Err(e) => {
                tracing::info!(notebook_id, cell_id, error = %e, "Cell run failed");
                CellOutput::Error {
                    error: e.to_string(),
                    executed_at: Utc::now(),
                }
            }
        };

        let cell = &mut notebook.cells[index];
        cell.version += 1;
        cell.output = Some(output);
        let cell = cell.clone();

        notebook.updated_at = Utc::now();
        self.save(ws, &notebook)?;
        self.write_revision(ws, &notebook)?;
        Ok(cell)
    }

    /// Run every cell in order. Failed cells record an error output and the
    /// run continues; cancellation stops it.
    pub fn run_all(
        &self,
        ws: &Workspace,
        notebook_id: &str,
        cancel: &CancellationToken,
        progress: &dyn Fn(&str),
    ) -> Result<Notebook> {
        let cell_ids: Vec<String> = self
            .load(ws, notebook_id)?
            .cells
            .into_iter()
            .map(|c| c.cell_id)
            .collect();

        for (i, cell_id) in cell_ids.iter().enumerate() {
            progress(&format!("Running cell {}/{} ({})", i + 1, cell_ids.len(), cell_id));
            self.run_cell(ws, notebook_id, cell_id, cancel, progress)?;
        }
        self.load(ws, notebook_id)
    }

    /// Stored snapshots, oldest first.
    pub fn revisions(&self, ws: &Workspace, notebook_id: &str) -> Result<Vec<Revision>> {
        self.load(ws, notebook_id)?;
        let dir = Self::revisions_dir(ws, notebook_id);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };

        let mut revisions = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
                revisions.push(Revision {
                    name: name.to_string(),
                    path: path.clone(),
                });
            }
        }
        revisions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(revisions)
    }

    fn execute(
        &self,
        ws: &Workspace,
        cell: &Cell,
        cancel: &CancellationToken,
        progress: &dyn Fn(&str),
    ) -> Result<CellOutput> {
        match cell.kind {
            CellKind::Markdown => Ok(CellOutput::Text {
                text: cell.content.clone(),
                executed_at: Utc::now(),
            }),
            CellKind::Sql => {
                let statement = sql::normalize(&cell.content)?;
                sql::ensure_read_only(&statement)?;
                let bounded = sql::bound(&statement, self.max_rows);
                let materialized = self.results.materialize(
                    ws,
                    &bounded,
                    vec!["notebook".to_string()],
                    cancel,
                    progress,
                )?;
                Ok(CellOutput::Result {
                    result_id: materialized.result.result_id,
                    executed_at: Utc::now(),
                })
            }
            CellKind::Chart => {
                let spec = ChartSpec::parse(&cell.content)?;
                let artifact = self.charts.render(ws, &spec, cancel, progress)?;
                Ok(CellOutput::Artifact {
                    artifact_id: artifact.artifact_id,
                    executed_at: Utc::now(),
                })
            }
        }
    }

    fn save(&self, ws: &Workspace, notebook: &Notebook) -> Result<()> {
        workspace::write_json(&Self::notebook_path(ws, &notebook.notebook_id), notebook)
    }

    fn write_revision(&self, ws: &Workspace, notebook: &Notebook) -> Result<PathBuf> {
        let dir = Self::revisions_dir(ws, &notebook.notebook_id);
        std::fs::create_dir_all(&dir)?;

        let stamp = notebook.updated_at.format(REVISION_FORMAT).to_string();
        let mut path = dir.join(format!("{}.json", stamp));
        let mut suffix = 1;
        while path.exists() {
            path = dir.join(format!("{}-{}.json", stamp, suffix));
            suffix += 1;
        }
        workspace::write_json(&path, notebook)?;
        Ok(path)
    }

    fn allocate_notebook_id(&self, ws: &Workspace) -> Result<String> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let candidate = workspace::short_id(NOTEBOOK_ID_PREFIX);
            if !Self::notebook_path(ws, &candidate).exists() {
                return Ok(candidate);
            }
        }
        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "could not allocate a unique notebook id",
        )))
    }
}

fn allocate_cell_id(notebook: &Notebook) -> Result<String> {
    for _ in 0..MAX_ID_ATTEMPTS {
        let candidate = workspace::short_id(CELL_ID_PREFIX);
        if notebook.cell(&candidate).is_none() {
            return Ok(candidate);
        }
    }
    Err(Error::Validation(format!(
        "could not allocate a unique cell id in {}",
        notebook.notebook_id
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, RenderConfig};
    use crate::engine::{ProcessOutput, ProcessRunner, QueryRunner};
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Materializes any statement as one row; rejects SQL mentioning `broken`.
    struct OneRowEngine;

    impl ProcessRunner for OneRowEngine {
        fn run(
            &self,
            _program: &Path,
            args: &[String],
            _stdin: Option<&[u8]>,
            cancel: &CancellationToken,
        ) -> Result<ProcessOutput> {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let sql = &args[3];
            if sql.contains("broken") {
                return Ok(ProcessOutput::failed(1, "Parser Error: syntax error at or near \"broken\""));
            }
            if sql.starts_with("COPY") {
                let start = sql.find(") TO '").unwrap() + 6;
                let end = start + sql[start..].find('\'').unwrap();
                std::fs::write(&sql[start..end], b"PAR1").unwrap();
                return Ok(ProcessOutput::ok(""));
            }
            if sql.starts_with("DESCRIBE") {
                return Ok(ProcessOutput::ok(
                    r#"[{"column_name":"n","column_type":"INTEGER","null":"YES"}]"#,
                ));
            }
            if sql.starts_with("SELECT COUNT(*)") {
                return Ok(ProcessOutput::ok(r#"[{"row_count":1}]"#));
            }
            Ok(ProcessOutput::ok(r#"[{"n":1}]"#))
        }
    }

    fn setup() -> (TempDir, Workspace, NotebookEngine) {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::create(dir.path(), None, None).unwrap();
        let runner = QueryRunner::new(&EngineConfig::default(), Arc::new(OneRowEngine));
        let results = ResultStore::new(runner);
        let charts = ChartRenderer::new(results.clone(), RenderConfig::default());
        (dir, ws, NotebookEngine::new(results, charts, 10_000))
    }

    #[test]
    fn test_create_and_load() {
        let (_dir, ws, engine) = setup();
        let notebook = engine.create(&ws, "Claims review").unwrap();
        assert!(notebook.notebook_id.starts_with("nb_"));
        assert_eq!(engine.load(&ws, &notebook.notebook_id).unwrap(), notebook);
        assert_eq!(engine.list(&ws).unwrap().len(), 1);
    }

    #[test]
    fn test_add_cell_after_anchor_keeps_order() {
        let (_dir, ws, engine) = setup();
        let id = engine.create(&ws, "Order").unwrap().notebook_id;

        let first = engine.add_cell(&ws, &id, CellKind::Markdown, "one", None).unwrap();
        let third = engine.add_cell(&ws, &id, CellKind::Markdown, "three", None).unwrap();
        let second = engine
            .add_cell(&ws, &id, CellKind::Markdown, "two", Some(&first.cell_id))
            .unwrap();

        let ids: Vec<String> = engine
            .load(&ws, &id)
            .unwrap()
            .cells
            .into_iter()
            .map(|c| c.cell_id)
            .collect();
        assert_eq!(ids, vec![first.cell_id, second.cell_id, third.cell_id]);
    }

    #[test]
    fn test_add_cell_after_unknown_anchor_is_not_found() {
        let (_dir, ws, engine) = setup();
        let id = engine.create(&ws, "Anchors").unwrap().notebook_id;
        let err = engine
            .add_cell(&ws, &id, CellKind::Sql, "SELECT 1", Some("c_missing"))
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_run_bumps_version_and_writes_revision() {
        let (_dir, ws, engine) = setup();
        let id = engine.create(&ws, "Runs").unwrap().notebook_id;
        let cell = engine.add_cell(&ws, &id, CellKind::Sql, "SELECT 1 AS n;", None).unwrap();
        let cancel = CancellationToken::new();

        let first = engine.run_cell(&ws, &id, &cell.cell_id, &cancel, &|_| {}).unwrap();
        let second = engine.run_cell(&ws, &id, &cell.cell_id, &cancel, &|_| {}).unwrap();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert!(matches!(second.output, Some(CellOutput::Result { .. })));
        assert_eq!(engine.revisions(&ws, &id).unwrap().len(), 2);
    }

    #[test]
    fn test_failed_run_records_error_and_bumps_version() {
        let (_dir, ws, engine) = setup();
        let id = engine.create(&ws, "Failures").unwrap().notebook_id;
        let cell = engine
            .add_cell(&ws, &id, CellKind::Sql, "SELECT broken", None)
            .unwrap();

        let ran = engine
            .run_cell(&ws, &id, &cell.cell_id, &CancellationToken::new(), &|_| {})
            .unwrap();
        assert_eq!(ran.version, 1);
        match ran.output {
            Some(CellOutput::Error { error, .. }) => assert!(error.contains("Parser Error")),
            other => panic!("expected error output, got {:?}", other),
        }
    }

    #[test]
    fn test_cancelled_run_changes_nothing() {
        let (_dir, ws, engine) = setup();
        let id = engine.create(&ws, "Cancel").unwrap().notebook_id;
        let cell = engine.add_cell(&ws, &id, CellKind::Sql, "SELECT 1", None).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine
            .run_cell(&ws, &id, &cell.cell_id, &cancel, &|_| {})
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(engine.load(&ws, &id).unwrap().cells[0].version, 0);
        assert!(engine.revisions(&ws, &id).unwrap().is_empty());
    }

    #[test]
    fn test_update_cell_keeps_output_and_version() {
        let (_dir, ws, engine) = setup();
        let id = engine.create(&ws, "Edit").unwrap().notebook_id;
        let cell = engine.add_cell(&ws, &id, CellKind::Markdown, "draft", None).unwrap();
        engine
            .run_cell(&ws, &id, &cell.cell_id, &CancellationToken::new(), &|_| {})
            .unwrap();

        let updated = engine.update_cell(&ws, &id, &cell.cell_id, "final").unwrap();
        assert_eq!(updated.content, "final");
        assert_eq!(updated.version, 1);
        assert!(matches!(updated.output, Some(CellOutput::Text { ref text, .. }) if text == "draft"));
    }

    #[test]
    fn test_run_all_continues_past_errors() {
        let (_dir, ws, engine) = setup();
        let id = engine.create(&ws, "All").unwrap().notebook_id;
        engine.add_cell(&ws, &id, CellKind::Markdown, "# Intro", None).unwrap();
        engine.add_cell(&ws, &id, CellKind::Chart, "{not json", None).unwrap();
        engine.add_cell(&ws, &id, CellKind::Sql, "SELECT 1", None).unwrap();

        let notebook = engine
            .run_all(&ws, &id, &CancellationToken::new(), &|_| {})
            .unwrap();
        assert!(notebook.cells.iter().all(|c| c.version == 1));
        assert!(notebook.cells[1].output.as_ref().unwrap().is_error());
        assert!(matches!(notebook.cells[2].output, Some(CellOutput::Result { .. })));
        assert_eq!(engine.revisions(&ws, &id).unwrap().len(), 3);
    }
}
