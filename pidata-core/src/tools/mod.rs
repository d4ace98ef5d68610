//! Tool surface exposed to the agent runtime
//!
//! Every tool takes a JSON parameter object, a cancellation token, and a
//! progress callback, and returns a short text summary (`content`) plus a
//! machine-readable `details` object. Parameters are deserialized into typed
//! structs that reject unknown fields, so malformed input fails before any
//! filesystem or engine access.

mod data;
mod notebook;

use crate::analysis::Analyzer;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::engine::{ProcessRunner, QueryRunner, SystemProcessRunner};
use crate::error::{Error, Result};
use crate::notebook::NotebookEngine;
use crate::results::ResultStore;
use crate::viz::ChartRenderer;
use crate::workspace::Workspace;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Name and one-line description of a tool.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ToolInfo {
    pub name: &'static str,
    pub description: &'static str,
}

/// Every tool, in presentation order.
pub const TOOLS: &[ToolInfo] = &[
    ToolInfo { name: "data_init", description: "Create or reset the workspace session" },
    ToolInfo { name: "data_tables", description: "List tables and views in the database" },
    ToolInfo { name: "data_describe", description: "Describe one table's columns" },
    ToolInfo { name: "data_search", description: "Search table and column names" },
    ToolInfo { name: "data_sql", description: "Run a small exploratory query and show rows inline" },
    ToolInfo { name: "data_query", description: "Materialize a query into a result and return its id" },
    ToolInfo { name: "data_results", description: "List results, artifacts, and notebooks in the workspace" },
    ToolInfo { name: "data_preview", description: "Read a bounded window of a result" },
    ToolInfo { name: "data_profile", description: "Profile the columns of a result" },
    ToolInfo { name: "data_aggregate", description: "Group and aggregate a result into a new result" },
    ToolInfo { name: "data_export", description: "Export a result to csv, parquet, or xlsx" },
    ToolInfo { name: "data_chart", description: "Render a result as a chart image or HTML page" },
    ToolInfo { name: "data_summarize", description: "Summarize a result as bounded markdown" },
    ToolInfo { name: "data_chunks", description: "Plan row windows for reading a result piecewise" },
    ToolInfo { name: "notebook_create", description: "Create an empty notebook" },
    ToolInfo { name: "notebook_add_cell", description: "Add a sql, markdown, or chart cell" },
    ToolInfo { name: "notebook_update_cell", description: "Replace a cell's content" },
    ToolInfo { name: "notebook_run", description: "Run one cell or the whole notebook" },
    ToolInfo { name: "notebook_show", description: "Show a notebook, or list notebooks" },
];

/// What a tool hands back to the agent.
#[derive(Debug, Clone, Serialize)]
pub struct ToolOutput {
    pub content: String,
    pub details: Value,
}

impl ToolOutput {
    fn new(content: impl Into<String>, details: impl Serialize) -> Result<Self> {
        Ok(Self {
            content: content.into(),
            details: serde_json::to_value(details)?,
        })
    }
}

/// Failure as reported to the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolError {
    pub kind: String,
    pub message: String,
}

impl From<&Error> for ToolError {
    fn from(error: &Error) -> Self {
        Self {
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

/// Everything a tool needs: configuration, where it was invoked from, and
/// the engine runner.
#[derive(Debug, Clone)]
pub struct ToolContext {
    config: Config,
    cwd: PathBuf,
    workspace_override: Option<PathBuf>,
    runner: QueryRunner,
}

impl ToolContext {
    pub fn new(
        config: Config,
        cwd: PathBuf,
        workspace_override: Option<PathBuf>,
        process: Arc<dyn ProcessRunner>,
    ) -> Self {
        let runner = QueryRunner::new(&config.engine, process);
        Self {
            config,
            cwd,
            workspace_override,
            runner,
        }
    }

    /// Context backed by real subprocesses.
    pub fn system(config: Config, cwd: PathBuf, workspace_override: Option<PathBuf>) -> Self {
        Self::new(config, cwd, workspace_override, Arc::new(SystemProcessRunner))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn workspace_path(&self) -> PathBuf {
        Workspace::resolve_path(
            &self.cwd,
            &self.config.workspace.root,
            self.workspace_override.as_deref(),
        )
    }

    /// Load the workspace, creating it on first use.
    pub fn ensure_workspace(&self) -> Result<Workspace> {
        Workspace::ensure(&self.workspace_path())
    }

    fn catalog(&self) -> Catalog {
        Catalog::new(self.runner.clone())
    }

    fn results(&self) -> ResultStore {
        ResultStore::new(self.runner.clone())
    }

    fn analyzer(&self) -> Analyzer {
        Analyzer::new(self.results())
    }

    fn charts(&self) -> ChartRenderer {
        ChartRenderer::new(self.results(), self.config.render.clone())
    }

    fn notebooks(&self) -> NotebookEngine {
        NotebookEngine::new(self.results(), self.charts(), self.config.workspace.max_rows)
    }
}

/// Dispatch a tool call by name.
pub fn call(
    ctx: &ToolContext,
    name: &str,
    params: Value,
    cancel: &CancellationToken,
    progress: &dyn Fn(&str),
) -> Result<ToolOutput> {
    tracing::debug!(tool = name, "Tool call");
    match name {
        "data_init" => data::init(ctx, parse(params)?),
        "data_tables" => data::tables(ctx, parse(params)?, cancel),
        "data_describe" => data::describe(ctx, parse(params)?, cancel),
        "data_search" => data::search(ctx, parse(params)?, cancel),
        "data_sql" => data::run_sql(ctx, parse(params)?, cancel),
        "data_query" => data::query(ctx, parse(params)?, cancel, progress),
        "data_results" => data::results(ctx, parse(params)?),
        "data_preview" => data::preview(ctx, parse(params)?, cancel),
        "data_profile" => data::profile(ctx, parse(params)?, cancel),
        "data_aggregate" => data::aggregate(ctx, parse(params)?, cancel, progress),
        "data_export" => data::export(ctx, parse(params)?, cancel, progress),
        "data_chart" => data::chart(ctx, parse(params)?, cancel, progress),
        "data_summarize" => data::summarize(ctx, parse(params)?, cancel),
        "data_chunks" => data::chunks(ctx, parse(params)?),
        "notebook_create" => notebook::create(ctx, parse(params)?),
        "notebook_add_cell" => notebook::add_cell(ctx, parse(params)?),
        "notebook_update_cell" => notebook::update_cell(ctx, parse(params)?),
        "notebook_run" => notebook::run(ctx, parse(params)?, cancel, progress),
        "notebook_show" => notebook::show(ctx, parse(params)?),
        _ => Err(Error::not_found("tool", name)),
    }
}

/// Deserialize tool parameters; a missing object counts as empty.
fn parse<T: DeserializeOwned>(params: Value) -> Result<T> {
    let params = if params.is_null() {
        Value::Object(Default::default())
    } else {
        params
    };
    serde_json::from_value(params)
        .map_err(|e| Error::Validation(format!("invalid parameters: {}", e)))
}
