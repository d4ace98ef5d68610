//! `notebook_*` tools

use super::{ToolContext, ToolOutput};
use crate::error::Result;
use crate::types::{Cell, CellKind, CellOutput, Notebook};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Characters of cell content shown per cell in `notebook_show`.
const CONTENT_PREVIEW_CHARS: usize = 60;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct CreateParams {
    title: String,
}

pub(super) fn create(ctx: &ToolContext, params: CreateParams) -> Result<ToolOutput> {
    let ws = ctx.ensure_workspace()?;
    let notebook = ctx.notebooks().create(&ws, &params.title)?;
    ToolOutput::new(
        format!("Created notebook {} \"{}\"", notebook.notebook_id, notebook.title),
        &notebook,
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct AddCellParams {
    notebook_id: String,
    kind: CellKind,
    content: String,
    #[serde(default)]
    after: Option<String>,
}

pub(super) fn add_cell(ctx: &ToolContext, params: AddCellParams) -> Result<ToolOutput> {
    let ws = ctx.ensure_workspace()?;
    let cell = ctx.notebooks().add_cell(
        &ws,
        &params.notebook_id,
        params.kind,
        &params.content,
        params.after.as_deref(),
    )?;
    ToolOutput::new(
        format!("Added {} cell {} to {}", kind_name(cell.kind), cell.cell_id, params.notebook_id),
        &cell,
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct UpdateCellParams {
    notebook_id: String,
    cell_id: String,
    content: String,
}

pub(super) fn update_cell(ctx: &ToolContext, params: UpdateCellParams) -> Result<ToolOutput> {
    let ws = ctx.ensure_workspace()?;
    let cell = ctx.notebooks().update_cell(
        &ws,
        &params.notebook_id,
        &params.cell_id,
        &params.content,
    )?;
    ToolOutput::new(
        format!("Updated cell {} (version {})", cell.cell_id, cell.version),
        &cell,
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct RunParams {
    notebook_id: String,
    /// Run only this cell; the whole notebook when absent
    #[serde(default)]
    cell_id: Option<String>,
}

pub(super) fn run(
    ctx: &ToolContext,
    params: RunParams,
    cancel: &CancellationToken,
    progress: &dyn Fn(&str),
) -> Result<ToolOutput> {
    let ws = ctx.ensure_workspace()?;
    let engine = ctx.notebooks();
    match params.cell_id {
        Some(cell_id) => {
            let cell = engine.run_cell(&ws, &params.notebook_id, &cell_id, cancel, progress)?;
            ToolOutput::new(cell_line(&cell), &cell)
        }
        None => {
            let notebook = engine.run_all(&ws, &params.notebook_id, cancel, progress)?;
            let failed = notebook
                .cells
                .iter()
                .filter(|c| c.output.as_ref().is_some_and(CellOutput::is_error))
                .count();
            let mut content = format!(
                "Ran {} cells in {} ({} failed)",
                notebook.cells.len(),
                notebook.notebook_id,
                failed
            );
            for cell in &notebook.cells {
                content.push('\n');
                content.push_str(&cell_line(cell));
            }
            ToolOutput::new(content, &notebook)
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct ShowParams {
    #[serde(default)]
    notebook_id: Option<String>,
    #[serde(default)]
    revisions: bool,
}

pub(super) fn show(ctx: &ToolContext, params: ShowParams) -> Result<ToolOutput> {
    let ws = ctx.ensure_workspace()?;
    let engine = ctx.notebooks();

    let Some(notebook_id) = params.notebook_id else {
        let notebooks = engine.list(&ws)?;
        let mut content = format!("{} notebooks", notebooks.len());
        for notebook in &notebooks {
            content.push_str(&format!(
                "\n- {}: {} ({} cells)",
                notebook.notebook_id,
                notebook.title,
                notebook.cells.len()
            ));
        }
        return ToolOutput::new(content, json!({ "notebooks": notebooks }));
    };

    let notebook = engine.load(&ws, &notebook_id)?;
    let mut content = render_notebook(&notebook);
    if params.revisions {
        let revisions = engine.revisions(&ws, &notebook_id)?;
        content.push_str(&format!("\n\n{} revisions", revisions.len()));
        for revision in &revisions {
            content.push_str(&format!("\n- {}", revision.name));
        }
        return ToolOutput::new(
            content,
            json!({ "notebook": notebook, "revisions": revisions }),
        );
    }
    ToolOutput::new(content, json!({ "notebook": notebook }))
}

fn render_notebook(notebook: &Notebook) -> String {
    let mut out = format!(
        "{} \"{}\" ({} cells, updated {})",
        notebook.notebook_id,
        notebook.title,
        notebook.cells.len(),
        notebook.updated_at.to_rfc3339()
    );
    for cell in &notebook.cells {
        let mut content: String = cell
            .content
            .chars()
            .take(CONTENT_PREVIEW_CHARS)
            .map(|c| if c == '\n' { ' ' } else { c })
            .collect();
        if cell.content.chars().count() > CONTENT_PREVIEW_CHARS {
            content.push_str("...");
        }
        out.push_str(&format!("\n{}\n    {}", cell_line(cell), content));
    }
    out
}

fn cell_line(cell: &Cell) -> String {
    let output = match &cell.output {
        None => "not run".to_string(),
        Some(CellOutput::Result { result_id, .. }) => format!("result {}", result_id),
        Some(CellOutput::Artifact { artifact_id, .. }) => format!("artifact {}", artifact_id),
        Some(CellOutput::Text { .. }) => "text".to_string(),
        Some(CellOutput::Error { error, .. }) => format!("error: {}", error),
    };
    format!(
        "[{}] {} v{}: {}",
        kind_name(cell.kind),
        cell.cell_id,
        cell.version,
        output
    )
}

fn kind_name(kind: CellKind) -> &'static str {
    match kind {
        CellKind::Sql => "sql",
        CellKind::Markdown => "markdown",
        CellKind::Chart => "chart",
    }
}
