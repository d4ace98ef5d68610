//! `data_*` tools

use super::{ToolContext, ToolOutput};
use crate::analysis::{AggregateRequest, ExportRequest, Metric, ProfileRequest};
use crate::artifacts::ArtifactStore;
use crate::catalog::MAX_SEARCH_HITS;
use crate::engine::FileFormat;
use crate::error::Result;
use crate::results::Materialized;
use crate::rlm::{self, markdown_table};
use crate::sql;
use crate::viz::ChartSpec;
use crate::workspace::Workspace;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Rows shown inline by `data_sql`.
const INLINE_ROWS: usize = 100;
const DEFAULT_PREVIEW_LIMIT: usize = 20;
const DEFAULT_SEARCH_LIMIT: usize = 20;
const DEFAULT_CHUNK_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct InitParams {
    #[serde(default)]
    profile: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

pub(super) fn init(ctx: &ToolContext, params: InitParams) -> Result<ToolOutput> {
    let ws = Workspace::create(&ctx.workspace_path(), params.profile, params.description)?;
    ToolOutput::new(
        format!(
            "Initialized workspace {} (session {})",
            ws.root().display(),
            ws.session().session_id
        ),
        ws.session(),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct TablesParams {
    #[serde(default)]
    schema: Option<String>,
}

pub(super) fn tables(
    ctx: &ToolContext,
    params: TablesParams,
    cancel: &CancellationToken,
) -> Result<ToolOutput> {
    let tables = ctx.catalog().list_tables(params.schema.as_deref(), cancel)?;
    let mut content = format!("{} tables", tables.len());
    for table in &tables {
        content.push_str(&format!(
            "\n- {}.{} ({}, {} columns)",
            table.schema, table.name, table.table_type, table.column_count
        ));
    }
    ToolOutput::new(content, json!({ "tables": tables }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct DescribeParams {
    table: String,
    #[serde(default)]
    schema: Option<String>,
    #[serde(default)]
    row_count: bool,
}

pub(super) fn describe(
    ctx: &ToolContext,
    params: DescribeParams,
    cancel: &CancellationToken,
) -> Result<ToolOutput> {
    let description = ctx.catalog().describe_table(
        &params.table,
        params.schema.as_deref(),
        params.row_count,
        cancel,
    )?;
    let mut content = format!("{}.{}", description.schema, description.name);
    if let Some(rows) = description.row_count {
        content.push_str(&format!(" ({} rows)", rows));
    }
    for column in &description.columns {
        content.push_str(&format!(
            "\n- {} {}{}",
            column.name,
            column.data_type,
            if column.nullable { "" } else { " NOT NULL" }
        ));
    }
    ToolOutput::new(content, &description)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct SearchParams {
    term: String,
    #[serde(default)]
    limit: Option<usize>,
}

pub(super) fn search(
    ctx: &ToolContext,
    params: SearchParams,
    cancel: &CancellationToken,
) -> Result<ToolOutput> {
    let limit = params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).min(MAX_SEARCH_HITS);
    let hits = ctx.catalog().search(&params.term, limit, cancel)?;
    let mut content = format!("{} matches for '{}'", hits.len(), params.term.trim());
    for hit in &hits {
        match (&hit.column, &hit.data_type) {
            (Some(column), Some(data_type)) => content.push_str(&format!(
                "\n- {}.{}.{} {}",
                hit.schema, hit.table, column, data_type
            )),
            _ => content.push_str(&format!("\n- {}.{}", hit.schema, hit.table)),
        }
    }
    ToolOutput::new(content, json!({ "hits": hits }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct SqlParams {
    sql: String,
    #[serde(default)]
    max_rows: Option<usize>,
}

/// Inline query for exploration; nothing is materialized.
pub(super) fn run_sql(
    ctx: &ToolContext,
    params: SqlParams,
    cancel: &CancellationToken,
) -> Result<ToolOutput> {
    let statement = sql::normalize(&params.sql)?;
    sql::ensure_read_only(&statement)?;
    let limit = params.max_rows.unwrap_or(INLINE_ROWS).clamp(1, INLINE_ROWS);
    // One extra row tells us whether the output was cut.
    let bounded = sql::bound(&statement, limit + 1);

    let mut tabular = ctx.runner.run_query(&bounded, cancel)?;
    let truncated = tabular.rows.len() > limit;
    tabular.rows.truncate(limit);
    tabular.row_count = tabular.rows.len();

    let mut content = format!("{} rows", tabular.rows.len());
    if truncated {
        content.push_str(" (more available; use data_query to keep them all)");
    }
    content.push_str("\n\n");
    content.push_str(&markdown_table(&tabular.columns, &tabular.rows));

    ToolOutput::new(
        content,
        json!({
            "sql": bounded,
            "columns": tabular.columns,
            "rows": tabular.rows,
            "rowCount": tabular.row_count,
            "truncated": truncated,
        }),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct QueryParams {
    sql: String,
    #[serde(default)]
    max_rows: Option<usize>,
    #[serde(default)]
    tags: Vec<String>,
}

pub(super) fn query(
    ctx: &ToolContext,
    params: QueryParams,
    cancel: &CancellationToken,
    progress: &dyn Fn(&str),
) -> Result<ToolOutput> {
    let statement = sql::normalize(&params.sql)?;
    sql::ensure_read_only(&statement)?;
    let max_rows = params
        .max_rows
        .unwrap_or(ctx.config().workspace.max_rows)
        .max(1);
    let bounded = sql::bound(&statement, max_rows);

    let ws = ctx.ensure_workspace()?;
    let materialized = ctx
        .results()
        .materialize(&ws, &bounded, params.tags, cancel, progress)?;
    ToolOutput::new(materialized_content(&materialized), &materialized)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(super) enum Listing {
    #[default]
    All,
    Results,
    Artifacts,
    Notebooks,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct ResultsParams {
    #[serde(default)]
    kind: Listing,
}

pub(super) fn results(ctx: &ToolContext, params: ResultsParams) -> Result<ToolOutput> {
    let ws = ctx.ensure_workspace()?;
    let want = |listing: Listing| params.kind == Listing::All || params.kind == listing;

    let mut content = format!("Workspace {}", ws.root().display());
    let mut details = serde_json::Map::new();

    if want(Listing::Results) {
        let results = ctx.results().list(&ws)?;
        content.push_str(&format!("\n\n{} results", results.len()));
        for result in &results {
            content.push_str(&format!(
                "\n- {}: {} rows, {} columns",
                result.result_id,
                result.row_count,
                result.columns.len()
            ));
        }
        details.insert("results".into(), serde_json::to_value(&results)?);
    }
    if want(Listing::Artifacts) {
        let artifacts = ArtifactStore.list(&ws)?;
        content.push_str(&format!("\n\n{} artifacts", artifacts.len()));
        for artifact in &artifacts {
            content.push_str(&format!(
                "\n- {} ({}): {}",
                artifact.artifact_id,
                artifact.kind,
                artifact.path.display()
            ));
        }
        details.insert("artifacts".into(), serde_json::to_value(&artifacts)?);
    }
    if want(Listing::Notebooks) {
        let notebooks = ctx.notebooks().list(&ws)?;
        content.push_str(&format!("\n\n{} notebooks", notebooks.len()));
        let summaries: Vec<_> = notebooks
            .iter()
            .map(|nb| {
                content.push_str(&format!(
                    "\n- {}: {} ({} cells)",
                    nb.notebook_id,
                    nb.title,
                    nb.cells.len()
                ));
                json!({
                    "notebookId": nb.notebook_id,
                    "title": nb.title,
                    "cells": nb.cells.len(),
                    "updatedAt": nb.updated_at,
                })
            })
            .collect();
        details.insert("notebooks".into(), serde_json::Value::Array(summaries));
    }

    ToolOutput::new(content, details)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct PreviewParams {
    result_id: String,
    #[serde(default)]
    offset: u64,
    #[serde(default)]
    limit: Option<usize>,
}

pub(super) fn preview(
    ctx: &ToolContext,
    params: PreviewParams,
    cancel: &CancellationToken,
) -> Result<ToolOutput> {
    let ws = ctx.ensure_workspace()?;
    let page = ctx.analyzer().preview(
        &ws,
        &params.result_id,
        params.offset,
        params.limit.unwrap_or(DEFAULT_PREVIEW_LIMIT),
        cancel,
    )?;

    let mut content = if page.data.rows.is_empty() {
        format!("{}: no rows at offset {} of {}", page.result_id, page.offset, page.total_rows)
    } else {
        let last = page.offset.saturating_add(page.data.rows.len() as u64);
        format!("{}: rows {}-{} of {}", page.result_id, page.offset + 1, last, page.total_rows)
    };
    if page.has_more {
        content.push_str(" (more available)");
    }
    content.push_str("\n\n");
    content.push_str(&markdown_table(&page.data.columns, &page.data.rows));
    ToolOutput::new(content, &page)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct ProfileParams {
    result_id: String,
    #[serde(default)]
    columns: Option<Vec<String>>,
    #[serde(default)]
    sample_size: Option<u64>,
}

pub(super) fn profile(
    ctx: &ToolContext,
    params: ProfileParams,
    cancel: &CancellationToken,
) -> Result<ToolOutput> {
    let ws = ctx.ensure_workspace()?;
    let request = ProfileRequest {
        columns: params.columns,
        sample_size: params.sample_size,
    };
    let profile = ctx.analyzer().profile(&ws, &params.result_id, &request, cancel)?;

    let mut content = format!(
        "Profile of {} ({} of {} rows)",
        profile.result_id, profile.sampled_rows, profile.row_count
    );
    for column in &profile.columns {
        content.push_str(&format!(
            "\n- {} {}: {:.1}% null, ~{} distinct",
            column.name, column.data_type, column.null_percent, column.distinct_count
        ));
        if let Some(numeric) = &column.numeric {
            content.push_str(&format!(", min {}, max {}", numeric.min, numeric.max));
            if let Some(mean) = numeric.mean {
                content.push_str(&format!(", mean {:.4}", mean));
            }
        }
    }
    ToolOutput::new(content, &profile)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct AggregateParams {
    result_id: String,
    #[serde(default)]
    group_by: Vec<String>,
    metrics: Vec<Metric>,
}

pub(super) fn aggregate(
    ctx: &ToolContext,
    params: AggregateParams,
    cancel: &CancellationToken,
    progress: &dyn Fn(&str),
) -> Result<ToolOutput> {
    let request = AggregateRequest {
        group_by: params.group_by,
        metrics: params.metrics,
    };
    request.validate()?;

    let ws = ctx.ensure_workspace()?;
    let materialized = ctx
        .analyzer()
        .aggregate(&ws, &params.result_id, &request, cancel, progress)?;
    ToolOutput::new(materialized_content(&materialized), &materialized)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct ExportParams {
    result_id: String,
    format: FileFormat,
    #[serde(default)]
    path: Option<PathBuf>,
}

pub(super) fn export(
    ctx: &ToolContext,
    params: ExportParams,
    cancel: &CancellationToken,
    progress: &dyn Fn(&str),
) -> Result<ToolOutput> {
    let ws = ctx.ensure_workspace()?;
    let request = ExportRequest {
        format: params.format,
        path: params.path,
    };
    let artifact = ctx
        .analyzer()
        .export(&ws, &params.result_id, &request, cancel, progress)?;
    ToolOutput::new(
        format!(
            "Exported {} to {} ({})",
            params.result_id,
            artifact.path.display(),
            artifact.artifact_id
        ),
        &artifact,
    )
}

pub(super) fn chart(
    ctx: &ToolContext,
    spec: ChartSpec,
    cancel: &CancellationToken,
    progress: &dyn Fn(&str),
) -> Result<ToolOutput> {
    let ws = ctx.ensure_workspace()?;
    let artifact = ctx.charts().render(&ws, &spec, cancel, progress)?;
    ToolOutput::new(
        format!(
            "Rendered {} chart of {} to {} ({})",
            artifact.kind,
            spec.result_id,
            artifact.path.display(),
            artifact.artifact_id
        ),
        &artifact,
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct SummarizeParams {
    result_id: String,
    #[serde(default)]
    rows: Option<usize>,
}

pub(super) fn summarize(
    ctx: &ToolContext,
    params: SummarizeParams,
    cancel: &CancellationToken,
) -> Result<ToolOutput> {
    let ws = ctx.ensure_workspace()?;
    let summary = rlm::summarize(&ctx.results(), &ws, &params.result_id, params.rows, cancel)?;
    ToolOutput::new(summary.text.clone(), &summary)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct ChunksParams {
    result_id: String,
    #[serde(default)]
    chunk_size: Option<usize>,
}

pub(super) fn chunks(ctx: &ToolContext, params: ChunksParams) -> Result<ToolOutput> {
    let ws = ctx.ensure_workspace()?;
    let meta = ctx.results().read_metadata(&ws, &params.result_id)?;
    let plan = rlm::chunk_plan(&meta, params.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE))?;

    let mut content = format!(
        "{}: {} rows in {} chunks of {}; read each with data_preview(offset, limit)",
        plan.result_id, plan.row_count, plan.total_chunks, plan.chunk_size
    );
    if plan.truncated {
        content.push_str(&format!(" (first {} listed)", plan.chunks.len()));
    }
    ToolOutput::new(content, &plan)
}

fn materialized_content(materialized: &Materialized) -> String {
    let meta = &materialized.result;
    let mut content = format!(
        "Materialized {}: {} rows, {} columns",
        meta.result_id,
        meta.row_count,
        meta.columns.len()
    );
    if !materialized.preview.rows.is_empty() {
        content.push_str("\n\n");
        content.push_str(&markdown_table(
            &materialized.preview.columns,
            &materialized.preview.rows,
        ));
    }
    content
}
