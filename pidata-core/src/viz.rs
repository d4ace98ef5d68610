//! Chart rendering
//!
//! A [`ChartSpec`] names a result and the columns to encode. The renderer
//! reads a bounded window of the result, builds a Vega-Lite document, and
//! writes either a standalone HTML page or a PNG produced by the configured
//! render helper (which reads the Vega-Lite JSON on stdin and writes PNG bytes
//! to stdout).

use crate::artifacts::ArtifactStore;
use crate::config::{Config, RenderConfig, ENV_RENDER_BIN};
use crate::error::{Error, Result};
use crate::results::{ensure_not_cancelled, ResultStore};
use crate::types::{Artifact, ArtifactKind, ResultMeta};
use crate::workspace::Workspace;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Rows embedded into a chart document.
pub const MAX_CHART_ROWS: usize = 5_000;

const VEGA_LITE_SCHEMA: &str = "https://vega.github.io/schema/vega-lite/v5.json";

/// Vega-Lite to PNG helper run by the default render command.
const RENDER_HELPER: &str = include_str!("../scripts/render_vega.py");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mark {
    Bar,
    Line,
    Point,
    Area,
    Tick,
    Arc,
}

impl Mark {
    fn as_str(&self) -> &'static str {
        match self {
            Mark::Bar => "bar",
            Mark::Line => "line",
            Mark::Point => "point",
            Mark::Area => "area",
            Mark::Tick => "tick",
            Mark::Arc => "arc",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartMode {
    #[default]
    Image,
    Html,
}

impl ChartMode {
    fn artifact_kind(&self) -> ArtifactKind {
        match self {
            ChartMode::Image => ArtifactKind::Image,
            ChartMode::Html => ArtifactKind::Html,
        }
    }
}

/// What to draw. Also the content of notebook chart cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChartSpec {
    pub result_id: String,
    pub mark: Mark,
    pub x: String,
    /// Measure column; record count when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub mode: ChartMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl ChartSpec {
    /// Parse a serialized spec, mapping malformed input to a validation error.
    pub fn parse(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::Validation(format!("invalid chart spec: {}", e)))
    }

    fn check_columns(&self, meta: &ResultMeta) -> Result<()> {
        let referenced = std::iter::once(&self.x)
            .chain(self.y.iter())
            .chain(self.color.iter());
        for name in referenced {
            if meta.column(name).is_none() {
                return Err(Error::Validation(format!(
                    "column '{}' does not exist in {}",
                    name, meta.result_id
                )));
            }
        }
        Ok(())
    }
}

/// Vega-Lite field type for an engine column type.
fn encoding_type(data_type: &str) -> &'static str {
    let upper = data_type.to_ascii_uppercase();
    if crate::types::is_numeric_type(&upper) {
        "quantitative"
    } else if upper.starts_with("DATE") || upper.starts_with("TIMESTAMP") || upper == "TIME" {
        "temporal"
    } else {
        "nominal"
    }
}

fn field_encoding(meta: &ResultMeta, name: &str) -> Value {
    let data_type = meta
        .column(name)
        .map(|c| c.data_type.as_str())
        .unwrap_or("VARCHAR");
    json!({ "field": name, "type": encoding_type(data_type) })
}

/// Build the Vega-Lite document for `spec` over the given rows.
pub fn vega_lite(
    spec: &ChartSpec,
    meta: &ResultMeta,
    values: &[crate::types::Row],
    defaults: &RenderConfig,
) -> Value {
    let y = match &spec.y {
        Some(column) => field_encoding(meta, column),
        None => json!({ "aggregate": "count", "type": "quantitative" }),
    };

    let mut encoding = serde_json::Map::new();
    if spec.mark == Mark::Arc {
        encoding.insert("theta".into(), y);
        encoding.insert("color".into(), field_encoding(meta, &spec.x));
    } else {
        encoding.insert("x".into(), field_encoding(meta, &spec.x));
        encoding.insert("y".into(), y);
        if let Some(color) = &spec.color {
            encoding.insert("color".into(), field_encoding(meta, color));
        }
    }

    let mut document = json!({
        "$schema": VEGA_LITE_SCHEMA,
        "width": spec.width.unwrap_or(defaults.width),
        "height": spec.height.unwrap_or(defaults.height),
        "mark": { "type": spec.mark.as_str(), "tooltip": true },
        "encoding": encoding,
        "data": { "values": values },
    });
    if let Some(title) = &spec.title {
        document["title"] = json!(title);
    }
    document
}

fn html_document(title: &str, vega_spec: &Value) -> String {
    format!(
        r##"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>{title}</title>
  <script src="https://cdn.jsdelivr.net/npm/vega@5"></script>
  <script src="https://cdn.jsdelivr.net/npm/vega-lite@5"></script>
  <script src="https://cdn.jsdelivr.net/npm/vega-embed@6"></script>
</head>
<body>
  <div id="chart"></div>
  <script>
    vegaEmbed("#chart", {spec});
  </script>
</body>
</html>
"##,
        title = escape_html(title),
        spec = vega_spec
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Renders chart specs into artifacts.
#[derive(Debug, Clone)]
pub struct ChartRenderer {
    results: ResultStore,
    artifacts: ArtifactStore,
    config: RenderConfig,
}

impl ChartRenderer {
    pub fn new(results: ResultStore, config: RenderConfig) -> Self {
        Self {
            results,
            artifacts: ArtifactStore,
            config,
        }
    }

    pub fn render(
        &self,
        ws: &Workspace,
        spec: &ChartSpec,
        cancel: &CancellationToken,
        progress: &dyn Fn(&str),
    ) -> Result<Artifact> {
        let meta = self.results.read_metadata(ws, &spec.result_id)?;
        spec.check_columns(&meta)?;

        progress(&format!("Loading chart data from {}", meta.result_id));
        let data_path = ResultStore::data_file_path(ws, &meta.result_id);
        let data = self
            .results
            .runner()
            .read_file(&data_path, MAX_CHART_ROWS, 0, cancel)?;
        if meta.row_count > MAX_CHART_ROWS as u64 {
            tracing::warn!(
                result_id = %meta.result_id,
                row_count = meta.row_count,
                "Chart data truncated to {} rows",
                MAX_CHART_ROWS
            );
        }

        let document = vega_lite(spec, &meta, &data.rows, &self.config);
        let kind = spec.mode.artifact_kind();
        let artifact_id = self.artifacts.allocate_id(ws, kind)?;
        let path = ArtifactStore::default_file_path(ws, &artifact_id, kind);

        ensure_not_cancelled(cancel)?;
        match spec.mode {
            ChartMode::Html => {
                let title = spec.title.as_deref().unwrap_or(&meta.result_id);
                std::fs::write(&path, html_document(title, &document))?;
            }
            ChartMode::Image => {
                progress("Rendering chart image");
                let png = self.render_png(&document, cancel)?;
                std::fs::write(&path, png)?;
            }
        }

        let artifact = self.artifacts.register(ws, artifact_id, kind, &path)?;
        if self.config.auto_open {
            open_in_viewer(&path);
        }
        Ok(artifact)
    }

    fn render_png(&self, document: &Value, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let (program, args) = self.config.command.split_first().ok_or_else(|| {
            Error::Config(format!("render command is empty (set {})", ENV_RENDER_BIN))
        })?;
        install_helper(&self.config.command, &Config::render_helper_path())?;
        let stdin = serde_json::to_vec(document)?;

        let output = self
            .results
            .runner()
            .process()
            .run(Path::new(program), args, Some(&stdin), cancel)
            .map_err(|e| match e {
                Error::Config(msg) => Error::Config(format!(
                    "{} (point {} or [render] command in config.toml at a Vega-Lite renderer)",
                    msg, ENV_RENDER_BIN
                )),
                other => other,
            })?;

        if !output.success() {
            return Err(Error::Execution(format!(
                "chart renderer failed: {}",
                output.stderr_text()
            )));
        }
        if output.stdout.is_empty() {
            return Err(Error::Execution(
                "chart renderer produced no image data".to_string(),
            ));
        }
        Ok(output.stdout)
    }
}

/// Write the bundled helper to `helper` when `command` runs it and it is missing.
fn install_helper(command: &[String], helper: &Path) -> Result<()> {
    if !command.iter().any(|arg| Path::new(arg) == helper) || helper.exists() {
        return Ok(());
    }
    if let Some(parent) = helper.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(helper, RENDER_HELPER)?;
    tracing::info!(path = %helper.display(), "Installed chart render helper");
    Ok(())
}

/// Hand a file to the desktop viewer. Failures are logged, never returned.
fn open_in_viewer(path: &Path) {
    let opener = if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };
    match std::process::Command::new(opener).arg(path).spawn() {
        Ok(_) => tracing::debug!(path = %path.display(), "Opened artifact"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Could not open artifact"),
    }
}
