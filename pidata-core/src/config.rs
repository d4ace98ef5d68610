//! Configuration loading and management
//!
//! Configuration is layered, highest precedence first:
//! 1. `PIDATA_*` environment variables
//! 2. `~/.config/pidata/config.toml`
//! 3. Built-in defaults
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/pidata/` (~/.config/pidata/)
//! - State/Logs: `$XDG_STATE_HOME/pidata/` (~/.local/state/pidata/)
//!
//! The loaded [`Config`] is built once at process start and handed by reference
//! to every component that needs it.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable overriding the engine binary.
pub const ENV_DUCKDB_BIN: &str = "PIDATA_DUCKDB_BIN";
/// Environment variable overriding the database target.
pub const ENV_DATABASE: &str = "PIDATA_DATABASE";
/// Environment variable overriding the workspace root.
pub const ENV_WORKSPACE: &str = "PIDATA_WORKSPACE";
/// Environment variable overriding the chart render helper command.
pub const ENV_RENDER_BIN: &str = "PIDATA_RENDER_BIN";
/// Environment variable overriding the default row bound for queries.
pub const ENV_MAX_ROWS: &str = "PIDATA_MAX_ROWS";
/// Environment variable overriding the default chart width.
pub const ENV_CHART_WIDTH: &str = "PIDATA_CHART_WIDTH";
/// Environment variable overriding the default chart height.
pub const ENV_CHART_HEIGHT: &str = "PIDATA_CHART_HEIGHT";
/// Environment variable toggling auto-open of rendered documents.
pub const ENV_AUTO_OPEN: &str = "PIDATA_AUTO_OPEN";

/// In-memory database target understood by the engine.
pub const IN_MEMORY_DATABASE: &str = ":memory:";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Analytical engine invocation
    #[serde(default)]
    pub engine: EngineConfig,

    /// Workspace defaults
    #[serde(default)]
    pub workspace: WorkspaceConfig,

    /// Chart rendering
    #[serde(default)]
    pub render: RenderConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How to reach the external analytical engine.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Engine binary (name on PATH or absolute path)
    #[serde(default = "default_engine_binary")]
    pub binary: PathBuf,

    /// Database file path, or `:memory:`
    #[serde(default = "default_database")]
    pub database: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: default_engine_binary(),
            database: default_database(),
        }
    }
}

fn default_engine_binary() -> PathBuf {
    PathBuf::from("duckdb")
}

fn default_database() -> String {
    IN_MEMORY_DATABASE.to_string()
}

/// Workspace defaults.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceConfig {
    /// Workspace root; relative paths resolve against the working directory
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,

    /// Row bound applied to unbounded queries before materialization
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
            max_rows: default_max_rows(),
        }
    }
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from(".pi-data")
}

fn default_max_rows() -> usize {
    10_000
}

/// Chart rendering configuration.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RenderConfig {
    /// Helper command that reads a Vega-Lite spec on stdin and writes PNG bytes
    #[serde(default = "default_render_command")]
    pub command: Vec<String>,

    /// Default chart width in pixels
    #[serde(default = "default_chart_width")]
    pub width: u32,

    /// Default chart height in pixels
    #[serde(default = "default_chart_height")]
    pub height: u32,

    /// Open interactive documents in a browser after rendering
    #[serde(default)]
    pub auto_open: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            command: default_render_command(),
            width: default_chart_width(),
            height: default_chart_height(),
            auto_open: false,
        }
    }
}

fn default_render_command() -> Vec<String> {
    vec![
        "uv".into(),
        "run".into(),
        "--script".into(),
        Config::render_helper_path().to_string_lossy().into_owned(),
    ]
}

fn default_chart_width() -> u32 {
    640
}

fn default_chart_height() -> u32 {
    400
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path, then apply environment overrides
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Config::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific path (no environment overrides)
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Apply `PIDATA_*` overrides using the given variable lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(bin) = get(ENV_DUCKDB_BIN) {
            self.engine.binary = PathBuf::from(bin);
        }
        if let Some(database) = get(ENV_DATABASE) {
            self.engine.database = database;
        }
        if let Some(root) = get(ENV_WORKSPACE) {
            self.workspace.root = PathBuf::from(root);
        }
        if let Some(command) = get(ENV_RENDER_BIN) {
            self.render.command = command.split_whitespace().map(str::to_string).collect();
        }
        if let Some(max_rows) = get(ENV_MAX_ROWS) {
            self.workspace.max_rows = parse_env(ENV_MAX_ROWS, &max_rows)?;
        }
        if let Some(width) = get(ENV_CHART_WIDTH) {
            self.render.width = parse_env(ENV_CHART_WIDTH, &width)?;
        }
        if let Some(height) = get(ENV_CHART_HEIGHT) {
            self.render.height = parse_env(ENV_CHART_HEIGHT, &height)?;
        }
        if let Some(auto_open) = get(ENV_AUTO_OPEN) {
            self.render.auto_open = parse_bool(ENV_AUTO_OPEN, &auto_open)?;
        }

        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/pidata/config.toml` (~/.config/pidata/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("pidata").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/pidata/` (~/.local/state/pidata/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("pidata")
    }

    /// Returns the bundled chart helper path, written on first image render
    ///
    /// `$XDG_DATA_HOME/pidata/render_vega.py` (~/.local/share/pidata/render_vega.py)
    pub fn render_helper_path() -> PathBuf {
        xdg_data_home().join("pidata").join("render_vega.py")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/pidata/pidata.log` (~/.local/state/pidata/pidata.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("pidata.log")
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} has an invalid value: {:?}", key, value)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!(
            "{} has an invalid value: {:?}",
            key, value
        ))),
    }
}
