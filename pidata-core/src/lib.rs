//! # pidata-core
//!
//! Core library for pidata - context-safe data analysis tools for agents.
//!
//! Query output is never handed back in full. It is materialized to a parquet
//! file in the workspace and referenced by a short result id; every later
//! operation (preview, profile, aggregate, export, chart) works from that file
//! and returns bounded output.
//!
//! This library provides:
//! - A query runner that drives the DuckDB CLI as a subprocess
//! - Result, artifact, and notebook stores inside a workspace directory
//! - Analysis operators over materialized results
//! - The tool surface consumed by the agent runtime
//! - Configuration management and logging infrastructure
//!
//! ## Example
//!
//! ```rust,no_run
//! use pidata_core::tools::{self, ToolContext};
//! use pidata_core::Config;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = Config::load().expect("failed to load config");
//! let cwd = std::env::current_dir().expect("no working directory");
//! let ctx = ToolContext::system(config, cwd, None);
//!
//! let output = tools::call(
//!     &ctx,
//!     "data_query",
//!     serde_json::json!({ "sql": "SELECT 42 AS answer" }),
//!     &CancellationToken::new(),
//!     &|message| eprintln!("{}", message),
//! )
//! .expect("query failed");
//! println!("{}", output.content);
//! ```

// Re-export commonly used items at the crate root
pub use analysis::Analyzer;
pub use artifacts::ArtifactStore;
pub use catalog::Catalog;
pub use config::Config;
pub use engine::{QueryRunner, SystemProcessRunner};
pub use error::{Error, Result};
pub use notebook::NotebookEngine;
pub use results::ResultStore;
pub use types::*;
pub use workspace::Workspace;

// Public modules
pub mod analysis;
pub mod artifacts;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod notebook;
pub mod results;
pub mod rlm;
pub mod sql;
pub mod tools;
pub mod types;
pub mod viz;
pub mod workspace;
