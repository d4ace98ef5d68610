//! pidata - context-safe DuckDB tools for coding agents
//!
//! Every tool call prints one JSON object on stdout:
//! `{"content": ..., "details": ...}` on success, `{"error": {"kind", "message"}}`
//! on failure (exit status 1). Progress goes to stderr, logs to the XDG state dir.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Logs: $XDG_STATE_HOME/pidata/pidata.log (~/.local/state/pidata/pidata.log)
//! - Config: $XDG_CONFIG_HOME/pidata/config.toml (~/.config/pidata/config.toml)

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pidata_core::tools::{self, ToolContext, ToolError};
use pidata_core::Config;
use serde::Serialize;
use serde_json::{json, Value};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "pidata")]
#[command(about = "Context-safe DuckDB tools for coding agents")]
#[command(version)]
struct Args {
    /// Workspace directory (default: PIDATA_WORKSPACE or ./.pi-data)
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    /// Hide the progress spinner
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or reset the workspace session
    Init {
        /// Profile name recorded in the session
        #[arg(long)]
        profile: Option<String>,

        /// Free-form session description
        #[arg(long)]
        description: Option<String>,
    },

    /// List the available tools
    Tools {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Call a tool with JSON parameters
    Call {
        /// Tool name, e.g. data_query
        tool: String,

        /// Parameters as a JSON object
        #[arg(long, conflicts_with = "params_file")]
        params: Option<String>,

        /// Read parameters from a file ("-" for stdin)
        #[arg(long)]
        params_file: Option<PathBuf>,
    },
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        pidata_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("pidata starting");

    let (tool, params) = match args.command {
        Command::Tools { json } => {
            print_tools(json)?;
            return Ok(ExitCode::SUCCESS);
        }
        Command::Init {
            profile,
            description,
        } => (
            "data_init".to_string(),
            json!({ "profile": profile, "description": description }),
        ),
        Command::Call {
            tool,
            params,
            params_file,
        } => (tool, read_params(params, params_file)?),
    };

    let cwd = std::env::current_dir().context("failed to resolve working directory")?;
    let ctx = ToolContext::system(config, cwd, args.workspace);

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nCancelling...");
        token.cancel();
    })
    .context("failed to set Ctrl+C handler")?;

    let pb = if args.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .context("invalid progress template")?,
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message(tool.clone());
        pb
    };

    let outcome = tools::call(&ctx, &tool, params, &cancel, &|message| {
        pb.set_message(message.to_string())
    });
    pb.finish_and_clear();

    match outcome {
        Ok(output) => {
            tracing::info!(tool = %tool, "Tool call complete");
            print_json(&output)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            tracing::warn!(tool = %tool, error = %e, "Tool call failed");
            print_json(&json!({ "error": ToolError::from(&e) }))?;
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Parameters from `--params`, `--params-file`, or an empty object.
fn read_params(inline: Option<String>, file: Option<PathBuf>) -> Result<Value> {
    let text = match (inline, file) {
        (Some(text), _) => text,
        (None, Some(path)) if path.as_os_str() == "-" => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("failed to read parameters from stdin")?;
            text
        }
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => return Ok(json!({})),
    };

    let value: Value = serde_json::from_str(&text).context("parameters are not valid JSON")?;
    if !value.is_object() {
        bail!("parameters must be a JSON object");
    }
    Ok(value)
}

fn print_tools(as_json: bool) -> Result<()> {
    if as_json {
        return print_json(&tools::TOOLS);
    }
    let width = tools::TOOLS
        .iter()
        .map(|t| t.name.len())
        .max()
        .unwrap_or(0);
    for tool in tools::TOOLS {
        println!("{:<width$}  {}", tool.name, tool.description, width = width);
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize output")?
    );
    Ok(())
}
