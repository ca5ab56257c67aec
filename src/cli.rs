//! CLI stage runners, shared between `main.rs`'s subcommand dispatch and
//! (indirectly, via `pipeline.rs`) the HTTP layer.
//!
//! Each function reads whatever the corresponding stage needs from disk,
//! runs it against the working directory, and prints the JSON result to
//! stdout — scripting-friendly, and exercises the same `pipeline::run_*`
//! functions the dashboard calls.

use crate::pipeline;
use crate::store::WorkingDir;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};

fn read_json_file(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {} as JSON", path.display()))
}

fn print_result(result: &Value) {
    println!("{}", serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string()));
}

pub fn run_clean(data_dir: &Path, input: &Path) -> Result<()> {
    let body = read_json_file(input)?;
    let wd = WorkingDir::new(data_dir)?;
    let result = pipeline::run_clean(&wd, &body).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    tracing::info!(rows = %result["rows"], "clean stage complete");
    print_result(&result);
    Ok(())
}

pub fn run_duration(data_dir: &Path) -> Result<()> {
    let wd = WorkingDir::new(data_dir)?;
    let result = pipeline::run_duration(&wd).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    tracing::info!(rows = %result["rows"], "duration stage complete");
    print_result(&result);
    Ok(())
}

pub fn run_sequence(data_dir: &Path) -> Result<()> {
    let wd = WorkingDir::new(data_dir)?;
    let result = pipeline::run_sequence(&wd).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let edges = result["edges"].as_array().map(Vec::len).unwrap_or(0);
    tracing::info!(edges, "sequence stage complete");
    print_result(&result);
    Ok(())
}

pub fn run_critical(data_dir: &Path, extras: Option<PathBuf>) -> Result<()> {
    let body = match extras {
        Some(path) => read_json_file(&path)?,
        None => Value::Null,
    };
    let wd = WorkingDir::new(data_dir)?;
    let result = pipeline::run_critical(&wd, &body).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    tracing::info!("critical stage complete");
    print_result(&result);
    Ok(())
}
