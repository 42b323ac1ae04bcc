//! Command line interface.

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use eyetest_models::{ProcessingConfig, Region};

use crate::error::WorkerResult;
use crate::pipeline::ProcessRequest;

#[derive(Debug, Parser)]
#[command(name = "eyetest", version, about = "Transform football clips for repost")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the full pipeline and write the transformed clip
    Process(JobArgs),
    /// Validate settings and print the recipe and filter graph without encoding
    Recipe(JobArgs),
    /// Print the JSON schema of the settings file
    Schema,
}

#[derive(Debug, Args)]
pub struct JobArgs {
    /// Source video
    pub source: PathBuf,

    /// Occlusion region as normalized `x,y,width,height` (repeatable)
    #[arg(long = "region", value_parser = parse_region)]
    pub regions: Vec<Region>,

    /// JSON settings file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Setting override as `key=value`, e.g. `preset=cool` (repeatable)
    #[arg(long = "set", value_parser = parse_key_value)]
    pub overrides: Vec<(String, String)>,

    /// Output directory; overrides EYETEST_OUTPUT_DIR
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

impl JobArgs {
    /// Load settings and assemble the request.
    pub fn request(&self) -> WorkerResult<ProcessRequest> {
        Ok(ProcessRequest {
            source: self.source.clone(),
            regions: self.regions.clone(),
            config: load_processing_config(self.config.as_deref(), &self.overrides)?,
        })
    }
}

/// Parse `x,y,width,height` in normalized units.
pub fn parse_region(s: &str) -> Result<Region, String> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid number in region '{}': {}", s, e))?;
    match parts.as_slice() {
        [x, y, w, h] => Region::new(*x, *y, *w, *h).map_err(|e| e.to_string()),
        _ => Err(format!(
            "region '{}' must have four values: x,y,width,height",
            s
        )),
    }
}

pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Settings file (defaults when absent) with overrides applied on top.
pub fn load_processing_config(
    path: Option<&Path>,
    overrides: &[(String, String)],
) -> WorkerResult<ProcessingConfig> {
    let mut config = match path {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => ProcessingConfig::default(),
    };
    config.apply_key_values(overrides.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
    Ok(config)
}
