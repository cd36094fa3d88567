//! Run configuration for the rasterizer.
//!
//! A YAML file supplies a `PipelineConfig` (every field optional), with
//! `${VAR}` and `${VAR:-default}` substitution before parsing. Without a
//! file, settings come from `RASTER_*` / `ZARR_*` environment variables.
//! Command-line flags override both.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use raster_pipeline::{available_cores, AssemblerStrategy, BurnMode, PipelineConfig, TouchPolicy};

/// Load and parse a YAML run configuration with environment variable substitution.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config from {:?}", path.as_ref()))?;

    let expanded = expand_env_vars(&content)?;

    let config: PipelineConfig = serde_yaml::from_str(&expanded)
        .with_context(|| format!("Failed to parse config from {:?}", path.as_ref()))?;

    Ok(config)
}

/// Values given on the command line; `None` keeps the configured value.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub output_dir: Option<PathBuf>,
    pub assembler: Option<String>,
    pub workers: Option<usize>,
    pub touch: Option<String>,
    pub burn_mode: Option<String>,
    pub group_by: Option<String>,
    pub dissolve_cache_dir: Option<PathBuf>,
    pub strict: bool,
}

impl Overrides {
    /// Apply the flags; unknown enum names are rejected. `workers: 0` means all cores.
    pub fn apply(&self, config: &mut PipelineConfig) -> Result<()> {
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(val) = &self.assembler {
            let Some(assembler) = AssemblerStrategy::parse(val) else {
                bail!("Unknown assembler '{}', expected stack or files", val);
            };
            config.assembler = assembler;
        }
        if let Some(n) = self.workers {
            config.executor.workers = if n == 0 { available_cores() } else { n };
        }
        if let Some(val) = &self.touch {
            let Some(touch) = TouchPolicy::parse(val) else {
                bail!("Unknown touch policy '{}', expected all_touched or exact", val);
            };
            config.touch = touch;
        }
        if let Some(val) = &self.burn_mode {
            let Some(mode) = BurnMode::parse(val) else {
                bail!("Unknown burn mode '{}', expected presence or rank", val);
            };
            config.burn_mode = mode;
        }
        if let Some(val) = &self.group_by {
            config.group_by = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(dir) = &self.dissolve_cache_dir {
            config.dissolve_cache_dir = Some(dir.clone());
        }
        if self.strict {
            config.allow_partial = false;
        }
        Ok(())
    }
}

/// Resolve the final configuration: file or environment, then flags.
pub fn resolve(path: Option<&Path>, overrides: &Overrides) -> Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => PipelineConfig::from_env(),
    };
    overrides.apply(&mut config)?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    Ok(config)
}

/// Expand environment variables in YAML content.
/// Supports ${VAR} and ${VAR:-default} syntax.
fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .with_context(|| format!("Unclosed variable substitution: ${{{}", after))?;
        result.push_str(&resolve_var_expr(&after[..end])?);
        rest = &after[end + 1..];
    }
    result.push_str(rest);

    Ok(result)
}

/// Resolve variable expression (supports VAR and VAR:-default syntax).
fn resolve_var_expr(expr: &str) -> Result<String> {
    if let Some((var_name, default)) = expr.split_once(":-") {
        match std::env::var(var_name.trim()) {
            Ok(val) if !val.is_empty() => Ok(val),
            _ => Ok(default.to_string()),
        }
    } else {
        std::env::var(expr.trim()).with_context(|| format!("Environment variable {} not set", expr))
    }
}
