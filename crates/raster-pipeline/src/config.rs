//! Configuration for a pipeline run.
//!
//! Everything is passed explicitly through [`PipelineConfig`]; nothing is
//! read from process-wide state once a run has started.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::executor::ExecutorConfig;
use crate::naming::PathNamer;
use crate::rank::BurnMode;
use crate::rasterize::{RasterizeOptions, TouchPolicy, DEFAULT_NODATA};

/// How rasterized tiles are assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblerStrategy {
    /// One sparse feature × y × x array.
    #[default]
    Stack,
    /// One raster file per feature plus a catalog sidecar.
    Files,
}

impl AssemblerStrategy {
    /// Parse from string (case-insensitive); `None` for unknown names.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "stack" => Some(Self::Stack),
            "files" | "file" => Some(Self::Files),
            _ => None,
        }
    }

    /// Parse from string, falling back to the default for unknown names.
    pub fn from_str(s: &str) -> Self {
        Self::parse(s).unwrap_or_else(|| {
            warn!(value = s, "Unknown assembler strategy, using stack");
            Self::default()
        })
    }
}

impl std::fmt::Display for AssemblerStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stack => write!(f, "stack"),
            Self::Files => write!(f, "files"),
        }
    }
}

/// Configuration for a rasterization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker pool settings.
    pub executor: ExecutorConfig,

    /// Pixel selection policy.
    pub touch: TouchPolicy,

    /// Sentinel written outside the grid's valid footprint.
    pub nodata: u8,

    /// How burn values are derived.
    pub burn_mode: BurnMode,

    /// Column holding the presence rank.
    pub rank_column: String,

    /// Dissolve grouping columns; empty disables the dissolve step.
    pub group_by: Vec<String>,

    /// Directory for cached dissolve outputs; `None` disables caching.
    pub dissolve_cache_dir: Option<PathBuf>,

    /// Attribute columns kept on the output are those starting with one of
    /// these prefixes...
    pub retain_prefixes: Vec<String>,

    /// ...plus these columns.
    pub retain_columns: Vec<String>,

    /// Assembly strategy.
    pub assembler: AssemblerStrategy,

    /// Output location (stack directory or root of per-feature files).
    pub output_dir: PathBuf,

    /// Per-feature path construction (files strategy).
    pub naming: PathNamer,

    /// Zarr encoding settings.
    pub zarr: ZarrConfig,

    /// Assemble whatever succeeded when some features fail.
    pub allow_partial: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            touch: TouchPolicy::AllTouched,
            nodata: DEFAULT_NODATA,
            burn_mode: BurnMode::Presence,
            rank_column: "PRESENCE_CATEGORY".to_string(),
            group_by: Vec::new(),
            dissolve_cache_dir: None,
            retain_prefixes: vec!["TAXON".to_string()],
            retain_columns: vec!["PRESENCE_CATEGORY".to_string()],
            assembler: AssemblerStrategy::Stack,
            output_dir: PathBuf::from("output"),
            naming: PathNamer::default(),
            zarr: ZarrConfig::default(),
            allow_partial: true,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("RASTER_WORKERS") {
            if let Ok(n) = val.parse() {
                config.executor.workers = n;
            }
        }

        if let Ok(val) = std::env::var("RASTER_BATCH_SIZE") {
            if let Ok(n) = val.parse() {
                config.executor.batch_size = n;
            }
        }

        if let Ok(val) = std::env::var("RASTER_TOUCH_POLICY") {
            config.touch = TouchPolicy::from_str(&val);
        }

        if let Ok(val) = std::env::var("RASTER_NODATA") {
            if let Ok(n) = val.parse() {
                config.nodata = n;
            }
        }

        if let Ok(val) = std::env::var("RASTER_BURN_MODE") {
            config.burn_mode = BurnMode::from_str(&val);
        }

        if let Ok(val) = std::env::var("RASTER_GROUP_BY") {
            config.group_by = split_list(&val);
        }

        if let Ok(val) = std::env::var("RASTER_DISSOLVE_CACHE_DIR") {
            config.dissolve_cache_dir = Some(PathBuf::from(val));
        }

        if let Ok(val) = std::env::var("RASTER_ASSEMBLER") {
            config.assembler = AssemblerStrategy::from_str(&val);
        }

        if let Ok(val) = std::env::var("RASTER_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("RASTER_ALLOW_PARTIAL") {
            config.allow_partial = val.to_lowercase() == "true" || val == "1";
        }

        config.zarr = ZarrConfig::from_env();
        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.executor.validate()?;
        self.zarr.validate()?;
        self.burn_mode
            .validate(self.nodata)
            .map_err(|e| e.to_string())?;

        if self.nodata <= self.burn_mode.max_burn_value() {
            return Err(format!(
                "nodata {} must be larger than the largest burn value {}",
                self.nodata,
                self.burn_mode.max_burn_value()
            ));
        }

        if self.group_by.iter().any(|c| c.trim().is_empty()) {
            return Err("group_by contains an empty column name".to_string());
        }

        if self.naming.name_column.trim().is_empty() {
            return Err("naming.name_column must be set".to_string());
        }

        Ok(())
    }

    /// Rasterizer options derived from this configuration.
    pub fn rasterize_options(&self) -> RasterizeOptions {
        RasterizeOptions {
            touch: self.touch,
            nodata: self.nodata,
        }
    }
}

fn split_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Zarr encoding settings for persisted rasters and stacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZarrConfig {
    /// Chunk dimension for 2-D rasters (square chunks).
    pub chunk_size: usize,

    /// Chunk length for 1-D coordinate-list arrays.
    pub list_chunk_size: usize,

    /// Compression codec.
    pub compression: ZarrCompression,

    /// Compression level (1-9).
    pub compression_level: u8,

    /// Enable byte shuffle filter.
    pub shuffle: bool,
}

impl Default for ZarrConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            list_chunk_size: 1 << 20,
            compression: ZarrCompression::BloscZstd,
            compression_level: 5,
            shuffle: true,
        }
    }
}

impl ZarrConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ZARR_CHUNK_SIZE") {
            if let Ok(size) = val.parse() {
                config.chunk_size = size;
            }
        }

        if let Ok(val) = std::env::var("ZARR_COMPRESSION") {
            config.compression = ZarrCompression::from_str(&val);
        }

        if let Ok(val) = std::env::var("ZARR_COMPRESSION_LEVEL") {
            if let Ok(level) = val.parse() {
                config.compression_level = level;
            }
        }

        if let Ok(val) = std::env::var("ZARR_SHUFFLE") {
            config.shuffle = val.to_lowercase() == "true" || val == "1";
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("zarr chunk_size must be > 0".to_string());
        }

        if self.list_chunk_size == 0 {
            return Err("zarr list_chunk_size must be > 0".to_string());
        }

        if self.compression_level == 0 || self.compression_level > 9 {
            return Err("zarr compression_level must be 1-9".to_string());
        }

        Ok(())
    }
}

/// Compression codec for Zarr output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZarrCompression {
    /// No compression.
    None,
    /// Blosc with LZ4.
    BloscLz4,
    /// Blosc with Zstd.
    #[default]
    BloscZstd,
}

impl ZarrCompression {
    /// Parse from string (case-insensitive), falling back to blosc_zstd.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "none" => Self::None,
            "lz4" | "blosc_lz4" => Self::BloscLz4,
            "zstd" | "blosc_zstd" => Self::BloscZstd,
            _ => {
                warn!(value = s, "Unknown compression, using blosc_zstd");
                Self::BloscZstd
            }
        }
    }

    /// Get the codec name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::BloscLz4 => "blosc_lz4",
            Self::BloscZstd => "blosc_zstd",
        }
    }
}

impl std::fmt::Display for ZarrCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.touch, TouchPolicy::AllTouched);
        assert_eq!(config.nodata, 255);
        assert_eq!(config.assembler, AssemblerStrategy::Stack);
        assert!(config.group_by.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = PipelineConfig::default();
        config.burn_mode = BurnMode::Rank;
        config.nodata = 2;
        assert!(config.validate().is_err());

        config = PipelineConfig::default();
        config.group_by = vec!["TAXON_ID".to_string(), " ".to_string()];
        assert!(config.validate().is_err());

        config = PipelineConfig::default();
        config.zarr.compression_level = 10;
        assert!(config.validate().is_err());

        config = PipelineConfig::default();
        config.executor.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"touch": "exact", "assembler": "files", "group_by": ["TAXON_ID"]}"#,
        )
        .unwrap();
        assert_eq!(config.touch, TouchPolicy::Exact);
        assert_eq!(config.assembler, AssemblerStrategy::Files);
        assert_eq!(config.group_by, vec!["TAXON_ID"]);
        assert_eq!(config.rank_column, "PRESENCE_CATEGORY");
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!(AssemblerStrategy::from_str("FILES"), AssemblerStrategy::Files);
        assert_eq!(AssemblerStrategy::from_str("other"), AssemblerStrategy::Stack);
        assert_eq!(AssemblerStrategy::parse("other"), None);
        assert_eq!(AssemblerStrategy::parse(" Stack "), Some(AssemblerStrategy::Stack));
        assert_eq!(BurnMode::parse("RANK"), Some(BurnMode::Rank));
        assert_eq!(BurnMode::parse("ranked"), None);
        assert_eq!(ZarrCompression::from_str("lz4"), ZarrCompression::BloscLz4);
        assert_eq!(ZarrCompression::from_str("invalid"), ZarrCompression::BloscZstd);
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("A, B,,C "), vec!["A", "B", "C"]);
    }
}
