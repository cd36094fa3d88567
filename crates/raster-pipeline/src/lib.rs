//! Vector-to-Raster Pipeline
//!
//! This crate burns large collections of polygon features onto a fixed
//! reference grid. It is built for species-distribution style inputs where
//! each feature covers a small part of a large grid:
//!
//! - **Dissolve**: optional union of features sharing attribute values,
//!   cached on disk by content
//! - **Rasterize**: exact or all-touched pixel selection, burned with a
//!   presence flag or a presence rank
//! - **Parallel**: bounded worker pool with ordered results, per-task
//!   failure capture and cancellation
//! - **Assemble**: one sparse feature × y × x stack, or one raster per
//!   feature with a catalog
//!
//! # Architecture
//!
//! ```text
//! FeatureSource
//!      │
//!      ▼
//! Dissolver (optional, DissolveCache)
//!      │
//!      ▼
//! BurnSpec::from_feature ──► Rasterizer::rasterize   (ParallelExecutor)
//!                                   │
//!                                   ▼
//!                              SparseTile
//!                                   │
//!                  ┌────────────────┴───────────────┐
//!                  ▼                                ▼
//!           StackAssembler                    FileAssembler
//!           stack.zarr                        <category>/<name>_<RANK>.zarr
//!                                             catalog.csv
//! ```
//!
//! # Example
//!
//! ```ignore
//! use raster_pipeline::{GeoTransform, PipelineConfig, RasterPipeline, ReferenceGrid};
//!
//! let grid = ReferenceGrid::new(GeoTransform::from_origin(112.0, -10.0, 0.01, 0.01), "EPSG:4283", 3400, 4100)?;
//! let pipeline = RasterPipeline::new(PipelineConfig::from_env())?;
//! let run = pipeline.run(&grid, features)?;
//!
//! for failure in &run.report.failures {
//!     eprintln!("{}: {}", failure.key, failure.message);
//! }
//! ```

pub mod assembler;
pub mod config;
pub mod dissolve;
pub mod error;
pub mod executor;
pub mod feature;
pub mod grid;
pub mod naming;
pub mod pipeline;
pub mod rank;
pub mod rasterize;
pub mod sparse;
pub mod writer;

// Re-export commonly used types at crate root
pub use assembler::{
    CatalogRow, CoordinateVector, FeatureStack, FileAssembler, FileAssembly, OutputCatalog,
    RowStatus, StackAssembler, CATALOG_FILE,
};
pub use config::{AssemblerStrategy, PipelineConfig, ZarrCompression, ZarrConfig};
pub use dissolve::{DissolveCache, DissolveOutput, Dissolver, DroppedGroup, RejectedFeature};
pub use error::{PipelineError, Result};
pub use executor::{
    available_cores, BatchReport, CancellationToken, ExecutorConfig, ParallelExecutor, TaskError,
    TaskResult,
};
pub use feature::{AttributeValue, Attributes, Feature, FeatureSource};
pub use grid::{GeoTransform, ReferenceGrid};
pub use naming::{ensure_unique, sanitize_component, PathNamer};
pub use pipeline::{
    FailureStage, FeatureFailure, PipelineOutput, PipelineReport, PipelineRun, RasterPipeline,
    STACK_DIR,
};
pub use rank::{BurnMode, BurnSpec, PresenceRank};
pub use rasterize::{RasterTile, RasterizeOptions, Rasterizer, TouchPolicy, BACKGROUND, DEFAULT_NODATA};
pub use sparse::SparseTile;
pub use writer::{RasterMetadata, StackMetadata, ZarrWriter};
