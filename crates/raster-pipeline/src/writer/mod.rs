//! Zarr persistence for per-feature rasters and stacks.

mod zarr_writer;

pub use zarr_writer::{RasterMetadata, StackMetadata, ZarrWriter};
