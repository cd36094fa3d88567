//! Zarr V3 persistence for rasters and feature stacks.
//!
//! A per-feature raster is a single 2-D `uint8` array whose fill value is
//! the nodata sentinel. A stack is a group holding the 1-D coordinate-list
//! arrays `feature`, `rows`, `cols` and `values`, plus an optional 2-D
//! `mask` array; the labels and georeferencing live in group attributes.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zarrs::array::codec::bytes_to_bytes::blosc::{
    BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode,
};
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::group::{Group, GroupBuilder};
use zarrs::storage::{ReadableStorageTraits, WritableStorageTraits};
use zarrs_filesystem::FilesystemStore;

use crate::assembler::{CoordinateVector, FeatureStack, STACK_DIMS};
use crate::config::{ZarrCompression, ZarrConfig};
use crate::error::{PipelineError, Result};
use crate::feature::Attributes;
use crate::grid::{GeoTransform, ReferenceGrid};
use crate::rasterize::RasterTile;

/// Attributes stored alongside a per-feature raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterMetadata {
    /// (height, width)
    pub shape: (usize, usize),
    /// GDAL order: [c, a, b, f, d, e].
    pub transform: [f64; 6],
    pub crs: String,
    pub nodata: u8,
    /// Feature attributes carried onto the raster.
    pub attributes: Attributes,
    pub compression: String,
    pub created_at: DateTime<Utc>,
}

/// Group attributes of a persisted stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackMetadata {
    /// (features, height, width)
    pub shape: (usize, usize, usize),
    pub nnz: usize,
    pub dims: Vec<String>,
    /// GDAL order: [c, a, b, f, d, e].
    pub transform: [f64; 6],
    pub crs: String,
    pub nodata: u8,
    pub has_mask: bool,
    pub source_index: Vec<usize>,
    pub coords: Vec<CoordinateVector>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub compression: String,
    pub created_at: DateTime<Utc>,
}

impl StackMetadata {
    fn to_attributes(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(PipelineError::InvalidMetadata(
                "stack metadata is not an object".to_string(),
            )),
        }
    }
}

fn from_attributes<T: for<'de> Deserialize<'de>>(
    attrs: &serde_json::Map<String, serde_json::Value>,
) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(attrs.clone()))
        .map_err(|e| PipelineError::InvalidMetadata(e.to_string()))
}

/// Writer for Zarr V3 rasters and stacks on the local filesystem.
#[derive(Debug, Clone)]
pub struct ZarrWriter {
    config: ZarrConfig,
}

impl ZarrWriter {
    /// Create a new ZarrWriter with the given configuration.
    pub fn new(config: ZarrConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ZarrConfig {
        &self.config
    }

    fn open_store(path: &Path) -> Result<Arc<FilesystemStore>> {
        std::fs::create_dir_all(path)?;
        let store = FilesystemStore::new(path).map_err(|e| PipelineError::storage_error(e.to_string()))?;
        Ok(Arc::new(store))
    }

    /// Write one raster tile with its georeferencing and feature attributes.
    pub fn write_raster(
        &self,
        path: &Path,
        tile: &RasterTile,
        grid: &ReferenceGrid,
        nodata: u8,
        attributes: &Attributes,
    ) -> Result<RasterMetadata> {
        if tile.height != grid.height || tile.width != grid.width {
            return Err(PipelineError::InvalidGrid(format!(
                "tile is {}x{}, grid is {}x{}",
                tile.height, tile.width, grid.height, grid.width
            )));
        }

        let metadata = RasterMetadata {
            shape: (tile.height, tile.width),
            transform: grid.transform.to_gdal(),
            crs: grid.crs.clone(),
            nodata,
            attributes: attributes.clone(),
            compression: self.config.compression.as_str().to_string(),
            created_at: Utc::now(),
        };
        let attrs = match serde_json::to_value(&metadata)? {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };

        let store = Self::open_store(path)?;
        let chunk = self.config.chunk_size as u64;
        let array = self.build_array(
            store,
            "/",
            vec![tile.height as u64, tile.width as u64],
            vec![chunk.min(tile.height as u64), chunk.min(tile.width as u64)],
            DataType::UInt8,
            FillValue::from(nodata),
            1,
            Some(attrs),
        )?;

        array
            .store_metadata()
            .map_err(|e| PipelineError::storage_error(e.to_string()))?;

        let subset = ArraySubset::new_with_start_shape(
            vec![0, 0],
            vec![tile.height as u64, tile.width as u64],
        )
        .map_err(|e| PipelineError::storage_error(e.to_string()))?;

        array
            .store_array_subset_elements(&subset, &tile.data)
            .map_err(|e| PipelineError::storage_error(e.to_string()))?;

        debug!(path = %path.display(), "Wrote raster");
        Ok(metadata)
    }

    /// Read a raster written by [`ZarrWriter::write_raster`].
    pub fn read_raster(path: &Path) -> Result<(RasterTile, RasterMetadata)> {
        let store = Arc::new(
            FilesystemStore::new(path).map_err(|e| PipelineError::storage_error(e.to_string()))?,
        );
        let array = Array::open(store, "/").map_err(|e| PipelineError::zarr_error(e.to_string()))?;
        let metadata: RasterMetadata = from_attributes(array.attributes())?;

        let shape = array.shape().to_vec();
        if shape.len() != 2 {
            return Err(PipelineError::InvalidMetadata(format!(
                "raster must be 2-D, found {} dimensions",
                shape.len()
            )));
        }

        let subset = ArraySubset::new_with_shape(shape.clone());
        let data = array
            .retrieve_array_subset_elements::<u8>(&subset)
            .map_err(|e| PipelineError::zarr_error(e.to_string()))?;

        let tile = RasterTile {
            height: shape[0] as usize,
            width: shape[1] as usize,
            data,
        };
        Ok((tile, metadata))
    }

    /// Persist a stack as a Zarr group.
    pub fn write_stack(&self, path: &Path, stack: &FeatureStack) -> Result<StackMetadata> {
        stack.validate()?;

        let metadata = StackMetadata {
            shape: stack.shape,
            nnz: stack.nnz(),
            dims: STACK_DIMS.iter().map(|d| d.to_string()).collect(),
            transform: stack.transform.to_gdal(),
            crs: stack.crs.clone(),
            nodata: stack.nodata,
            has_mask: stack.mask.is_some(),
            source_index: stack.source_index.clone(),
            coords: stack.coords.clone(),
            x: stack.x.clone(),
            y: stack.y.clone(),
            compression: self.config.compression.as_str().to_string(),
            created_at: Utc::now(),
        };

        let store = Self::open_store(path)?;
        let group = GroupBuilder::new()
            .attributes(metadata.to_attributes()?)
            .build(store.clone(), "/")
            .map_err(|e| PipelineError::zarr_error(e.to_string()))?;
        group
            .store_metadata()
            .map_err(|e| PipelineError::storage_error(e.to_string()))?;

        self.write_list(store.clone(), "/feature", DataType::UInt32, 0u32, &stack.feature)?;
        self.write_list(store.clone(), "/rows", DataType::UInt32, 0u32, &stack.rows)?;
        self.write_list(store.clone(), "/cols", DataType::UInt32, 0u32, &stack.cols)?;
        self.write_list(store.clone(), "/values", DataType::UInt8, 0u8, &stack.values)?;

        if let Some(mask) = &stack.mask {
            let (_, height, width) = stack.shape;
            let chunk = self.config.chunk_size as u64;
            let array = self.build_array(
                store,
                "/mask",
                vec![height as u64, width as u64],
                vec![chunk.min(height as u64), chunk.min(width as u64)],
                DataType::UInt8,
                FillValue::from(0u8),
                1,
                None,
            )?;
            array
                .store_metadata()
                .map_err(|e| PipelineError::storage_error(e.to_string()))?;
            let encoded: Vec<u8> = mask.iter().map(|v| u8::from(*v)).collect();
            let subset = ArraySubset::new_with_shape(vec![height as u64, width as u64]);
            array
                .store_array_subset_elements(&subset, &encoded)
                .map_err(|e| PipelineError::storage_error(e.to_string()))?;
        }

        debug!(path = %path.display(), features = stack.len(), nnz = stack.nnz(), "Wrote stack");
        Ok(metadata)
    }

    /// Read a stack written by [`ZarrWriter::write_stack`].
    pub fn read_stack(path: &Path) -> Result<FeatureStack> {
        let store = Arc::new(
            FilesystemStore::new(path).map_err(|e| PipelineError::storage_error(e.to_string()))?,
        );
        let group = Group::open(store.clone(), "/").map_err(|e| PipelineError::zarr_error(e.to_string()))?;
        let metadata: StackMetadata = from_attributes(group.attributes())?;

        let feature = Self::read_list::<u32, _>(store.clone(), "/feature")?;
        let rows = Self::read_list::<u32, _>(store.clone(), "/rows")?;
        let cols = Self::read_list::<u32, _>(store.clone(), "/cols")?;
        let values = Self::read_list::<u8, _>(store.clone(), "/values")?;

        let mask = if metadata.has_mask {
            let array = Array::open(store, "/mask").map_err(|e| PipelineError::zarr_error(e.to_string()))?;
            let subset = ArraySubset::new_with_shape(array.shape().to_vec());
            let raw = array
                .retrieve_array_subset_elements::<u8>(&subset)
                .map_err(|e| PipelineError::zarr_error(e.to_string()))?;
            Some(raw.into_iter().map(|v| v != 0).collect())
        } else {
            None
        };

        let stack = FeatureStack {
            shape: metadata.shape,
            feature,
            rows,
            cols,
            values,
            source_index: metadata.source_index,
            coords: metadata.coords,
            x: metadata.x,
            y: metadata.y,
            crs: metadata.crs,
            transform: GeoTransform::from_gdal(metadata.transform),
            nodata: metadata.nodata,
            mask,
        };
        stack.validate()?;
        Ok(stack)
    }

    fn write_list<T, S>(
        &self,
        store: Arc<S>,
        path: &str,
        data_type: DataType,
        fill: T,
        data: &[T],
    ) -> Result<()>
    where
        T: zarrs::array::Element + Copy,
        FillValue: From<T>,
        S: ReadableStorageTraits + WritableStorageTraits + 'static,
    {
        let len = data.len() as u64;
        let chunk = (self.config.list_chunk_size as u64).min(len.max(1));
        let array = self.build_array(
            store,
            path,
            vec![len],
            vec![chunk],
            data_type,
            FillValue::from(fill),
            std::mem::size_of::<T>(),
            None,
        )?;
        array
            .store_metadata()
            .map_err(|e| PipelineError::storage_error(e.to_string()))?;

        if data.is_empty() {
            return Ok(());
        }

        let subset = ArraySubset::new_with_shape(vec![len]);
        array
            .store_array_subset_elements(&subset, data)
            .map_err(|e| PipelineError::storage_error(e.to_string()))?;
        Ok(())
    }

    fn read_list<T, S>(store: Arc<S>, path: &str) -> Result<Vec<T>>
    where
        T: zarrs::array::ElementOwned,
        S: ReadableStorageTraits + 'static,
    {
        let array = Array::open(store, path).map_err(|e| PipelineError::zarr_error(e.to_string()))?;
        let shape = array.shape().to_vec();
        if shape.first().copied().unwrap_or(0) == 0 {
            return Ok(Vec::new());
        }
        let subset = ArraySubset::new_with_shape(shape);
        array
            .retrieve_array_subset_elements::<T>(&subset)
            .map_err(|e| PipelineError::zarr_error(e.to_string()))
    }

    /// Build an array with the configured compression.
    #[allow(clippy::too_many_arguments)]
    fn build_array<S: ReadableStorageTraits + WritableStorageTraits + 'static>(
        &self,
        storage: Arc<S>,
        path: &str,
        shape: Vec<u64>,
        chunk_shape: Vec<u64>,
        data_type: DataType,
        fill_value: FillValue,
        typesize: usize,
        attrs: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Array<S>> {
        let chunk_shape: Vec<u64> = chunk_shape.into_iter().map(|c| c.max(1)).collect();
        let chunk_grid: zarrs::array::ChunkGrid = chunk_shape
            .try_into()
            .map_err(|e| PipelineError::config(format!("{:?}", e)))?;

        let mut builder = ArrayBuilder::new(shape, data_type, chunk_grid, fill_value);
        if let Some(attrs) = attrs {
            builder.attributes(attrs);
        }

        if self.config.compression != ZarrCompression::None {
            let codec = self.create_compression_codec(typesize)?;
            builder.bytes_to_bytes_codecs(vec![codec]);
        }

        builder
            .build(storage, path)
            .map_err(|e| PipelineError::zarr_error(e.to_string()))
    }

    /// Create the compression codec based on configuration.
    fn create_compression_codec(
        &self,
        typesize: usize,
    ) -> Result<Arc<dyn zarrs::array::codec::BytesToBytesCodecTraits>> {
        let level = BloscCompressionLevel::try_from(self.config.compression_level)
            .map_err(|_| PipelineError::config("Invalid compression level"))?;

        let shuffle = if self.config.shuffle && typesize > 1 {
            BloscShuffleMode::Shuffle
        } else {
            BloscShuffleMode::NoShuffle
        };

        // typesize is required when shuffle is enabled
        let typesize = match shuffle {
            BloscShuffleMode::NoShuffle => None,
            _ => Some(typesize),
        };

        let compressor = match self.config.compression {
            ZarrCompression::None => return Err(PipelineError::config("No compression configured")),
            ZarrCompression::BloscLz4 => BloscCompressor::LZ4,
            ZarrCompression::BloscZstd => BloscCompressor::Zstd,
        };

        let codec = BloscCodec::new(compressor, level, None, shuffle, typesize)
            .map_err(|e| PipelineError::config(e.to_string()))?;

        Ok(Arc::new(codec))
    }
}
