//! Stack assembly: one labeled feature × y × x sparse array.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::feature::{AttributeValue, Feature};
use crate::grid::{GeoTransform, ReferenceGrid};
use crate::rasterize::RasterTile;
use crate::sparse::SparseTile;

/// Dimension names of a stack, outermost first.
pub const STACK_DIMS: [&str; 3] = ["idx", "y", "x"];

/// One attribute column laid out along the `idx` dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateVector {
    pub name: String,
    pub values: Vec<AttributeValue>,
}

/// Labeled 3-D sparse array. Entry `i` of every coordinate vector describes tile `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureStack {
    /// (features, height, width)
    pub shape: (usize, usize, usize),
    /// Combined coordinate list across all tiles.
    pub feature: Vec<u32>,
    pub rows: Vec<u32>,
    pub cols: Vec<u32>,
    pub values: Vec<u8>,
    /// Position of each tile's feature in the (dissolved) feature source.
    pub source_index: Vec<usize>,
    pub coords: Vec<CoordinateVector>,
    /// Pixel-centre coordinates of the spatial axes.
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub crs: String,
    pub transform: GeoTransform,
    pub nodata: u8,
    pub mask: Option<Vec<bool>>,
}

impl FeatureStack {
    /// Number of tiles.
    pub fn len(&self) -> usize {
        self.shape.0
    }

    pub fn is_empty(&self) -> bool {
        self.shape.0 == 0
    }

    /// Stored (non-background, unmasked) cells across the stack.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Coordinate vector by column name.
    pub fn coord(&self, name: &str) -> Option<&[AttributeValue]> {
        self.coords
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    /// Densify tile `i`.
    pub fn tile(&self, i: usize) -> Option<RasterTile> {
        if i >= self.len() {
            return None;
        }
        let (_, height, width) = self.shape;
        let mut sparse = SparseTile {
            height,
            width,
            ..Default::default()
        };
        for k in 0..self.values.len() {
            if self.feature[k] as usize == i {
                sparse.rows.push(self.rows[k]);
                sparse.cols.push(self.cols[k]);
                sparse.values.push(self.values[k]);
            }
        }
        Some(sparse.to_dense(self.mask.as_deref(), self.nodata))
    }

    /// Check the alignment invariants between tiles and coordinate vectors.
    pub fn validate(&self) -> Result<()> {
        let (n, height, width) = self.shape;
        if self.source_index.len() != n {
            return Err(PipelineError::InvalidMetadata(format!(
                "source_index has {} entries for {} tiles",
                self.source_index.len(),
                n
            )));
        }
        for coord in &self.coords {
            if coord.values.len() != n {
                return Err(PipelineError::InvalidMetadata(format!(
                    "coordinate '{}' has {} entries for {} tiles",
                    coord.name,
                    coord.values.len(),
                    n
                )));
            }
        }
        let nnz = self.values.len();
        if self.feature.len() != nnz || self.rows.len() != nnz || self.cols.len() != nnz {
            return Err(PipelineError::InvalidMetadata(
                "coordinate list arrays differ in length".to_string(),
            ));
        }
        if self.x.len() != width || self.y.len() != height {
            return Err(PipelineError::InvalidMetadata(
                "spatial coordinates do not match the grid shape".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builds a [`FeatureStack`] from sparse tiles in feature order.
#[derive(Debug, Clone)]
pub struct StackAssembler {
    columns: Vec<String>,
}

impl StackAssembler {
    /// `columns` are the attribute columns attached as coordinate vectors.
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    /// Sparse-encode a tile for stacking.
    pub fn encode(tile: &RasterTile, grid: &ReferenceGrid) -> SparseTile {
        SparseTile::from_dense(tile, grid.validity_mask.as_deref())
    }

    /// Stack `items` in the order given. Each item is the feature's position
    /// in the source, the feature, and its encoded tile.
    pub fn assemble<'a, I>(&self, grid: &ReferenceGrid, nodata: u8, items: I) -> Result<FeatureStack>
    where
        I: IntoIterator<Item = (usize, &'a Feature, SparseTile)>,
    {
        let mut stack = FeatureStack {
            shape: (0, grid.height, grid.width),
            feature: Vec::new(),
            rows: Vec::new(),
            cols: Vec::new(),
            values: Vec::new(),
            source_index: Vec::new(),
            coords: self
                .columns
                .iter()
                .map(|name| CoordinateVector {
                    name: name.clone(),
                    values: Vec::new(),
                })
                .collect(),
            x: grid.x_coords(),
            y: grid.y_coords(),
            crs: grid.crs.clone(),
            transform: grid.transform,
            nodata,
            mask: grid.validity_mask.clone(),
        };

        for (position, (source_index, feature, tile)) in items.into_iter().enumerate() {
            if tile.height != grid.height || tile.width != grid.width {
                return Err(PipelineError::InvalidGrid(format!(
                    "tile {} is {}x{}, grid is {}x{}",
                    position, tile.height, tile.width, grid.height, grid.width
                )));
            }

            let idx = position as u32;
            stack.feature.extend(std::iter::repeat(idx).take(tile.nnz()));
            stack.rows.extend_from_slice(&tile.rows);
            stack.cols.extend_from_slice(&tile.cols);
            stack.values.extend_from_slice(&tile.values);
            stack.source_index.push(source_index);

            for coord in &mut stack.coords {
                let value = feature
                    .attributes
                    .get(&coord.name)
                    .cloned()
                    .unwrap_or(AttributeValue::Null);
                coord.values.push(value);
            }
            stack.shape.0 += 1;
        }

        stack.validate()?;
        info!(
            features = stack.len(),
            nnz = stack.nnz(),
            height = grid.height,
            width = grid.width,
            "Assembled feature stack"
        );
        Ok(stack)
    }
}
