//! Coordinate-list (COO) encoding of mostly-background tiles.
//!
//! Only cells that are neither background nor masked out by the grid's
//! validity mask are stored. Masked cells are always nodata after
//! rasterization, so the mask plus the entries reconstruct the dense tile
//! exactly.

use serde::{Deserialize, Serialize};

use crate::rasterize::{RasterTile, BACKGROUND};

/// Sparse form of one [`RasterTile`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SparseTile {
    pub height: usize,
    pub width: usize,
    pub rows: Vec<u32>,
    pub cols: Vec<u32>,
    pub values: Vec<u8>,
}

impl SparseTile {
    /// Encode a dense tile, skipping background and masked cells.
    pub fn from_dense(tile: &RasterTile, mask: Option<&[bool]>) -> Self {
        let mut sparse = Self {
            height: tile.height,
            width: tile.width,
            ..Default::default()
        };

        for (i, value) in tile.data.iter().enumerate() {
            if *value == BACKGROUND {
                continue;
            }
            if let Some(mask) = mask {
                if !mask[i] {
                    continue;
                }
            }
            sparse.rows.push((i / tile.width) as u32);
            sparse.cols.push((i % tile.width) as u32);
            sparse.values.push(*value);
        }

        sparse
    }

    /// Rebuild the dense tile; masked cells become `nodata`.
    pub fn to_dense(&self, mask: Option<&[bool]>, nodata: u8) -> RasterTile {
        let mut tile = RasterTile::zeros(self.height, self.width);

        for ((row, col), value) in self.rows.iter().zip(&self.cols).zip(&self.values) {
            tile.data[*row as usize * self.width + *col as usize] = *value;
        }

        if let Some(mask) = mask {
            for (cell, valid) in tile.data.iter_mut().zip(mask) {
                if !valid {
                    *cell = nodata;
                }
            }
        }

        tile
    }

    /// Number of stored cells.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }
}
