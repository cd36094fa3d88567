//! Burning polygon geometries onto the reference grid.
//!
//! Geometries are first mapped into pixel space with the inverse grid
//! transform, so pixel `(row, col)` covers `[col, col + 1) x [row, row + 1)`
//! and its representative point is the centre `(col + 0.5, row + 0.5)`.
//!
//! - [`TouchPolicy::Exact`]: scanline fill at pixel-centre rows using the
//!   even-odd rule per polygon, so holes are honoured.
//! - [`TouchPolicy::AllTouched`]: the exact fill plus every pixel whose open
//!   interior is crossed by a ring edge. Edges running exactly along a pixel
//!   boundary do not touch the neighbouring pixel.

use geo::{MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{PipelineError, Result};
use crate::grid::{GeoTransform, ReferenceGrid};
use crate::rank::BurnSpec;

/// Default nodata sentinel for `u8` tiles.
pub const DEFAULT_NODATA: u8 = 255;

/// Value of cells not covered by any geometry.
pub const BACKGROUND: u8 = 0;

/// Which pixels a geometry burns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchPolicy {
    /// Any pixel intersecting the geometry, boundary pixels included.
    #[default]
    AllTouched,
    /// Only pixels whose centre falls inside the geometry.
    Exact,
}

impl TouchPolicy {
    /// Parse from string (case-insensitive); `None` for unknown names.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "exact" | "centroid" | "centre" | "center" => Some(Self::Exact),
            "all_touched" | "all-touched" | "alltouched" => Some(Self::AllTouched),
            _ => None,
        }
    }

    /// Parse from string, falling back to the default for unknown names.
    pub fn from_str(s: &str) -> Self {
        Self::parse(s).unwrap_or_else(|| {
            warn!(value = s, default = %Self::default(), "Unknown touch policy, using default");
            Self::default()
        })
    }
}

impl std::fmt::Display for TouchPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllTouched => write!(f, "all_touched"),
            Self::Exact => write!(f, "exact"),
        }
    }
}

/// Options for a rasterization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterizeOptions {
    pub touch: TouchPolicy,
    pub nodata: u8,
}

impl Default for RasterizeOptions {
    fn default() -> Self {
        Self {
            touch: TouchPolicy::AllTouched,
            nodata: DEFAULT_NODATA,
        }
    }
}

/// Dense 2-D raster with the reference grid's shape (row-major).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterTile {
    pub height: usize,
    pub width: usize,
    pub data: Vec<u8>,
}

impl RasterTile {
    /// Background-filled tile.
    pub fn zeros(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            data: vec![BACKGROUND; height * width],
        }
    }

    /// Get the value at a specific grid coordinate.
    pub fn get(&self, row: usize, col: usize) -> Option<u8> {
        if row >= self.height || col >= self.width {
            return None;
        }
        self.data.get(row * self.width + col).copied()
    }

    /// Number of cells that differ from background.
    pub fn count_non_background(&self) -> usize {
        self.data.iter().filter(|v| **v != BACKGROUND).count()
    }

    /// Number of cells holding `value`.
    pub fn count_value(&self, value: u8) -> usize {
        self.data.iter().filter(|v| **v == value).count()
    }

    /// Presence view: `true` wherever a burn value was written.
    pub fn to_bool(&self, nodata: u8) -> Vec<bool> {
        self.data
            .iter()
            .map(|v| *v != BACKGROUND && *v != nodata)
            .collect()
    }

    fn set(&mut self, row: usize, col: usize, value: u8) {
        self.data[row * self.width + col] = value;
    }
}

/// Pixel-space rings of one polygon (exterior first).
type PixelRings = Vec<Vec<(f64, f64)>>;

/// Burns geometries onto a [`ReferenceGrid`].
///
/// Holds only shared references and is `Sync`, so one instance serves all workers.
#[derive(Debug, Clone)]
pub struct Rasterizer<'g> {
    grid: &'g ReferenceGrid,
    inverse: GeoTransform,
    options: RasterizeOptions,
}

impl<'g> Rasterizer<'g> {
    pub fn new(grid: &'g ReferenceGrid, options: RasterizeOptions) -> Result<Self> {
        let inverse = grid.transform.inverse()?;
        Ok(Self {
            grid,
            inverse,
            options,
        })
    }

    pub fn options(&self) -> RasterizeOptions {
        self.options
    }

    pub fn grid(&self) -> &ReferenceGrid {
        self.grid
    }

    /// Burn one geometry.
    pub fn rasterize(&self, geometry: &MultiPolygon<f64>, burn_value: u8) -> Result<RasterTile> {
        self.check_burn_value(burn_value)?;
        let mut tile = RasterTile::zeros(self.grid.height, self.grid.width);
        self.burn(&mut tile, geometry, burn_value);
        self.apply_mask(&mut tile);
        Ok(tile)
    }

    /// Burn several geometries into one tile; later specs win where they overlap.
    pub fn rasterize_many(&self, specs: &[BurnSpec]) -> Result<RasterTile> {
        for spec in specs {
            self.check_burn_value(spec.burn_value)?;
        }
        let mut tile = RasterTile::zeros(self.grid.height, self.grid.width);
        for spec in specs {
            self.burn(&mut tile, &spec.geometry, spec.burn_value);
        }
        self.apply_mask(&mut tile);
        Ok(tile)
    }

    fn check_burn_value(&self, burn_value: u8) -> Result<()> {
        if burn_value == BACKGROUND || burn_value == self.options.nodata {
            return Err(PipelineError::config(format!(
                "burn value {} is reserved (background {}, nodata {})",
                burn_value, BACKGROUND, self.options.nodata
            )));
        }
        Ok(())
    }

    fn burn(&self, tile: &mut RasterTile, geometry: &MultiPolygon<f64>, value: u8) {
        for polygon in &geometry.0 {
            let rings = self.to_pixel_rings(polygon);
            fill_centres(&rings, tile, value);
            if self.options.touch == TouchPolicy::AllTouched {
                touch_edges(&rings, tile, value);
            }
        }
    }

    /// Pixels outside the grid's valid footprint become nodata.
    fn apply_mask(&self, tile: &mut RasterTile) {
        if let Some(mask) = &self.grid.validity_mask {
            for (cell, valid) in tile.data.iter_mut().zip(mask) {
                if !valid {
                    *cell = self.options.nodata;
                }
            }
        }
    }

    fn to_pixel_rings(&self, polygon: &Polygon<f64>) -> PixelRings {
        std::iter::once(polygon.exterior())
            .chain(polygon.interiors())
            .map(|ring| {
                let mut pts: Vec<(f64, f64)> = ring
                    .0
                    .iter()
                    .map(|c| self.inverse.apply(c.x, c.y))
                    .collect();
                if let (Some(first), Some(last)) = (pts.first().copied(), pts.last().copied()) {
                    if first != last {
                        pts.push(first);
                    }
                }
                pts
            })
            .filter(|pts| pts.len() >= 4)
            .collect()
    }
}

/// Scanline fill of pixel centres (even-odd across all rings of one polygon).
fn fill_centres(rings: &PixelRings, tile: &mut RasterTile, value: u8) {
    let (ymin, ymax) = rings
        .iter()
        .flatten()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p.1), hi.max(p.1))
        });
    if !ymin.is_finite() || !ymax.is_finite() {
        return;
    }

    // Rows whose centre y lies in [ymin, ymax).
    let first_row = (ymin - 0.5).ceil().max(0.0);
    let end_row = (ymax - 0.5).ceil().min(tile.height as f64);
    if end_row <= first_row {
        return;
    }

    let mut crossings: Vec<f64> = Vec::new();
    for row in first_row as usize..end_row as usize {
        let y = row as f64 + 0.5;
        crossings.clear();

        for ring in rings {
            for edge in ring.windows(2) {
                let (x0, y0) = edge[0];
                let (x1, y1) = edge[1];
                if (y0 <= y) != (y1 <= y) {
                    crossings.push(x0 + (y - y0) * (x1 - x0) / (y1 - y0));
                }
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));

        for span in crossings.chunks_exact(2) {
            // Columns whose centre x lies in [span[0], span[1]).
            let start = (span[0] - 0.5).ceil().max(0.0);
            let end = (span[1] - 0.5).ceil().min(tile.width as f64);
            if end <= start {
                continue;
            }
            for col in start as usize..end as usize {
                tile.set(row, col, value);
            }
        }
    }
}

/// Mark every pixel whose open interior is crossed by a ring edge.
fn touch_edges(rings: &PixelRings, tile: &mut RasterTile, value: u8) {
    let max_row = tile.height as f64 - 1.0;
    let max_col = tile.width as f64 - 1.0;

    for ring in rings {
        for edge in ring.windows(2) {
            let (p0, p1) = (edge[0], edge[1]);

            let row_lo = p0.1.min(p1.1).floor().max(0.0);
            let row_hi = p0.1.max(p1.1).floor().min(max_row);
            if row_hi < row_lo {
                continue;
            }

            for row in row_lo as usize..=row_hi as usize {
                let Some((xa, xb)) = x_extent_in_band(p0, p1, row as f64, row as f64 + 1.0) else {
                    continue;
                };
                let col_lo = xa.floor().max(0.0);
                let col_hi = xb.floor().min(max_col);
                if col_hi < col_lo {
                    continue;
                }

                for col in col_lo as usize..=col_hi as usize {
                    if crosses_pixel_interior(p0, p1, row, col) {
                        tile.set(row, col, value);
                    }
                }
            }
        }
    }
}

/// x-range of the part of segment p0-p1 lying within `ylo <= y <= yhi`.
fn x_extent_in_band(p0: (f64, f64), p1: (f64, f64), ylo: f64, yhi: f64) -> Option<(f64, f64)> {
    let (t0, t1) = clip_param(p1.1 - p0.1, p0.1, ylo, yhi, 0.0, 1.0)?;
    let xa = p0.0 + t0 * (p1.0 - p0.0);
    let xb = p0.0 + t1 * (p1.0 - p0.0);
    Some((xa.min(xb), xa.max(xb)))
}

/// Liang-Barsky clip along one axis, narrowing `[t0, t1]`.
fn clip_param(delta: f64, start: f64, lo: f64, hi: f64, t0: f64, t1: f64) -> Option<(f64, f64)> {
    let mut t0 = t0;
    let mut t1 = t1;
    for (p, q) in [(-delta, start - lo), (delta, hi - start)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }
    Some((t0, t1))
}

/// Whether segment p0-p1 passes through the open interior of pixel (row, col).
fn crosses_pixel_interior(p0: (f64, f64), p1: (f64, f64), row: usize, col: usize) -> bool {
    let (xlo, xhi) = (col as f64, col as f64 + 1.0);
    let (ylo, yhi) = (row as f64, row as f64 + 1.0);

    let Some((t0, t1)) = clip_param(p1.0 - p0.0, p0.0, xlo, xhi, 0.0, 1.0) else {
        return false;
    };
    let Some((t0, t1)) = clip_param(p1.1 - p0.1, p0.1, ylo, yhi, t0, t1) else {
        return false;
    };

    // The clipped piece's midpoint is interior unless the piece lies on the border.
    let t = (t0 + t1) / 2.0;
    let mx = p0.0 + t * (p1.0 - p0.0);
    let my = p0.1 + t * (p1.1 - p0.1);
    mx > xlo && mx < xhi && my > ylo && my < yhi
}
