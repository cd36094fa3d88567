//! Reference grid: the raster space every output is aligned to.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Affine pixel-to-world transform in GDAL/rasterio coefficient order.
///
/// ```text
/// x = c + col * a + row * b
/// y = f + col * d + row * e
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl GeoTransform {
    /// Create a transform from its six coefficients.
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// North-up transform from the upper-left corner and pixel sizes.
    ///
    /// `yres` is given as a positive size; rows grow southwards.
    pub fn from_origin(west: f64, north: f64, xres: f64, yres: f64) -> Self {
        Self::new(xres, 0.0, west, 0.0, -yres, north)
    }

    /// Build from a GDAL geotransform array `[c, a, b, f, d, e]`.
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self::new(gt[1], gt[2], gt[0], gt[4], gt[5], gt[3])
    }

    /// GDAL geotransform array `[c, a, b, f, d, e]`.
    pub fn to_gdal(&self) -> [f64; 6] {
        [self.c, self.a, self.b, self.f, self.d, self.e]
    }

    /// World coordinates of a (fractional) pixel position.
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.c + col * self.a + row * self.b,
            self.f + col * self.d + row * self.e,
        )
    }

    fn determinant(&self) -> f64 {
        self.a * self.e - self.b * self.d
    }

    /// The inverse (world-to-pixel) transform.
    pub fn inverse(&self) -> Result<GeoTransform> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return Err(PipelineError::InvalidGrid(format!(
                "transform {:?} is not invertible",
                self.to_gdal()
            )));
        }

        let ia = self.e / det;
        let ib = -self.b / det;
        let id = -self.d / det;
        let ie = self.a / det;

        Ok(GeoTransform {
            a: ia,
            b: ib,
            c: -(ia * self.c + ib * self.f),
            d: id,
            e: ie,
            f: -(id * self.c + ie * self.f),
        })
    }

    /// Apply this transform as a plain affine map (used with `inverse()`).
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        self.pixel_to_world(x, y)
    }
}

/// Immutable description of the target raster space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceGrid {
    pub transform: GeoTransform,
    /// Coordinate reference system identifier (e.g. "EPSG:4283" or WKT).
    pub crs: String,
    pub height: usize,
    pub width: usize,
    /// Row-major, `true` where output pixels are meaningful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity_mask: Option<Vec<bool>>,
}

impl ReferenceGrid {
    /// Create a grid without a validity mask.
    pub fn new(
        transform: GeoTransform,
        crs: impl Into<String>,
        height: usize,
        width: usize,
    ) -> Result<Self> {
        if height == 0 || width == 0 {
            return Err(PipelineError::InvalidGrid(format!(
                "grid shape must be non-empty, got {}x{}",
                height, width
            )));
        }
        transform.inverse()?;

        Ok(Self {
            transform,
            crs: crs.into(),
            height,
            width,
            validity_mask: None,
        })
    }

    /// Attach a validity mask (row-major, `height * width` entries).
    pub fn with_mask(mut self, mask: Vec<bool>) -> Result<Self> {
        if mask.len() != self.len() {
            return Err(PipelineError::InvalidGrid(format!(
                "validity mask has {} cells, grid has {}",
                mask.len(),
                self.len()
            )));
        }
        self.validity_mask = Some(mask);
        Ok(self)
    }

    /// Derive the validity mask from a single band: valid where value != nodata.
    pub fn with_mask_from_band(self, band: &[f64], nodata: f64) -> Result<Self> {
        let mask = band
            .iter()
            .map(|v| !(v.is_nan() || *v == nodata))
            .collect();
        self.with_mask(mask)
    }

    /// (height, width)
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.height * self.width
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the pixel at (row, col) carries meaningful data.
    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        match &self.validity_mask {
            Some(mask) => mask[row * self.width + col],
            None => true,
        }
    }

    /// Pixel-centre x coordinates of each column (first row).
    pub fn x_coords(&self) -> Vec<f64> {
        (0..self.width)
            .map(|col| self.transform.pixel_to_world(col as f64 + 0.5, 0.5).0)
            .collect()
    }

    /// Pixel-centre y coordinates of each row (first column).
    pub fn y_coords(&self) -> Vec<f64> {
        (0..self.height)
            .map(|row| self.transform.pixel_to_world(0.5, row as f64 + 0.5).1)
            .collect()
    }
}
