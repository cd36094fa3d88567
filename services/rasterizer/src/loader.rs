//! Input loading: reference grid descriptors and GeoJSON features.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use raster_pipeline::{AttributeValue, Attributes, Feature, FeatureSource, GeoTransform, ReferenceGrid};
use serde::Deserialize;
use tracing::{info, warn};

/// Grid descriptor file (JSON or YAML).
///
/// ```yaml
/// transform: [112.0, 0.01, 0.0, -10.0, 0.0, -0.01]   # GDAL order
/// crs: EPSG:4283
/// height: 3400
/// width: 4100
/// mask_path: mask.json                              # optional
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct GridDescriptor {
    pub transform: [f64; 6],
    pub crs: String,
    pub height: usize,
    pub width: usize,
    /// Inline validity rows of 0/1.
    #[serde(default)]
    pub mask: Option<Vec<Vec<u8>>>,
    /// JSON file holding validity rows of 0/1, relative to the descriptor.
    #[serde(default)]
    pub mask_path: Option<PathBuf>,
}

impl GridDescriptor {
    fn into_grid(self, base: &Path) -> Result<ReferenceGrid> {
        let grid = ReferenceGrid::new(
            GeoTransform::from_gdal(self.transform),
            self.crs,
            self.height,
            self.width,
        )?;

        let rows = match (self.mask, self.mask_path) {
            (Some(rows), _) => Some(rows),
            (None, Some(path)) => {
                let path = if path.is_relative() { base.join(path) } else { path };
                let content = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read mask from {:?}", path))?;
                Some(serde_json::from_str(&content).with_context(|| format!("Failed to parse mask {:?}", path))?)
            }
            (None, None) => None,
        };

        match rows {
            Some(rows) => {
                if rows.len() != grid.height || rows.iter().any(|r| r.len() != grid.width) {
                    bail!(
                        "mask must have {} rows of {} values",
                        grid.height,
                        grid.width
                    );
                }
                let mask = rows.into_iter().flatten().map(|v| v != 0).collect();
                Ok(grid.with_mask(mask)?)
            }
            None => Ok(grid),
        }
    }
}

/// Load a reference grid; `.yaml`/`.yml` are parsed as YAML, anything else as JSON.
pub fn load_grid<P: AsRef<Path>>(path: P) -> Result<ReferenceGrid> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read grid from {:?}", path))?;

    let descriptor: GridDescriptor = if is_yaml(path) {
        serde_yaml::from_str(&content).with_context(|| format!("Failed to parse grid YAML {:?}", path))?
    } else {
        serde_json::from_str(&content).with_context(|| format!("Failed to parse grid JSON {:?}", path))?
    };

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let grid = descriptor.into_grid(base)?;
    info!(
        height = grid.height,
        width = grid.width,
        crs = %grid.crs,
        masked = grid.validity_mask.is_some(),
        "Loaded reference grid"
    );
    Ok(grid)
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()).as_deref(),
        Some("yaml") | Some("yml")
    )
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<GeoJsonFeature>,
}

#[derive(Debug, Deserialize)]
struct GeoJsonFeature {
    #[serde(default)]
    geometry: Option<GeoJsonGeometry>,
    #[serde(default)]
    properties: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum GeoJsonGeometry {
    Polygon { coordinates: Vec<Vec<Vec<f64>>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Vec<f64>>>> },
    #[serde(other)]
    Unsupported,
}

fn to_ring(points: &[Vec<f64>]) -> Result<LineString<f64>> {
    points
        .iter()
        .map(|p| match p.as_slice() {
            [x, y, ..] => Ok(Coord { x: *x, y: *y }),
            _ => bail!("position needs at least two values"),
        })
        .collect::<Result<Vec<_>>>()
        .map(LineString::from)
}

fn to_polygon(rings: &[Vec<Vec<f64>>]) -> Result<Polygon<f64>> {
    let Some((exterior, interiors)) = rings.split_first() else {
        bail!("polygon has no rings");
    };
    let interiors = interiors.iter().map(|r| to_ring(r)).collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(to_ring(exterior)?, interiors))
}

impl GeoJsonGeometry {
    fn to_multi_polygon(&self) -> Result<Option<MultiPolygon<f64>>> {
        match self {
            Self::Polygon { coordinates } => Ok(Some(MultiPolygon::new(vec![to_polygon(coordinates)?]))),
            Self::MultiPolygon { coordinates } => {
                let polygons = coordinates.iter().map(|p| to_polygon(p)).collect::<Result<Vec<_>>>()?;
                Ok(Some(MultiPolygon::new(polygons)))
            }
            Self::Unsupported => Ok(None),
        }
    }
}

fn to_attribute(value: serde_json::Value) -> AttributeValue {
    match value {
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => AttributeValue::Text(value.to_string()),
        other => serde_json::from_value(other).unwrap_or(AttributeValue::Null),
    }
}

/// Parse a GeoJSON FeatureCollection.
///
/// Non-polygonal geometries are kept with no geometry so the pipeline
/// reports them as dropped.
pub fn parse_features(content: &str) -> Result<FeatureSource> {
    let collection: FeatureCollection = serde_json::from_str(content).context("Failed to parse GeoJSON")?;

    let mut features = Vec::with_capacity(collection.features.len());
    let mut unsupported = 0usize;
    for (index, raw) in collection.features.into_iter().enumerate() {
        let geometry = match &raw.geometry {
            Some(geometry) => geometry
                .to_multi_polygon()
                .with_context(|| format!("Invalid geometry in feature {}", index))?,
            None => None,
        };
        if geometry.is_none() {
            unsupported += 1;
        }

        let attributes: Attributes = raw
            .properties
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, to_attribute(v)))
            .collect();
        features.push(Feature::new(geometry, attributes));
    }

    if unsupported > 0 {
        warn!(count = unsupported, "Features without polygonal geometry");
    }
    Ok(FeatureSource::new(features))
}

/// Load features from a GeoJSON file.
pub fn load_features<P: AsRef<Path>>(path: P) -> Result<FeatureSource> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read features from {:?}", path))?;
    let source = parse_features(&content).with_context(|| format!("In {:?}", path))?;
    info!(path = %path.display(), features = source.len(), "Loaded features");
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::require_test_file;

    #[test]
    fn test_parse_polygon_and_multipolygon() {
        let content = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature",
                 "geometry": {"type": "Polygon", "coordinates": [[[0,0],[2,0],[2,2],[0,2],[0,0]],[[0.5,0.5],[1,0.5],[1,1],[0.5,0.5]]]},
                 "properties": {"TAXON_ID": 12, "SCIENTIFIC_NAME": "Litoria aurea", "SCORE": 0.5, "TAGS": ["a"]}},
                {"type": "Feature",
                 "geometry": {"type": "MultiPolygon", "coordinates": [[[[0,0,9],[1,0,9],[1,1,9],[0,0,9]]], [[[5,5],[6,5],[6,6],[5,5]]]]},
                 "properties": null},
                {"type": "Feature",
                 "geometry": {"type": "Point", "coordinates": [1, 2]},
                 "properties": {"TAXON_ID": 13}},
                {"type": "Feature", "geometry": null, "properties": {}}
            ]
        }"#;

        let source = parse_features(content).unwrap();
        assert_eq!(source.len(), 4);

        let first = &source.features()[0];
        let geometry = first.geometry.as_ref().unwrap();
        assert_eq!(geometry.0.len(), 1);
        assert_eq!(geometry.0[0].interiors().len(), 1);
        assert_eq!(first.attributes["TAXON_ID"], AttributeValue::Int(12));
        assert_eq!(first.attributes["SCORE"], AttributeValue::Float(0.5));
        assert_eq!(first.attributes["TAGS"], AttributeValue::Text("[\"a\"]".to_string()));

        assert_eq!(source.features()[1].geometry.as_ref().unwrap().0.len(), 2);
        assert!(source.features()[2].geometry.is_none());
        assert!(source.features()[3].geometry.is_none());
    }

    #[test]
    fn test_bad_position_is_an_error() {
        let content = r#"{"features": [{"geometry": {"type": "Polygon", "coordinates": [[[0]]]}}]}"#;
        assert!(parse_features(content).is_err());
    }

    #[test]
    fn test_grid_with_inline_mask() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.yaml");
        fs::write(
            &path,
            "transform: [0.0, 1.0, 0.0, 2.0, 0.0, -1.0]\ncrs: EPSG:3577\nheight: 2\nwidth: 2\nmask: [[1, 0], [1, 1]]\n",
        )
        .unwrap();

        let grid = load_grid(&path).unwrap();
        assert_eq!(grid.shape(), (2, 2));
        assert_eq!(grid.validity_mask, Some(vec![true, false, true, true]));
    }

    #[test]
    fn test_grid_mask_shape_checked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.json");
        fs::write(
            &path,
            r#"{"transform": [0, 1, 0, 2, 0, -1], "crs": "EPSG:3577", "height": 2, "width": 2, "mask": [[1, 1]]}"#,
        )
        .unwrap();
        assert!(load_grid(&path).is_err());
    }

    #[test]
    fn test_load_sample_data() {
        let grid_path = require_test_file!("sample_grid.yaml");
        let features_path = require_test_file!("sample_features.geojson");

        let grid = load_grid(&grid_path).unwrap();
        let source = load_features(&features_path).unwrap();

        assert_eq!(grid.shape(), (8, 8));
        assert!(grid.validity_mask.is_some());
        assert_eq!(source.len(), 4);
    }
}
