//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::path::Path;

use geo::MultiPolygon;
use raster_pipeline::{
    AttributeValue, Attributes, BurnMode, ExecutorConfig, Feature, GeoTransform, PipelineConfig,
    ReferenceGrid, TouchPolicy,
};
use test_utils::fixtures::grid::GridSpec;

pub fn grid_from(spec: GridSpec) -> ReferenceGrid {
    ReferenceGrid::new(
        GeoTransform::from_gdal(spec.gdal_transform()),
        spec.crs,
        spec.height,
        spec.width,
    )
    .expect("valid grid")
}

/// Rectangle covering pixel rows `r0..r1` and cols `c0..c1` of a unit grid.
pub fn cells(spec: GridSpec, r0: usize, r1: usize, c0: usize, c1: usize) -> MultiPolygon<f64> {
    let (x0, y1) = spec.corner(c0, r0);
    let (x1, y0) = spec.corner(c1, r1);
    test_utils::rect(x0, y0, x1, y1)
}

pub fn taxon_feature(
    geometry: Option<MultiPolygon<f64>>,
    taxon: (i64, &str, &str),
    rank: i64,
) -> Feature {
    let mut attributes = Attributes::new();
    attributes.insert("TAXON_ID".to_string(), AttributeValue::Int(taxon.0));
    attributes.insert("SCIENTIFIC_NAME".to_string(), AttributeValue::from(taxon.1));
    attributes.insert("TAXON_GROUP".to_string(), AttributeValue::from(taxon.2));
    attributes.insert("PRESENCE_CATEGORY".to_string(), AttributeValue::Int(rank));
    Feature::new(geometry, attributes)
}

/// Exact-touch, rank-burning config writing under `output_dir`.
pub fn rank_config(output_dir: &Path) -> PipelineConfig {
    PipelineConfig {
        executor: ExecutorConfig {
            workers: 2,
            batch_size: 3,
            progress_interval: 0,
        },
        touch: TouchPolicy::Exact,
        burn_mode: BurnMode::Rank,
        output_dir: output_dir.to_path_buf(),
        ..Default::default()
    }
}
